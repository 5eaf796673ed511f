//! Circuit breaker guarding the shared store.
//!
//! Every limiter answers a store failure by admitting the request, so an
//! unreachable store costs availability nothing but latency. The breaker
//! removes that latency too: once `failure_threshold` calls in a row have
//! failed it opens, and [`GuardedStore`](crate::application::guarded::GuardedStore)
//! answers [`StoreError::CircuitOpen`](crate::application::ports::StoreError)
//! without a round trip. When `recovery_timeout` has passed since the last
//! failure, the next call goes through as a trial. A successful trial
//! closes the circuit and limiting resumes; a failed one starts the wait
//! over.
//!
//! Time comes from the [`Clock`] port so the recovery wait is testable.

use crate::application::ports::Clock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// Whether the store is being contacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Store calls go through; requests are limited normally
    Closed,
    /// Store calls are skipped; every check fails open
    Open,
    /// One trial call is testing whether the store is back
    HalfOpen,
}

impl CircuitState {
    fn decode(raw: u8) -> Self {
        match raw {
            OPEN => CircuitState::Open,
            HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive store failures that open the circuit
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is let through
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared by every component of one engine.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    last_failure_ms: AtomicU64,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(CircuitBreakerConfig::default(), clock)
    }

    pub fn with_config(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::decode(self.state.load(Ordering::Acquire))
    }

    /// Whether the next store call may be made. `false` means the caller
    /// should give its fail-open answer straight away.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let waited = self
                    .clock
                    .now_millis()
                    .saturating_sub(self.last_failure_ms.load(Ordering::Acquire));
                if waited < self.config.recovery_timeout.as_millis() as u64 {
                    return false;
                }
                // Concurrent callers all see HalfOpen; one of them flips it
                if self
                    .state
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::info!(waited_ms = waited, "retrying store after outage");
                }
                self.state() != CircuitState::Open
            }
        }
    }

    pub fn record_success(&self) {
        if self.state() == CircuitState::Open {
            return;
        }
        self.consecutive_failures.store(0, Ordering::Release);
        if self
            .state
            .compare_exchange(HALF_OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!("store recovered, rate limiting resumed");
        }
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_ms
            .store(self.clock.now_millis(), Ordering::Release);

        let trip = match self.state() {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= u64::from(self.config.failure_threshold),
            CircuitState::Open => false,
        };
        if trip && self.state.swap(OPEN, Ordering::AcqRel) != OPEN {
            tracing::error!(
                consecutive_failures = failures,
                recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                "store circuit opened, failing open"
            );
        }
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Close the circuit by hand, e.g. after swapping the store.
    pub fn reset(&self) {
        self.state.store(CLOSED, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }
}
