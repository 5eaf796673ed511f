//! Process-local counters.
//!
//! Cheap atomic counters describing what this instance decided. They are
//! independent of the store-backed monitoring aggregates and keep counting
//! while the store is down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking decision statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Requests allowed, including bypassed and fail-open ones
    allowed: AtomicU64,
    /// Requests denied for any reason
    blocked: AtomicU64,
    /// Window checks answered without the store
    fail_open: AtomicU64,
    /// Store operations that returned an error
    store_failures: AtomicU64,
    /// Bans imposed by escalation or by an operator
    bans_imposed: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub(crate) fn record_allowed(&self) {
        self.inner.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_blocked(&self) {
        self.inner.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail_open(&self) {
        self.inner.fail_open.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_failure(&self) {
        self.inner.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ban(&self) {
        self.inner.bans_imposed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn allowed(&self) -> u64 {
        self.inner.allowed.load(Ordering::Relaxed)
    }

    pub fn blocked(&self) -> u64 {
        self.inner.blocked.load(Ordering::Relaxed)
    }

    pub fn fail_open(&self) -> u64 {
        self.inner.fail_open.load(Ordering::Relaxed)
    }

    pub fn store_failures(&self) -> u64 {
        self.inner.store_failures.load(Ordering::Relaxed)
    }

    pub fn bans_imposed(&self) -> u64 {
        self.inner.bans_imposed.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allowed: self.allowed(),
            blocked: self.blocked(),
            fail_open: self.fail_open(),
            store_failures: self.store_failures(),
            bans_imposed: self.bans_imposed(),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.inner.allowed.store(0, Ordering::Relaxed);
        self.inner.blocked.store(0, Ordering::Relaxed);
        self.inner.fail_open.store(0, Ordering::Relaxed);
        self.inner.store_failures.store(0, Ordering::Relaxed);
        self.inner.bans_imposed.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub allowed: u64,
    pub blocked: u64,
    pub fail_open: u64,
    pub store_failures: u64,
    pub bans_imposed: u64,
}

impl MetricsSnapshot {
    /// Ratio of blocked to total decisions, 0.0 when nothing was decided.
    pub fn block_rate(&self) -> f64 {
        let total = self.total_decisions();
        if total == 0 {
            0.0
        } else {
            self.blocked as f64 / total as f64
        }
    }

    pub fn total_decisions(&self) -> u64 {
        self.allowed.saturating_add(self.blocked)
    }
}
