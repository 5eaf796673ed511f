//! Sliding-window counting.
//!
//! Each identifier owns an ordered set of request timestamps in the store.
//! A check prunes entries older than the window, counts the rest and admits
//! the request only if the count is below the effective limit, all in one
//! atomic store operation.

use crate::application::guarded::GuardedStore;
use crate::application::ports::{Clock, WindowRequest};
use crate::domain::keys::KeySpace;
use crate::domain::penalty::penalty_multiplier;
use crate::domain::result::{RateLimitConfig, RateLimitResult};
use crate::domain::settings::{Role, Settings};
use std::sync::Arc;
use uuid::Uuid;

/// Handle on one admitted request, used to refund it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub(crate) key: String,
    pub(crate) member: String,
    pub(crate) skip_successful: bool,
    pub(crate) skip_failed: bool,
}

impl Ticket {
    /// Whether a request with this outcome should be given back.
    pub fn refundable(&self, succeeded: bool) -> bool {
        if succeeded {
            self.skip_successful
        } else {
            self.skip_failed
        }
    }
}

/// Atomic sliding-window counter.
#[derive(Debug, Clone)]
pub struct WindowCounter {
    store: GuardedStore,
    keys: KeySpace,
    settings: Arc<Settings>,
    clock: Arc<dyn Clock>,
}

impl WindowCounter {
    pub fn new(
        store: GuardedStore,
        keys: KeySpace,
        settings: Arc<Settings>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            keys,
            settings,
            clock,
        }
    }

    /// Check and count one request for `identifier`.
    ///
    /// The identifier doubles as the offender key whose recent violations
    /// shrink the limit.
    ///
    /// # Fail-Safe Behavior
    /// Never fails. When the store is unreachable or the circuit is open the
    /// request is allowed and the result is marked `fail_open`.
    pub fn check(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
        role: Option<Role>,
    ) -> RateLimitResult {
        self.check_with_offender(identifier, identifier, config, role)
    }

    /// Like [`check`](Self::check), but reads the penalty multiplier from a
    /// different client key than the window key. Combined checks use this
    /// to penalize `ip:1.2.3.4` on every endpoint window it touches.
    pub fn check_with_offender(
        &self,
        identifier: &str,
        offender: &str,
        config: &RateLimitConfig,
        role: Option<Role>,
    ) -> RateLimitResult {
        self.admit(identifier, offender, config, role).0
    }

    /// Check against an explicit limit, skipping role and penalty scaling.
    pub fn check_with_limit(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
        limit: u64,
    ) -> RateLimitResult {
        self.run(identifier, config, limit).0
    }

    pub(crate) fn admit(
        &self,
        identifier: &str,
        offender: &str,
        config: &RateLimitConfig,
        role: Option<Role>,
    ) -> (RateLimitResult, Option<Ticket>) {
        let limit = self.effective_limit(config, role, offender);
        self.run(identifier, config, limit)
    }

    pub(crate) fn run(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
        limit: u64,
    ) -> (RateLimitResult, Option<Ticket>) {
        let now = self.clock.now_millis();
        // Zero would read as "no expiry" to the store
        let window = config.window_size_ms.max(1);
        let key = self.keys.window(&config.key_prefix, identifier);
        let request = WindowRequest {
            now_ms: now,
            window_ms: window,
            limit,
            member: window_member(window),
        };

        let outcome = match self
            .store
            .call("window_check", |store| store.check_and_insert(&key, &request))
        {
            Ok(outcome) => outcome,
            Err(_) => {
                self.store.metrics().record_fail_open();
                return (RateLimitResult::fail_open(limit, window, now), None);
            }
        };

        let window_start_time = now.saturating_sub(window);
        let reset_time = outcome.oldest_ms.unwrap_or(now) + window;

        if outcome.allowed {
            let ticket = Ticket {
                key,
                member: request.member,
                skip_successful: config.skip_successful,
                skip_failed: config.skip_failed,
            };
            let result = RateLimitResult {
                is_allowed: true,
                remaining_requests: limit.saturating_sub(outcome.count),
                reset_time,
                retry_after: None,
                total_requests: outcome.count,
                window_start_time,
                limit,
                fail_open: false,
            };
            (result, Some(ticket))
        } else {
            let retry_after = reset_time.saturating_sub(now).div_ceil(1000).max(1);
            let result = RateLimitResult {
                is_allowed: false,
                remaining_requests: 0,
                reset_time,
                retry_after: Some(retry_after),
                total_requests: outcome.count,
                window_start_time,
                limit,
                fail_open: false,
            };
            (result, None)
        }
    }

    /// `floor(ceil(max * role multiplier) / penalty multiplier)`, capped by
    /// the role's burst ceiling.
    pub fn effective_limit(
        &self,
        config: &RateLimitConfig,
        role: Option<Role>,
        offender: &str,
    ) -> u64 {
        let multiplier = self.settings.role_multiplier(role);
        let scaled = (config.max_requests as f64 * multiplier).ceil() as u64;
        let limit = scaled / self.penalty_multiplier(offender);

        match role
            .and_then(|r| self.settings.role_limits(r))
            .and_then(|limits| limits.burst_limit)
        {
            Some(burst) => limit.min(burst),
            None => limit,
        }
    }

    /// Divisor for an offender's recent violations. Degrades to 1 when the
    /// history cannot be read.
    pub fn penalty_multiplier(&self, offender: &str) -> u64 {
        if self.settings.penalty_multipliers.is_empty() {
            return 1;
        }
        let now = self.clock.now_millis();
        let cutoff = now.saturating_sub(self.settings.violation_window_ms);
        let key = self.keys.violations(offender);
        match self
            .store
            .call("penalty_multiplier", |store| store.count_window(&key, cutoff))
        {
            Ok(violations) => penalty_multiplier(&self.settings.penalty_multipliers, violations),
            Err(_) => 1,
        }
    }

    /// Give an admitted request back to its window. Returns whether the
    /// entry was still there.
    pub fn refund(&self, ticket: &Ticket) -> bool {
        self.store
            .call("window_refund", |store| {
                store.remove_from_window(&ticket.key, &ticket.member)
            })
            .unwrap_or(false)
    }

    /// Requests currently inside `identifier`'s window, without counting one.
    pub fn current_count(&self, identifier: &str, config: &RateLimitConfig) -> Option<u64> {
        let now = self.clock.now_millis();
        let key = self.keys.window(&config.key_prefix, identifier);
        let cutoff = now.saturating_sub(config.window_size_ms);
        self.store
            .call("window_count", |store| store.count_window(&key, cutoff))
            .ok()
    }
}

/// Unique window member that also records the window it was counted in,
/// so readers without the config can tell live entries from stale ones.
pub(crate) fn window_member(window_ms: u64) -> String {
    format!("{}|{}", window_ms, Uuid::new_v4())
}

/// Window length recorded in a member written by [`window_member`].
pub(crate) fn member_window(member: &str) -> Option<u64> {
    member.split_once('|')?.0.parse().ok()
}
