//! Operator tooling.
//!
//! Read and write access to everything the engine keeps about a client,
//! plus the monitoring reports. Every operation on an identifier the store
//! knows nothing about is a harmless no-op.

use crate::application::guarded::GuardedStore;
use crate::application::monitoring::MonitoringAggregator;
use crate::application::penalty::PenaltyEscalator;
use crate::application::ports::Clock;
use crate::application::window::{member_window, WindowCounter};
use crate::domain::alert::Alert;
use crate::domain::ban::{BanRecord, BanStatus};
use crate::domain::keys::KeySpace;
use crate::domain::metrics_report::{
    RateLimitMetrics, RateLimitStats, SystemHealth, ViolatorStat, WindowStat,
};
use crate::domain::penalty::ViolationRecord;
use crate::domain::result::{RateLimitConfig, RateLimitResult};
use crate::domain::settings::Role;
use std::sync::Arc;

const TRIAL_WINDOW_MS: u64 = 60 * 1000;
const TRIAL_MAX_REQUESTS: u64 = 10;
const TRIAL_PREFIX: &str = "test";

#[derive(Debug, Clone)]
pub struct AdminFacade {
    store: GuardedStore,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
    windows: WindowCounter,
    penalties: PenaltyEscalator,
    monitoring: MonitoringAggregator,
}

impl AdminFacade {
    pub fn new(
        store: GuardedStore,
        keys: KeySpace,
        clock: Arc<dyn Clock>,
        windows: WindowCounter,
        penalties: PenaltyEscalator,
        monitoring: MonitoringAggregator,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            windows,
            penalties,
            monitoring,
        }
    }

    pub fn get_metrics(&self, hours_back: u64) -> RateLimitMetrics {
        self.monitoring.get_metrics(hours_back)
    }

    pub fn get_active_alerts(&self, limit: usize) -> Vec<Alert> {
        self.monitoring.get_active_alerts(limit)
    }

    pub fn resolve_alert(&self, id: &str) -> bool {
        self.monitoring.resolve_alert(id)
    }

    pub fn top_violators(&self, hours: u64, limit: usize) -> Vec<ViolatorStat> {
        self.monitoring.top_violators(hours, limit)
    }

    pub fn system_health(&self) -> SystemHealth {
        self.monitoring.system_health()
    }

    /// Windows, recent violations and ban of a client key such as
    /// `ip:203.0.113.9` or `user:42`.
    pub fn get_rate_limit_stats(&self, identifier: &str) -> RateLimitStats {
        let now = self.clock.now_millis();
        let windows = self
            .window_keys(identifier)
            .into_iter()
            .filter_map(|key| {
                let mut entries = self
                    .store
                    .call("admin_window_entries", |store| store.window_entries(&key, 0, now))
                    .ok()?;
                // Entries stay stored until the next check prunes them
                if let Some(window) = entries.last().and_then(|e| member_window(&e.member)) {
                    let cutoff = now.saturating_sub(window);
                    entries.retain(|e| e.score > cutoff);
                }
                Some(WindowStat {
                    requests: entries.len() as u64,
                    oldest: entries.first().map(|e| e.score),
                    newest: entries.last().map(|e| e.score),
                    key,
                })
            })
            .filter(|stat| stat.requests > 0)
            .collect();

        RateLimitStats {
            identifier: identifier.to_string(),
            windows,
            recent_violations: self.penalties.recent_violations(identifier),
            ban: self.penalties.bans().active_ban(identifier),
        }
    }

    pub fn get_penalty_stats(&self, identifier: &str) -> Option<ViolationRecord> {
        self.penalties.penalty_stats(identifier)
    }

    pub fn check_ban_status(&self, identifier: &str) -> BanStatus {
        self.penalties.bans().check_ban(identifier)
    }

    /// Delete every window of `identifier`. Returns how many were removed.
    pub fn clear_rate_limit_data(&self, identifier: &str) -> u64 {
        let keys = self.window_keys(identifier);
        if keys.is_empty() {
            return 0;
        }
        let removed = self
            .store
            .call("admin_clear_windows", |store| store.delete(&keys))
            .unwrap_or(0);
        tracing::info!(identifier, removed, "rate limit data cleared");
        removed
    }

    pub fn clear_penalties(&self, identifier: &str, reason: &str) -> u64 {
        self.penalties.clear_penalties(identifier, reason)
    }

    /// Ban `identifier` for `duration_ms`, replacing any current ban.
    pub fn impose_ban(&self, identifier: &str, duration_ms: u64, reason: &str) -> Option<BanRecord> {
        self.penalties.impose_admin_ban(identifier, duration_ms, reason)
    }

    /// Lift a ban and give the client a clean slate: windows, violation
    /// history and penalty record are cleared too. Returns whether a ban
    /// was active.
    pub fn remove_ban(&self, identifier: &str, reason: &str) -> bool {
        let was_banned = self.penalties.bans().check_ban(identifier).is_banned;
        self.clear_rate_limit_data(identifier);
        self.penalties.clear_penalties(identifier, reason);
        tracing::info!(identifier, reason, was_banned, "ban removed");
        was_banned
    }

    /// Run one request of a 10 per minute trial window for `identifier`.
    pub fn test_rate_limit(&self, identifier: &str, role: Option<Role>) -> RateLimitResult {
        let config = RateLimitConfig::new(TRIAL_WINDOW_MS, TRIAL_MAX_REQUESTS)
            .with_key_prefix(TRIAL_PREFIX);
        self.windows.check(identifier, &config, role)
    }

    /// Window keys of every prefix belonging to `identifier`: the bare
    /// window and the per-endpoint ones (`ip:1.2.3.4:GET /x`).
    fn window_keys(&self, identifier: &str) -> Vec<String> {
        let pattern = self.keys.window_pattern(identifier);
        let marker = format!(":{}", identifier);
        let scoped = format!(":{}:", identifier);
        self.store
            .call("admin_scan", |store| store.scan(&pattern))
            .unwrap_or_default()
            .into_iter()
            .filter(|key| key.ends_with(&marker) || key.contains(&scoped))
            .collect()
    }
}
