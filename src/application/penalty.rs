//! Progressive penalties.
//!
//! Every denial is recorded as a violation in a rolling window per client
//! key. The history is analysed after each violation and, once it reaches a
//! tier of the escalation ladder, a ban is imposed. Bans get longer as
//! violations accumulate and jump ahead for high-risk offenders.

use crate::application::bans::BanStore;
use crate::application::guarded::GuardedStore;
use crate::application::ports::{Clock, StoreError};
use crate::domain::ban::{BanRecord, BanSource};
use crate::domain::endpoint::Endpoint;
use crate::domain::keys::{KeySpace, DAY_MS};
use crate::domain::penalty::{
    analyze, classify_severity, level_for_duration, penalty_level, tier_for_level,
    violations_per_hour, PenaltyAnalysis, Severity, ViolationRecord,
};
use crate::domain::settings::{Role, Settings};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Penalty records outlive the violation window by this much.
const RECORD_TTL_MS: u64 = 7 * DAY_MS;

/// What one recorded violation led to.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationOutcome {
    pub record: ViolationRecord,
    pub analysis: PenaltyAnalysis,
    /// Tier level the history qualifies for, 0 below the first tier
    pub penalty_level: u32,
    /// Ban written by this violation, if any
    pub ban: Option<BanRecord>,
}

impl ViolationOutcome {
    pub fn should_penalize(&self) -> bool {
        self.ban.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct PenaltyEscalator {
    store: GuardedStore,
    keys: KeySpace,
    settings: Arc<Settings>,
    clock: Arc<dyn Clock>,
    bans: BanStore,
}

impl PenaltyEscalator {
    pub fn new(
        store: GuardedStore,
        keys: KeySpace,
        settings: Arc<Settings>,
        clock: Arc<dyn Clock>,
        bans: BanStore,
    ) -> Self {
        Self {
            store,
            keys,
            settings,
            clock,
            bans,
        }
    }

    pub fn bans(&self) -> &BanStore {
        &self.bans
    }

    /// Record one violation by `identifier` on `endpoint` and escalate.
    ///
    /// Returns `None` when penalties are disabled or the history could not
    /// be updated; no ban is imposed then.
    pub fn record_violation(
        &self,
        identifier: &str,
        endpoint: &Endpoint,
        role: Option<Role>,
    ) -> Option<ViolationOutcome> {
        if !self.settings.penalties_enabled {
            return None;
        }

        let now = self.clock.now_millis();
        let record = self.update_record(identifier, endpoint, now)?;
        let rate = violations_per_hour(
            record.violations,
            record.timespan_ms(),
            self.settings.min_rate_span_ms,
        );
        let analysis = analyze(&record, rate);
        let level = penalty_level(&self.settings.penalty_tiers, record.violations, analysis.risk_level);

        let mut outcome = ViolationOutcome {
            record,
            analysis,
            penalty_level: level,
            ban: None,
        };
        if level > 0 {
            outcome.ban = self.escalate(&mut outcome.record, level, role, now);
        }
        Some(outcome)
    }

    /// Append the violation and rebuild the record from the rolling window.
    fn update_record(
        &self,
        identifier: &str,
        endpoint: &Endpoint,
        now: u64,
    ) -> Option<ViolationRecord> {
        let window = self.settings.violation_window_ms;
        let cutoff = now.saturating_sub(window);
        let key = self.keys.violations(identifier);
        let member = format!("{}|{}", Uuid::new_v4(), endpoint);

        self.store
            .call("violation_append", |store| {
                store.append_to_window(&key, now, &member, cutoff, window)
            })
            .ok()?;
        let entries = self
            .store
            .call("violation_history", |store| {
                store.window_entries(&key, cutoff.saturating_add(1), now)
            })
            .ok()?;

        // A record that cannot be read must not be replaced by a fresh one,
        // that would drop the accumulated level and ban time
        let mut record = match self
            .store
            .get_record::<ViolationRecord>("penalty_record_read", &self.keys.penalty_record(identifier))
        {
            Ok(Some(record)) => record,
            Ok(None) => ViolationRecord::new(identifier, now),
            Err(_) => return None,
        };

        let endpoints: BTreeSet<&str> = entries
            .iter()
            .filter_map(|entry| entry.member.split_once('|').map(|(_, ep)| ep))
            .collect();

        record.violations = entries.len() as u32;
        record.last_violation = now;
        record.first_violation = entries.first().map_or(now, |entry| entry.score);
        record.endpoints = endpoints.into_iter().map(str::to_string).collect();
        let rate = violations_per_hour(
            record.violations,
            record.timespan_ms(),
            self.settings.min_rate_span_ms,
        );
        record.severity = classify_severity(record.violations, rate);

        self.save_record(&record).ok()?;
        Some(record)
    }

    fn escalate(
        &self,
        record: &mut ViolationRecord,
        level: u32,
        role: Option<Role>,
        now: u64,
    ) -> Option<BanRecord> {
        let tier = *tier_for_level(&self.settings.penalty_tiers, level)?;
        let ban = BanRecord {
            identifier: record.identifier.clone(),
            reason: format!(
                "Progressive penalty level {} for {} violations",
                level, record.violations
            ),
            start_time: now,
            end_time: now + tier.duration_ms,
            violations: record.violations,
            ban_level: level,
            is_active: true,
            can_appeal: level <= self.settings.appeal_max_level,
            source: BanSource::Penalty,
        };

        if !self.bans.impose(&ban) {
            return None;
        }

        record.penalty_level = level;
        record.total_ban_time = record.total_ban_time.saturating_add(tier.duration_ms);
        if self.save_record(record).is_err() {
            tracing::warn!(
                identifier = %ban.identifier,
                level,
                "ban imposed but penalty record not updated"
            );
        }

        let role = role.map(|r| r.as_str()).unwrap_or("unknown");
        tracing::warn!(
            identifier = %ban.identifier,
            level,
            duration_ms = tier.duration_ms,
            violations = record.violations,
            severity = %tier.severity,
            role,
            end_time = ban.end_time,
            "progressive penalty imposed"
        );
        if tier.severity >= Severity::High {
            tracing::error!(
                identifier = %ban.identifier,
                level,
                total_ban_time_ms = record.total_ban_time,
                can_appeal = ban.can_appeal,
                unique_endpoints = record.endpoints.len(),
                "security alert: progressive penalty level {} imposed",
                level
            );
        }
        Some(ban)
    }

    fn save_record(&self, record: &ViolationRecord) -> Result<(), StoreError> {
        let key = self.keys.penalty_record(&record.identifier);
        self.store
            .put_record("penalty_record_write", &key, record, RECORD_TTL_MS)
    }

    /// Ban `identifier` on operator request.
    ///
    /// Always replaces an existing ban. The level is that of the smallest
    /// tier whose duration covers `duration_ms`.
    pub fn impose_admin_ban(
        &self,
        identifier: &str,
        duration_ms: u64,
        reason: &str,
    ) -> Option<BanRecord> {
        let now = self.clock.now_millis();
        let tiers = &self.settings.penalty_tiers;
        let level = level_for_duration(tiers, duration_ms);
        let stored = self
            .store
            .get_record::<ViolationRecord>("penalty_record_read", &self.keys.penalty_record(identifier));
        let mut record = match &stored {
            Ok(Some(record)) => record.clone(),
            _ => ViolationRecord::new(identifier, now),
        };

        let ban = BanRecord {
            identifier: identifier.to_string(),
            reason: reason.to_string(),
            start_time: now,
            end_time: now.saturating_add(duration_ms),
            violations: record.violations,
            ban_level: level,
            is_active: true,
            can_appeal: level <= self.settings.appeal_max_level,
            source: BanSource::Admin,
        };
        if !self.bans.impose(&ban) {
            return None;
        }

        record.penalty_level = level;
        record.total_ban_time = record.total_ban_time.saturating_add(duration_ms);
        if stored.is_err() || self.save_record(&record).is_err() {
            tracing::warn!(identifier, level, "ban imposed but penalty record not updated");
        }

        tracing::warn!(
            identifier,
            level,
            duration_ms,
            reason,
            "ban imposed by operator"
        );
        Some(ban)
    }

    /// Stored penalty record of `identifier`.
    pub fn penalty_stats(&self, identifier: &str) -> Option<ViolationRecord> {
        self.store
            .get_record("penalty_record_read", &self.keys.penalty_record(identifier))
            .ok()
            .flatten()
    }

    /// Violations of `identifier` inside the rolling window.
    pub fn recent_violations(&self, identifier: &str) -> u64 {
        let cutoff = self
            .clock
            .now_millis()
            .saturating_sub(self.settings.violation_window_ms);
        let key = self.keys.violations(identifier);
        self.store
            .call("violation_count", |store| store.count_window(&key, cutoff))
            .unwrap_or(0)
    }

    /// Forget the violation history, ban and penalty record of
    /// `identifier`. Returns how many keys were removed.
    pub fn clear_penalties(&self, identifier: &str, reason: &str) -> u64 {
        let keys = vec![
            self.keys.violations(identifier),
            self.keys.penalty_record(identifier),
            self.keys.ban(identifier),
        ];
        let removed = self
            .store
            .call("penalty_clear", |store| store.delete(&keys))
            .unwrap_or(0);
        tracing::info!(identifier, reason, removed, "penalties cleared");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::circuit_breaker::CircuitBreaker;
    use crate::application::metrics::Metrics;
    use crate::application::ports::Store;
    use crate::domain::penalty::RiskLevel;
    use crate::infrastructure::memory_store::MemoryStore;
    use crate::infrastructure::mocks::{FailingStore, MockClock};
    use std::time::Duration;

    fn escalator_with(settings: Settings, clock: &MockClock) -> PenaltyEscalator {
        let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        escalator_over(store, settings, clock)
    }

    fn escalator_over(store: Arc<dyn Store>, settings: Settings, clock: &MockClock) -> PenaltyEscalator {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let breaker = Arc::new(CircuitBreaker::new(clock.clone()));
        let guarded = GuardedStore::new(store, breaker, Metrics::new());
        let keys = KeySpace::new("test");
        let bans = BanStore::new(guarded.clone(), keys.clone(), clock.clone());
        PenaltyEscalator::new(guarded, keys, Arc::new(settings), clock, bans)
    }

    fn escalator(clock: &MockClock) -> PenaltyEscalator {
        escalator_with(Settings::default(), clock)
    }

    #[test]
    fn test_below_first_tier_no_ban() {
        let clock = MockClock::default();
        let escalator = escalator(&clock);
        let endpoint = Endpoint::parse("GET /x");

        for _ in 0..4 {
            clock.advance(Duration::from_secs(60));
            let outcome = escalator.record_violation("ip:a", &endpoint, None).unwrap();
            assert_eq!(outcome.penalty_level, 0);
            assert!(!outcome.should_penalize());
        }
        assert_eq!(escalator.recent_violations("ip:a"), 4);
        assert!(!escalator.bans().check_ban("ip:a").is_banned);
    }

    #[test]
    fn test_fifth_violation_bans() {
        let clock = MockClock::default();
        let escalator = escalator(&clock);
        let endpoint = Endpoint::parse("GET /x");

        let mut last = None;
        for _ in 0..5 {
            clock.advance(Duration::from_secs(600));
            last = escalator.record_violation("ip:a", &endpoint, Some(Role::User));
        }
        let outcome = last.unwrap();
        let ban = outcome.ban.unwrap();
        assert_eq!(ban.ban_level, 1);
        assert_eq!(ban.duration_ms(), 5 * 60_000);
        assert!(ban.can_appeal);
        assert_eq!(ban.reason, "Progressive penalty level 1 for 5 violations");

        let record = escalator.penalty_stats("ip:a").unwrap();
        assert_eq!(record.penalty_level, 1);
        assert_eq!(record.total_ban_time, 5 * 60_000);
        assert_eq!(record.endpoints, vec!["GET /x".to_string()]);
    }

    #[test]
    fn test_burst_escalates_beyond_base_tier() {
        let clock = MockClock::default();
        let escalator = escalator(&clock);
        let endpoint = Endpoint::parse("POST /login");

        let mut outcome = None;
        for _ in 0..5 {
            clock.advance_ms(100);
            outcome = escalator.record_violation("ip:burst", &endpoint, None);
        }
        let outcome = outcome.unwrap();
        // Five violations inside a minute read as 300 per hour
        assert_eq!(outcome.record.severity, Severity::Critical);
        assert_eq!(outcome.analysis.risk_level, RiskLevel::Critical);
        assert_eq!(outcome.penalty_level, 3);
        assert_eq!(outcome.ban.unwrap().duration_ms(), 3_600_000);
    }

    #[test]
    fn test_old_violations_leave_window() {
        let clock = MockClock::default();
        let escalator = escalator(&clock);
        let endpoint = Endpoint::parse("GET /x");

        for _ in 0..3 {
            escalator.record_violation("ip:a", &endpoint, None);
        }
        clock.advance(Duration::from_secs(3601));
        let outcome = escalator.record_violation("ip:a", &endpoint, None).unwrap();
        assert_eq!(outcome.record.violations, 1);
    }

    #[test]
    fn test_unique_endpoints_counted() {
        let clock = MockClock::default();
        let escalator = escalator(&clock);
        for path in ["/a", "/b", "/a"] {
            clock.advance(Duration::from_secs(300));
            escalator.record_violation("ip:a", &Endpoint::parse(path), None);
        }
        let record = escalator.penalty_stats("ip:a").unwrap();
        assert_eq!(record.endpoints.len(), 2);
        assert_eq!(record.violations, 3);
    }

    #[test]
    fn test_disabled_penalties() {
        let clock = MockClock::default();
        let settings = Settings {
            penalties_enabled: false,
            ..Settings::default()
        };
        let escalator = escalator_with(settings, &clock);
        assert!(escalator
            .record_violation("ip:a", &Endpoint::parse("/x"), None)
            .is_none());
    }

    #[test]
    fn test_admin_ban_and_clear() {
        let clock = MockClock::default();
        let escalator = escalator(&clock);

        let ban = escalator
            .impose_admin_ban("user:9", 2 * 3_600_000, "fraud review")
            .unwrap();
        assert_eq!(ban.ban_level, 4);
        assert_eq!(ban.source, BanSource::Admin);
        assert!(escalator.bans().check_ban("user:9").is_banned);

        assert_eq!(escalator.clear_penalties("user:9", "appeal granted"), 2);
        assert!(!escalator.bans().check_ban("user:9").is_banned);
        assert!(escalator.penalty_stats("user:9").is_none());
        assert_eq!(escalator.clear_penalties("user:unknown", "noop"), 0);
    }

    #[test]
    fn test_unreadable_record_is_not_reset() {
        let clock = MockClock::default();
        let inner = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let store = Arc::new(FailingStore::wrapping(inner, false));
        let escalator = escalator_over(store.clone(), Settings::default(), &clock);
        let endpoint = Endpoint::parse("GET /x");

        for _ in 0..5 {
            clock.advance(Duration::from_secs(600));
            escalator.record_violation("ip:a", &endpoint, None);
        }
        let before = escalator.penalty_stats("ip:a").unwrap();
        assert_eq!(before.penalty_level, 1);

        store.set_failing_reads(true);
        clock.advance(Duration::from_secs(600));
        assert!(escalator.record_violation("ip:a", &endpoint, None).is_none());
        store.set_failing_reads(false);

        let after = escalator.penalty_stats("ip:a").unwrap();
        assert_eq!(after.penalty_level, 1);
        assert_eq!(after.total_ban_time, 5 * 60_000);
        assert_eq!(after.violations, before.violations);
    }

    #[test]
    fn test_admin_ban_keeps_unreadable_record() {
        let clock = MockClock::default();
        let inner = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let store = Arc::new(FailingStore::wrapping(inner, false));
        let escalator = escalator_over(store.clone(), Settings::default(), &clock);
        let endpoint = Endpoint::parse("GET /x");

        for _ in 0..5 {
            clock.advance(Duration::from_secs(600));
            escalator.record_violation("ip:a", &endpoint, None);
        }

        store.set_failing_reads(true);
        let ban = escalator.impose_admin_ban("ip:a", 3_600_000, "manual").unwrap();
        assert_eq!(ban.source, BanSource::Admin);
        store.set_failing_reads(false);

        let record = escalator.penalty_stats("ip:a").unwrap();
        assert_eq!(record.penalty_level, 1);
        assert_eq!(record.total_ban_time, 5 * 60_000);
        assert!(escalator.bans().check_ban("ip:a").is_banned);
    }
}
