//! Traffic aggregation and alerting.
//!
//! Every decision is folded into hour and day buckets in the store: event
//! counters, per-endpoint and per-role hashes, unique address and user sets,
//! and per-identifier block counts. Blocks are checked against the alert
//! rules as they are recorded. Reports read the buckets back; cleanup drops
//! buckets past their retention.

use crate::application::guarded::GuardedStore;
use crate::application::ports::{Clock, StoreError, NO_EXPIRY};
use crate::domain::alert::{Alert, AlertType};
use crate::domain::context::UserContext;
use crate::domain::endpoint::Endpoint;
use crate::domain::keys::{
    day_bucket, hour_bucket, hour_buckets, EventKind, Granularity, KeySpace, DAY_MS, HOUR_MS,
};
use crate::domain::metrics_report::{
    CleanupReport, ClientKind, EndpointStat, HealthStatus, RateLimitMetrics, RoleStat,
    SystemHealth, ViolatorStat,
};
use crate::domain::penalty::Severity;
use crate::domain::settings::{Role, Settings};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

const HOUR_RETENTION_MS: u64 = 25 * HOUR_MS;
const DAY_RETENTION_MS: u64 = 8 * DAY_MS;
/// Resolved alerts are kept this long before cleanup deletes them.
const ALERT_RETENTION_MS: u64 = 7 * DAY_MS;
const TOP_VIOLATORS: usize = 10;

/// Caller details attached to a recorded event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMetadata {
    pub role: Option<Role>,
    pub ip: Option<String>,
    pub user_id: Option<String>,
}

impl From<&UserContext> for EventMetadata {
    fn from(context: &UserContext) -> Self {
        Self {
            role: context.role,
            ip: Some(context.ip.clone()),
            user_id: context.user_id.clone().filter(|_| context.is_authenticated),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitoringAggregator {
    store: GuardedStore,
    keys: KeySpace,
    settings: Arc<Settings>,
    clock: Arc<dyn Clock>,
}

impl MonitoringAggregator {
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

    /// Fold one event into the current buckets. Blocks also run the alert
    /// rules. Store failures are logged and otherwise ignored.
    pub fn record_event(
        &self,
        kind: EventKind,
        identifier: &str,
        endpoint: &Endpoint,
        metadata: &EventMetadata,
    ) {
        if !self.settings.monitoring_enabled {
            return;
        }

        let now = self.clock.now_millis();
        let hour = hour_bucket(now);
        let day = day_bucket(now);
        let endpoint_name = endpoint.to_string();

        let hourly_total = self.increment(
            &self.keys.event_counter(kind, Granularity::Hour, hour),
            HOUR_RETENTION_MS,
        );
        self.increment(
            &self.keys.event_counter(kind, Granularity::Day, day),
            DAY_RETENTION_MS,
        );
        let endpoint_total = self.increment_field(
            &self.keys.endpoints(kind, hour),
            &endpoint_name,
        );
        if let Some(role) = metadata.role {
            self.increment_field(&self.keys.roles(kind, hour), role.as_str());
        }
        if let Some(ip) = &metadata.ip {
            self.add_member(&self.keys.ips(hour), ip);
        }
        if let Some(user_id) = &metadata.user_id {
            self.add_member(&self.keys.users(hour), user_id);
            if let Some(role) = metadata.role {
                self.add_member(&self.keys.role_users(role, hour), user_id);
            }
        }

        if kind != EventKind::Block {
            return;
        }

        let identifier_blocks = self.increment_field(&self.keys.violators(hour), identifier);
        if let Some(ip) = &metadata.ip {
            self.increment_field(&self.keys.blocked_ips(hour), ip);
        }

        let checks = [
            (
                AlertType::HighViolationRate,
                identifier,
                identifier_blocks,
                self.settings.alert_threshold,
            ),
            (
                AlertType::SuspiciousPattern,
                endpoint_name.as_str(),
                endpoint_total,
                self.settings.suspicious_endpoint_threshold,
            ),
            (
                AlertType::MassBlocking,
                "system",
                hourly_total,
                self.settings.mass_blocking_threshold,
            ),
        ];
        for (alert_type, subject, count, threshold) in checks {
            if let Some(count) = count {
                if count >= threshold {
                    let mut details = BTreeMap::new();
                    details.insert("count".to_string(), count.to_string());
                    details.insert("endpoint".to_string(), endpoint_name.clone());
                    details.insert("time_window".to_string(), "1 hour".to_string());
                    self.raise(alert_type, subject, hour, now, details);
                }
            }
        }
    }

    fn increment(&self, key: &str, ttl_ms: u64) -> Option<u64> {
        self.store
            .call("metrics_increment", |store| store.increment(key, 1, ttl_ms))
            .ok()
            .map(|v| v.max(0) as u64)
    }

    fn increment_field(&self, key: &str, field: &str) -> Option<u64> {
        self.store
            .call("metrics_increment_field", |store| {
                store.increment_field(key, field, 1, HOUR_RETENTION_MS)
            })
            .ok()
            .map(|v| v.max(0) as u64)
    }

    fn add_member(&self, key: &str, member: &str) {
        let _ = self.store.call("metrics_add_member", |store| {
            store.add_member(key, member, HOUR_RETENTION_MS)
        });
    }

    /// Create the alert for this subject and hour unless it already exists.
    fn raise(
        &self,
        alert_type: AlertType,
        subject: &str,
        hour: u64,
        now: u64,
        details: BTreeMap<String, String>,
    ) {
        let alert = Alert::new(alert_type, subject, hour, now, details);
        let key = self.keys.alert(&alert.id);

        match self.store.call("alert_exists", |store| store.get(&key)) {
            Ok(None) => {}
            _ => return,
        }
        // Alerts stay until resolved; cleanup removes them afterwards
        if self
            .store
            .put_record("alert_write", &key, &alert, NO_EXPIRY)
            .is_err()
        {
            return;
        }
        let _ = self.store.call("alert_index", |store| {
            store.append_to_window(&self.keys.active_alerts(), now, &alert.id, 0, NO_EXPIRY)
        });

        match alert.severity {
            Severity::High | Severity::Critical => tracing::error!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                identifier = %alert.identifier,
                "security alert raised"
            ),
            _ => tracing::warn!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                identifier = %alert.identifier,
                "security alert raised"
            ),
        }
    }

    /// Traffic summary over the last `hours_back` hours, current hour
    /// included.
    pub fn get_metrics(&self, hours_back: u64) -> RateLimitMetrics {
        let end = self.clock.now_millis();
        let start = end.saturating_sub(hours_back.max(1) * HOUR_MS);
        let buckets = hour_buckets(start, end);
        let mut metrics = RateLimitMetrics::empty(start, end);

        let total = |kind| -> u64 {
            buckets
                .iter()
                .map(|b| self.counter(&self.keys.event_counter(kind, Granularity::Hour, *b)))
                .sum()
        };
        metrics.total_requests = total(EventKind::Request);
        metrics.blocked_requests = total(EventKind::Block);
        metrics.allowed_requests = total(EventKind::Allow);
        metrics.block_rate = ratio(metrics.blocked_requests, metrics.total_requests);

        metrics.unique_ips = self.union(buckets.iter().map(|b| self.keys.ips(*b))).len() as u64;
        metrics.unique_users =
            self.union(buckets.iter().map(|b| self.keys.users(*b))).len() as u64;

        metrics.top_violators = self.violators(&buckets, TOP_VIOLATORS);

        let requests = self.merged_fields(buckets.iter().map(|b| self.keys.endpoints(EventKind::Request, *b)));
        let blocks = self.merged_fields(buckets.iter().map(|b| self.keys.endpoints(EventKind::Block, *b)));
        let mut endpoint_stats: Vec<EndpointStat> = requests
            .iter()
            .map(|(endpoint, requests)| {
                let blocks = blocks.get(endpoint).copied().unwrap_or(0);
                EndpointStat {
                    endpoint: endpoint.clone(),
                    requests: *requests,
                    blocks,
                    block_rate: ratio(blocks, *requests),
                }
            })
            .collect();
        endpoint_stats.sort_by(|a, b| b.requests.cmp(&a.requests).then(a.endpoint.cmp(&b.endpoint)));
        metrics.endpoint_stats = endpoint_stats;

        let role_requests = self.merged_fields(buckets.iter().map(|b| self.keys.roles(EventKind::Request, *b)));
        let role_blocks = self.merged_fields(buckets.iter().map(|b| self.keys.roles(EventKind::Block, *b)));
        let mut role_stats: Vec<RoleStat> = role_requests
            .iter()
            .filter_map(|(name, requests)| {
                let role: Role = name.parse().ok()?;
                let users = self
                    .union(buckets.iter().map(|b| self.keys.role_users(role, *b)))
                    .len() as u64;
                Some(RoleStat {
                    role,
                    requests: *requests,
                    blocks: role_blocks.get(name).copied().unwrap_or(0),
                    users,
                })
            })
            .collect();
        role_stats.sort_by(|a, b| b.requests.cmp(&a.requests).then(a.role.cmp(&b.role)));
        metrics.role_stats = role_stats;

        metrics
    }

    /// Identifiers blocked most often over the last `hours` hours.
    pub fn top_violators(&self, hours: u64, limit: usize) -> Vec<ViolatorStat> {
        let end = self.clock.now_millis();
        let start = end.saturating_sub(hours.max(1) * HOUR_MS);
        self.violators(&hour_buckets(start, end), limit)
    }

    fn violators(&self, buckets: &[u64], limit: usize) -> Vec<ViolatorStat> {
        let merged = self.merged_fields(buckets.iter().map(|b| self.keys.violators(*b)));
        let mut violators: Vec<ViolatorStat> = merged
            .into_iter()
            .map(|(identifier, violations)| ViolatorStat {
                kind: ClientKind::of(&identifier),
                identifier,
                violations,
            })
            .collect();
        violators.sort_by(|a, b| {
            b.violations
                .cmp(&a.violations)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        violators.truncate(limit);
        violators
    }

    fn counter(&self, key: &str) -> u64 {
        self.store
            .call("metrics_counter", |store| store.counter(key))
            .map(|v| v.max(0) as u64)
            .unwrap_or(0)
    }

    fn union(&self, keys: impl Iterator<Item = String>) -> HashSet<String> {
        keys.flat_map(|key| {
            self.store
                .call("metrics_members", |store| store.members(&key))
                .unwrap_or_default()
        })
        .collect()
    }

    fn merged_fields(&self, keys: impl Iterator<Item = String>) -> HashMap<String, u64> {
        let mut merged = HashMap::new();
        for key in keys {
            let fields = self
                .store
                .call("metrics_fields", |store| store.fields(&key))
                .unwrap_or_default();
            for (field, value) in fields {
                *merged.entry(field).or_insert(0) += value.max(0) as u64;
            }
        }
        merged
    }

    /// Unresolved alerts, newest first.
    pub fn get_active_alerts(&self, limit: usize) -> Vec<Alert> {
        let ids = self
            .store
            .call("alert_list", |store| {
                store.window_entries(&self.keys.active_alerts(), 0, u64::MAX)
            })
            .unwrap_or_default();

        ids.iter()
            .rev()
            .filter_map(|entry| self.alert(&entry.member))
            .filter(|alert| !alert.resolved)
            .take(limit)
            .collect()
    }

    pub fn alert(&self, id: &str) -> Option<Alert> {
        self.load_alert(id).ok().flatten()
    }

    fn load_alert(&self, id: &str) -> Result<Option<Alert>, StoreError> {
        self.store.get_record("alert_read", &self.keys.alert(id))
    }

    /// Mark an alert resolved. Returns false for unknown or already
    /// resolved alerts.
    pub fn resolve_alert(&self, id: &str) -> bool {
        let Some(mut alert) = self.alert(id) else {
            return false;
        };
        if alert.resolved {
            return false;
        }
        alert.resolve(self.clock.now_millis());
        let resolved = self
            .store
            .put_record("alert_write", &self.keys.alert(id), &alert, NO_EXPIRY)
            .is_ok();
        if resolved {
            tracing::info!(alert_id = id, "alert resolved");
        }
        resolved
    }

    /// Health score from the last hour's block rate and the open alerts.
    pub fn system_health(&self) -> SystemHealth {
        let block_rate = self.get_metrics(1).block_rate;
        let alerts = self.get_active_alerts(usize::MAX);
        let critical = alerts
            .iter()
            .filter(|a| a.severity == Severity::Critical)
            .count();
        let high = alerts.iter().filter(|a| a.severity == Severity::High).count();

        let mut score: i64 = 100;
        if block_rate > 0.5 {
            score -= 30;
        } else if block_rate > 0.2 {
            score -= 15;
        } else if block_rate > 0.1 {
            score -= 5;
        }
        score -= 2 * alerts.len() as i64;
        score -= 10 * critical as i64;
        score -= 5 * high as i64;
        let score = score.clamp(0, 100) as u8;

        SystemHealth {
            status: HealthStatus::from_score(score),
            score,
            block_rate,
            active_alerts: alerts.len(),
            critical_alerts: critical,
            high_alerts: high,
        }
    }

    /// Purge hour buckets older than 25 hours, day buckets older than 8 days
    /// and resolved alerts older than 7 days.
    pub fn cleanup(&self, now_ms: u64) -> CleanupReport {
        let mut report = CleanupReport {
            hour_keys: self.purge_buckets(Granularity::Hour, now_ms.saturating_sub(HOUR_RETENTION_MS)),
            day_keys: self.purge_buckets(Granularity::Day, now_ms.saturating_sub(DAY_RETENTION_MS)),
            alerts: 0,
        };

        let index = self.keys.active_alerts();
        let entries = self
            .store
            .call("alert_list", |store| store.window_entries(&index, 0, u64::MAX))
            .unwrap_or_default();
        let alert_cutoff = now_ms.saturating_sub(ALERT_RETENTION_MS);
        for entry in entries {
            // An unreadable record is left for a later pass
            let stale = match self.load_alert(&entry.member) {
                Ok(None) => true,
                Ok(Some(alert)) => alert.resolved && alert.timestamp < alert_cutoff,
                Err(_) => false,
            };
            if !stale {
                continue;
            }
            let key = self.keys.alert(&entry.member);
            let deleted = self
                .store
                .call("alert_delete", |store| store.delete(&[key]))
                .unwrap_or(0);
            let _ = self
                .store
                .call("alert_unindex", |store| store.remove_from_window(&index, &entry.member));
            report.alerts += deleted;
        }

        tracing::debug!(
            hour_keys = report.hour_keys,
            day_keys = report.day_keys,
            alerts = report.alerts,
            "monitoring cleanup finished"
        );
        report
    }

    fn purge_buckets(&self, granularity: Granularity, cutoff: u64) -> u64 {
        let pattern = self.keys.bucket_pattern(granularity);
        let Ok(keys) = self.store.call("metrics_scan", |store| store.scan(&pattern)) else {
            return 0;
        };
        let stale: Vec<String> = keys
            .into_iter()
            .filter(|key| {
                self.keys
                    .parse_bucket(key, granularity)
                    .is_some_and(|bucket| bucket < cutoff)
            })
            .collect();
        if stale.is_empty() {
            return 0;
        }
        self.store
            .call("metrics_purge", |store| store.delete(&stale))
            .unwrap_or(0)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
