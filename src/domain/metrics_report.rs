//! Aggregated monitoring reports.

use crate::domain::ban::BanRecord;
use crate::domain::settings::Role;
use serde::{Deserialize, Serialize};

/// Whether a client key names an address or a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Ip,
    User,
}

impl ClientKind {
    pub fn of(identifier: &str) -> Self {
        if identifier.starts_with("user:") {
            ClientKind::User
        } else {
            ClientKind::Ip
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolatorStat {
    pub identifier: String,
    pub violations: u64,
    pub kind: ClientKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStat {
    pub endpoint: String,
    pub requests: u64,
    pub blocks: u64,
    pub block_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleStat {
    pub role: Role,
    pub requests: u64,
    pub blocks: u64,
    /// Distinct users seen with this role
    pub users: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u64,
    pub end: u64,
    pub duration: u64,
}

/// Traffic summary over a number of past hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitMetrics {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub allowed_requests: u64,
    pub block_rate: f64,
    pub unique_ips: u64,
    pub unique_users: u64,
    /// At most ten, most violations first
    pub top_violators: Vec<ViolatorStat>,
    /// Most requested first
    pub endpoint_stats: Vec<EndpointStat>,
    pub role_stats: Vec<RoleStat>,
    pub time_range: TimeRange,
}

impl RateLimitMetrics {
    pub fn empty(start: u64, end: u64) -> Self {
        Self {
            total_requests: 0,
            blocked_requests: 0,
            allowed_requests: 0,
            block_rate: 0.0,
            unique_ips: 0,
            unique_users: 0,
            top_violators: Vec::new(),
            endpoint_stats: Vec::new(),
            role_stats: Vec::new(),
            time_range: TimeRange {
                start,
                end,
                duration: end.saturating_sub(start),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => HealthStatus::Healthy,
            70..=89 => HealthStatus::Warning,
            50..=69 => HealthStatus::Degraded,
            _ => HealthStatus::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    /// 0 to 100
    pub score: u8,
    /// Block rate over the last hour
    pub block_rate: f64,
    pub active_alerts: usize,
    pub critical_alerts: usize,
    pub high_alerts: usize,
}

/// Keys purged by one cleanup run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub hour_keys: u64,
    pub day_keys: u64,
    pub alerts: u64,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.hour_keys + self.day_keys + self.alerts
    }
}

/// Occupancy of one sliding window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStat {
    pub key: String,
    pub requests: u64,
    pub oldest: Option<u64>,
    pub newest: Option<u64>,
}

/// Everything the store holds about one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub identifier: String,
    pub windows: Vec<WindowStat>,
    /// Violations inside the rolling violation window
    pub recent_violations: u64,
    pub ban: Option<BanRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_kind() {
        assert_eq!(ClientKind::of("user:42"), ClientKind::User);
        assert_eq!(ClientKind::of("ip:10.0.0.1"), ClientKind::Ip);
    }

    #[test]
    fn test_health_thresholds() {
        assert_eq!(HealthStatus::from_score(100), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(90), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(89), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(50), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(49), HealthStatus::Critical);
    }
}
