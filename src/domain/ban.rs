//! Ban records.

use serde::{Deserialize, Serialize};

/// Who imposed a ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanSource {
    /// Escalation after repeated violations
    Penalty,
    /// Explicit operator action
    Admin,
}

/// An imposed ban. At most one exists per client key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub identifier: String,
    pub reason: String,
    pub start_time: u64,
    pub end_time: u64,
    /// Violations counted when the ban was imposed
    pub violations: u32,
    pub ban_level: u32,
    pub is_active: bool,
    pub can_appeal: bool,
    pub source: BanSource,
}

impl BanRecord {
    /// Whether the ban still applies at `now_ms`.
    pub fn is_active_at(&self, now_ms: u64) -> bool {
        self.is_active && now_ms < self.end_time
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }

    /// Whole seconds until the ban lifts, at least 1 while active.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.end_time.saturating_sub(now_ms).div_ceil(1000).max(1)
    }
}

/// Answer of a ban lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanStatus {
    pub is_banned: bool,
    pub ban: Option<BanRecord>,
}

impl BanStatus {
    pub fn not_banned() -> Self {
        Self {
            is_banned: false,
            ban: None,
        }
    }

    pub fn banned(ban: BanRecord) -> Self {
        Self {
            is_banned: true,
            ban: Some(ban),
        }
    }
}
