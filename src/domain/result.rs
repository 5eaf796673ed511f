//! Window configurations and check results.

use crate::domain::settings::{LimitSpec, SettingsError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fully resolved configuration of one window check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_size_ms: u64,
    /// Allotment before role and penalty scaling
    pub max_requests: u64,
    pub ip_max_requests: Option<u64>,
    /// Key segment separating independent window families
    pub key_prefix: String,
    /// Refund admitted requests whose handler succeeded
    pub skip_successful: bool,
    /// Refund admitted requests whose handler failed
    pub skip_failed: bool,
}

impl RateLimitConfig {
    pub fn new(window_size_ms: u64, max_requests: u64) -> Self {
        Self {
            window_size_ms,
            max_requests,
            ip_max_requests: None,
            key_prefix: "rl".to_string(),
            skip_successful: false,
            skip_failed: false,
        }
    }

    pub fn from_spec(spec: &LimitSpec) -> Self {
        Self {
            ip_max_requests: spec.ip_max_requests,
            ..Self::new(spec.window_size_ms, spec.max_requests)
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_skips(mut self, skip_successful: bool, skip_failed: bool) -> Self {
        self.skip_successful = skip_successful;
        self.skip_failed = skip_failed;
        self
    }

    /// A window of zero length can never hold a request.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.window_size_ms == 0 {
            return Err(SettingsError::ZeroWindow(self.key_prefix.clone()));
        }
        Ok(())
    }
}

/// Outcome of a single window check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub is_allowed: bool,
    pub remaining_requests: u64,
    /// Epoch milliseconds at which the window frees a slot
    pub reset_time: u64,
    /// Seconds to wait, set only on denial
    pub retry_after: Option<u64>,
    pub total_requests: u64,
    pub window_start_time: u64,
    /// Effective limit the check ran against
    pub limit: u64,
    /// Produced without consulting the store
    pub fail_open: bool,
}

impl RateLimitResult {
    /// Permissive result used when the store cannot be consulted.
    pub fn fail_open(limit: u64, window_size_ms: u64, now_ms: u64) -> Self {
        Self {
            is_allowed: true,
            remaining_requests: limit.saturating_sub(1),
            reset_time: now_ms + window_size_ms,
            retry_after: None,
            total_requests: 1,
            window_start_time: now_ms.saturating_sub(window_size_ms),
            limit,
            fail_open: true,
        }
    }
}

/// Which scope caused a combined denial.
///
/// `Both` is also reported when both checks pass, so the factor is only
/// meaningful alongside `is_allowed == false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitingFactor {
    Ip,
    User,
    Both,
}

impl fmt::Display for LimitingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitingFactor::Ip => f.write_str("ip"),
            LimitingFactor::User => f.write_str("user"),
            LimitingFactor::Both => f.write_str("both"),
        }
    }
}

/// Merged view of the IP and user checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedOutcome {
    pub is_allowed: bool,
    pub remaining_requests: u64,
    pub reset_time: u64,
    pub retry_after: Option<u64>,
    pub total_requests: u64,
    pub window_start_time: u64,
    pub limiting_factor: LimitingFactor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedRateLimitResult {
    pub ip: RateLimitResult,
    pub user: Option<RateLimitResult>,
    pub combined: CombinedOutcome,
}

impl CombinedRateLimitResult {
    /// Merge the two scopes: both must allow, the tighter budget wins.
    pub fn merge(ip: RateLimitResult, user: Option<RateLimitResult>) -> Self {
        let user_allowed = user.as_ref().map(|u| u.is_allowed);

        let limiting_factor = match (ip.is_allowed, user_allowed) {
            (false, Some(true)) | (false, None) => LimitingFactor::Ip,
            (true, Some(false)) => LimitingFactor::User,
            _ => LimitingFactor::Both,
        };

        let retry_after = ip
            .retry_after
            .unwrap_or(0)
            .max(user.as_ref().and_then(|u| u.retry_after).unwrap_or(0));

        let combined = CombinedOutcome {
            is_allowed: ip.is_allowed && user_allowed.unwrap_or(true),
            remaining_requests: user
                .as_ref()
                .map_or(ip.remaining_requests, |u| {
                    ip.remaining_requests.min(u.remaining_requests)
                }),
            reset_time: user
                .as_ref()
                .map_or(ip.reset_time, |u| ip.reset_time.max(u.reset_time)),
            retry_after: (retry_after > 0).then_some(retry_after),
            total_requests: user
                .as_ref()
                .map_or(ip.total_requests, |u| ip.total_requests.max(u.total_requests)),
            window_start_time: user.as_ref().map_or(ip.window_start_time, |u| {
                ip.window_start_time.min(u.window_start_time)
            }),
            limiting_factor,
        };

        Self { ip, user, combined }
    }
}
