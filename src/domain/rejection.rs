//! Reasons a request is turned away.

use crate::domain::ban::BanRecord;
use crate::domain::result::{CombinedRateLimitResult, LimitingFactor};
use crate::domain::settings::{OperationClass, Role};
use std::fmt;

/// Why the engine denied a request.
///
/// Returned as a value inside the decision; the request path never fails
/// with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A sliding window or the daily ceiling is full
    RateLimitExceeded {
        /// Seconds until a slot frees, at least 1
        retry_after: u64,
        limiting_factor: LimitingFactor,
        result: Box<CombinedRateLimitResult>,
    },
    /// The caller is serving a ban
    BanActive {
        ban: BanRecord,
        retry_after: u64,
    },
    /// The caller's role has no allotment for this operation class.
    /// Retrying will not help.
    ForbiddenOperation {
        role: Role,
        operation: OperationClass,
    },
}

impl Rejection {
    /// Seconds the caller should wait, `None` when waiting will not help.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Rejection::RateLimitExceeded { retry_after, .. }
            | Rejection::BanActive { retry_after, .. } => Some(*retry_after),
            Rejection::ForbiddenOperation { .. } => None,
        }
    }

    /// HTTP status a pipeline would answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Rejection::RateLimitExceeded { .. } | Rejection::BanActive { .. } => 429,
            Rejection::ForbiddenOperation { .. } => 403,
        }
    }

    /// Standard rate limit response headers.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Rejection::RateLimitExceeded { result, .. } = self {
            let limit = result
                .user
                .as_ref()
                .map_or(result.ip.limit, |u| u.limit.min(result.ip.limit));
            headers.push(("X-RateLimit-Limit", limit.to_string()));
            headers.push(("X-RateLimit-Remaining", "0".to_string()));
            headers.push((
                "X-RateLimit-Reset",
                result.combined.reset_time.div_ceil(1000).to_string(),
            ));
        }
        if let Some(retry_after) = self.retry_after() {
            headers.push(("Retry-After", retry_after.to_string()));
        }
        headers
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::RateLimitExceeded {
                retry_after,
                limiting_factor,
                ..
            } => write!(
                f,
                "rate limit exceeded ({} limit), retry after {}s",
                limiting_factor, retry_after
            ),
            Rejection::BanActive { ban, retry_after } => write!(
                f,
                "temporarily banned: {}, retry after {}s",
                ban.reason, retry_after
            ),
            Rejection::ForbiddenOperation { role, operation } => {
                write!(f, "role '{}' may not perform {} operations", role, operation)
            }
        }
    }
}

impl std::error::Error for Rejection {}
