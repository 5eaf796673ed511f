//! IP plus user limiting.
//!
//! Every request is counted against its source address. Authenticated
//! requests are also counted against the user, and both windows must admit
//! the request.

use crate::application::window::{Ticket, WindowCounter};
use crate::domain::context::UserContext;
use crate::domain::endpoint::Endpoint;
use crate::domain::result::{CombinedRateLimitResult, RateLimitConfig};

/// Runs the IP-scoped and user-scoped window checks for one request.
#[derive(Debug, Clone)]
pub struct CombinedLimiter {
    windows: WindowCounter,
}

impl CombinedLimiter {
    pub fn new(windows: WindowCounter) -> Self {
        Self { windows }
    }

    /// Check one request against both scopes.
    ///
    /// The IP window is `ip:<addr>:<endpoint>` and always runs; the user
    /// window `user:<id>:<endpoint>` runs only for authenticated callers
    /// with an id. The role multiplier applies to both scopes.
    pub fn check_combined(
        &self,
        endpoint: &Endpoint,
        ip_config: &RateLimitConfig,
        user_config: &RateLimitConfig,
        context: &UserContext,
    ) -> CombinedRateLimitResult {
        self.admit(endpoint, ip_config, user_config, context).0
    }

    pub(crate) fn admit(
        &self,
        endpoint: &Endpoint,
        ip_config: &RateLimitConfig,
        user_config: &RateLimitConfig,
        context: &UserContext,
    ) -> (CombinedRateLimitResult, Vec<Ticket>) {
        let mut tickets = Vec::with_capacity(2);

        let ip_key = context.ip_key();
        let (ip, ticket) = self.windows.admit(
            &format!("{}:{}", ip_key, endpoint),
            &ip_key,
            ip_config,
            context.role,
        );
        tickets.extend(ticket);

        let user = context.user_key().map(|user_key| {
            let (result, ticket) = self.windows.admit(
                &format!("{}:{}", user_key, endpoint),
                &user_key,
                user_config,
                context.role,
            );
            tickets.extend(ticket);
            result
        });

        (CombinedRateLimitResult::merge(ip, user), tickets)
    }
}
