//! Limit resolution.
//!
//! Turns an endpoint and a caller role into the window configurations of
//! the IP and user checks. Precedence, most specific first:
//!
//! 1. a per-route override supplied by the caller
//! 2. the role by operation class table
//! 3. an exact endpoint entry (`POST /orders` or `/orders`)
//! 4. the longest matching prefix entry (`/auth/*`)
//! 5. the default limit

use crate::domain::endpoint::Endpoint;
use crate::domain::rejection::Rejection;
use crate::domain::result::RateLimitConfig;
use crate::domain::settings::{LimitSpec, Role, Settings};
use std::sync::Arc;

/// Where a resolved limit came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitSource {
    Override,
    Operation,
    /// Endpoint table entry, exact or prefix
    Endpoint(String),
    Default,
}

/// Window configurations of both scopes of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLimits {
    pub ip: RateLimitConfig,
    pub user: RateLimitConfig,
    pub source: LimitSource,
}

impl ResolvedLimits {
    /// Derive the IP configuration from the user one: an explicit
    /// `ip_max_requests` wins, else `ip_ratio` of the user allotment, at
    /// least 1.
    pub fn from_user_config(user: RateLimitConfig, ip_ratio: f64, source: LimitSource) -> Self {
        let ip_max = user.ip_max_requests.unwrap_or_else(|| {
            ((user.max_requests as f64 * ip_ratio).floor() as u64).max(1)
        });
        let ip = RateLimitConfig {
            max_requests: ip_max,
            ..user.clone()
        };
        Self { ip, user, source }
    }
}

#[derive(Debug, Clone)]
pub struct LimitResolver {
    settings: Arc<Settings>,
}

impl LimitResolver {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Resolve the limits for one request.
    ///
    /// Returns `Ok(None)` when nothing applies (no matching entry and the
    /// default limit is disabled); such requests are allowed.
    ///
    /// # Errors
    /// [`Rejection::ForbiddenOperation`] when the role's allotment for the
    /// endpoint's operation class is zero.
    pub fn resolve(
        &self,
        endpoint: &Endpoint,
        role: Option<Role>,
        route_override: Option<&RateLimitConfig>,
    ) -> Result<Option<ResolvedLimits>, Rejection> {
        let ratio = self.settings.ip_ratio;

        if let Some(config) = route_override {
            return Ok(Some(ResolvedLimits::from_user_config(
                config.clone(),
                ratio,
                LimitSource::Override,
            )));
        }

        if let Some(role) = role {
            let operation = endpoint.operation();
            if let Some(spec) = self
                .settings
                .operation_limits
                .get(&role)
                .and_then(|classes| classes.get(&operation))
            {
                if spec.max_requests == 0 {
                    return Err(Rejection::ForbiddenOperation { role, operation });
                }
                return Ok(Some(self.resolved(spec, LimitSource::Operation)));
            }
        }

        if let Some((name, spec)) = self.endpoint_entry(endpoint) {
            return Ok(Some(self.resolved(spec, LimitSource::Endpoint(name.to_string()))));
        }

        Ok(self
            .settings
            .default_limit
            .as_ref()
            .map(|spec| self.resolved(spec, LimitSource::Default)))
    }

    fn resolved(&self, spec: &LimitSpec, source: LimitSource) -> ResolvedLimits {
        ResolvedLimits::from_user_config(
            RateLimitConfig::from_spec(spec),
            self.settings.ip_ratio,
            source,
        )
    }

    /// Exact entry first, then the longest prefix entry.
    fn endpoint_entry(&self, endpoint: &Endpoint) -> Option<(&str, &LimitSpec)> {
        let full = endpoint.to_string();
        let path = endpoint.path();

        for key in [full.as_str(), path] {
            if let Some((name, spec)) = self.settings.endpoints.get_key_value(key) {
                return Some((name.as_str(), spec));
            }
        }

        self.settings
            .endpoints
            .iter()
            .filter_map(|(name, spec)| {
                let prefix = name.strip_suffix('*')?;
                let subject = if prefix.contains(' ') { &full } else { path };
                subject
                    .starts_with(prefix)
                    .then_some((name.as_str(), spec, prefix.len()))
            })
            .max_by_key(|(_, _, len)| *len)
            .map(|(name, spec, _)| (name, spec))
    }
}
