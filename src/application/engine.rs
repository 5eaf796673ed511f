//! Per-request decision flow.
//!
//! The engine is the single entry point of the request path:
//!
//! 1. trusted identifiers and (optionally) super admins bypass everything
//! 2. an active ban on the address or the user rejects the request
//! 3. the resolver picks the limits, or forbids the operation outright
//! 4. the combined limiter counts the request against address and user,
//!    then the role's daily ceiling is checked
//! 5. each denied scope records a violation, which may escalate to a ban
//! 6. monitoring records the request and its outcome
//!
//! No step returns an error; store trouble degrades to allowing.

use crate::application::admin::AdminFacade;
use crate::application::bans::BanStore;
use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::combined::CombinedLimiter;
use crate::application::guarded::GuardedStore;
use crate::application::metrics::Metrics;
use crate::application::monitoring::{EventMetadata, MonitoringAggregator};
use crate::application::penalty::PenaltyEscalator;
use crate::application::ports::{Clock, Store};
use crate::application::resolver::LimitResolver;
use crate::application::scheduler::{CleanupScheduler, SchedulerConfig};
use crate::application::window::{Ticket, WindowCounter};
use crate::domain::context::UserContext;
use crate::domain::endpoint::Endpoint;
use crate::domain::keys::{EventKind, KeySpace, DAY_MS};
use crate::domain::metrics_report::CleanupReport;
use crate::domain::rejection::Rejection;
use crate::domain::result::{CombinedRateLimitResult, RateLimitConfig};
use crate::domain::settings::{Role, Settings};
use std::sync::Arc;

const DAILY_PREFIX: &str = "daily";

/// An admitted request.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    /// `None` when no limit applied to the endpoint
    pub result: Option<CombinedRateLimitResult>,
    tickets: Vec<Ticket>,
}

/// Outcome of [`Engine::check`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Counted and within limits
    Allowed(Admission),
    /// Trusted caller, nothing was counted
    Bypassed,
    Limited(Rejection),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Limited(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Decision::Limited(rejection) => Some(rejection),
            _ => None,
        }
    }
}

/// The rate limiting and penalty engine.
///
/// Cheap to clone; clones share the store, the circuit breaker and the
/// local metrics.
#[derive(Debug, Clone)]
pub struct Engine {
    settings: Arc<Settings>,
    clock: Arc<dyn Clock>,
    store: GuardedStore,
    keys: KeySpace,
    windows: WindowCounter,
    resolver: LimitResolver,
    combined: CombinedLimiter,
    penalties: PenaltyEscalator,
    monitoring: MonitoringAggregator,
}

impl Engine {
    /// Wire an engine from validated settings. Prefer
    /// [`EngineBuilder`](crate::infrastructure::builder::EngineBuilder),
    /// which validates and supplies defaults.
    pub fn new(
        settings: Settings,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let settings = Arc::new(settings);
        let keys = KeySpace::new(settings.namespace.clone());
        let store = GuardedStore::new(store, circuit_breaker, Metrics::new());

        let windows = WindowCounter::new(store.clone(), keys.clone(), settings.clone(), clock.clone());
        let bans = BanStore::new(store.clone(), keys.clone(), clock.clone());
        let penalties = PenaltyEscalator::new(
            store.clone(),
            keys.clone(),
            settings.clone(),
            clock.clone(),
            bans,
        );
        let monitoring =
            MonitoringAggregator::new(store.clone(), keys.clone(), settings.clone(), clock.clone());

        Self {
            resolver: LimitResolver::new(settings.clone()),
            combined: CombinedLimiter::new(windows.clone()),
            settings,
            clock,
            store,
            keys,
            windows,
            penalties,
            monitoring,
        }
    }

    /// Decide one request.
    pub fn check(&self, endpoint: &Endpoint, context: &UserContext) -> Decision {
        self.check_with_override(endpoint, context, None)
    }

    /// Decide one request, with a route-specific limit taking precedence
    /// over the configured tables.
    pub fn check_with_override(
        &self,
        endpoint: &Endpoint,
        context: &UserContext,
        route_override: Option<&RateLimitConfig>,
    ) -> Decision {
        let metrics = self.store.metrics();

        if self.is_trusted(context) {
            metrics.record_allowed();
            return Decision::Bypassed;
        }

        let metadata = EventMetadata::from(context);
        let ip_key = context.ip_key();
        let user_key = context.user_key();
        let subject = user_key.as_deref().unwrap_or(&ip_key);

        for key in context.client_keys() {
            if let Some(ban) = self.penalties.bans().active_ban(&key) {
                let retry_after = ban.retry_after_secs(self.clock.now_millis());
                tracing::warn!(
                    identifier = %key,
                    role = role_name(context.role),
                    endpoint = %endpoint,
                    ban_level = ban.ban_level,
                    retry_after,
                    "request from banned client rejected"
                );
                return self.reject(&key, endpoint, &metadata, Rejection::BanActive { ban, retry_after });
            }
        }

        let route_override = match route_override.map(|config| (config, config.validate())) {
            Some((config, Err(e))) => {
                tracing::error!(
                    endpoint = %endpoint,
                    window_size_ms = config.window_size_ms,
                    error = %e,
                    "route limit override rejected, using configured limits"
                );
                None
            }
            other => other.map(|(config, _)| config),
        };

        let limits = match self.resolver.resolve(endpoint, context.role, route_override) {
            Ok(Some(limits)) => limits,
            Ok(None) => {
                self.record(EventKind::Allow, subject, endpoint, &metadata);
                metrics.record_allowed();
                return Decision::Allowed(Admission {
                    result: None,
                    tickets: Vec::new(),
                });
            }
            Err(rejection) => {
                tracing::warn!(
                    identifier = subject,
                    role = role_name(context.role),
                    endpoint = %endpoint,
                    "operation forbidden for role"
                );
                return self.reject(subject, endpoint, &metadata, rejection);
            }
        };

        let (result, mut tickets) = self.combined.admit(endpoint, &limits.ip, &limits.user, context);

        if !result.combined.is_allowed {
            let mut violations = 0;
            let denied_sides = [
                (!result.ip.is_allowed).then_some(ip_key.as_str()),
                result
                    .user
                    .as_ref()
                    .filter(|user| !user.is_allowed)
                    .and(user_key.as_deref()),
            ];
            for offender in denied_sides.into_iter().flatten() {
                if let Some(outcome) = self.penalties.record_violation(offender, endpoint, context.role) {
                    violations = violations.max(outcome.record.violations);
                }
            }
            // Denied scopes inserted nothing, but an admitted one did
            for ticket in &tickets {
                self.windows.refund(ticket);
            }

            let retry_after = result.combined.retry_after.unwrap_or(1);
            let limiting_factor = result.combined.limiting_factor;
            let offender = if result.ip.is_allowed { subject } else { ip_key.as_str() };
            tracing::warn!(
                identifier = offender,
                role = role_name(context.role),
                endpoint = %endpoint,
                limiting_factor = %limiting_factor,
                violations,
                retry_after,
                "rate limit exceeded"
            );
            return self.reject(
                offender,
                endpoint,
                &metadata,
                Rejection::RateLimitExceeded {
                    retry_after,
                    limiting_factor,
                    result: Box::new(result),
                },
            );
        }

        if let Some(daily_limit) = context
            .role
            .and_then(|role| self.settings.role_limits(role))
            .and_then(|limits| limits.daily_limit)
        {
            let config = RateLimitConfig::new(DAY_MS, daily_limit).with_key_prefix(DAILY_PREFIX);
            // Daily slots are never refunded
            let (daily, _) = self.windows.run(subject, &config, daily_limit);
            if !daily.is_allowed {
                for ticket in &tickets {
                    self.windows.refund(ticket);
                }
                let violations = self
                    .penalties
                    .record_violation(subject, endpoint, context.role)
                    .map_or(0, |outcome| outcome.record.violations);

                let daily_result = if user_key.is_some() {
                    CombinedRateLimitResult::merge(result.ip, Some(daily))
                } else {
                    CombinedRateLimitResult::merge(daily, None)
                };
                let retry_after = daily_result.combined.retry_after.unwrap_or(1);
                tracing::warn!(
                    identifier = subject,
                    role = role_name(context.role),
                    endpoint = %endpoint,
                    daily_limit,
                    violations,
                    retry_after,
                    "daily limit exceeded"
                );
                return self.reject(
                    subject,
                    endpoint,
                    &metadata,
                    Rejection::RateLimitExceeded {
                        retry_after,
                        limiting_factor: daily_result.combined.limiting_factor,
                        result: Box::new(daily_result),
                    },
                );
            }
        }

        tickets.retain(|ticket| ticket.skip_successful || ticket.skip_failed);
        self.record(EventKind::Allow, subject, endpoint, &metadata);
        metrics.record_allowed();
        Decision::Allowed(Admission {
            result: Some(result),
            tickets,
        })
    }

    /// Report how an admitted request ended. Requests matching the
    /// configuration's skip rules are given back to their windows. Returns
    /// how many window entries were refunded.
    pub fn report_outcome(&self, admission: &Admission, succeeded: bool) -> usize {
        admission
            .tickets
            .iter()
            .filter(|ticket| ticket.refundable(succeeded))
            .filter(|ticket| self.windows.refund(ticket))
            .count()
    }

    fn is_trusted(&self, context: &UserContext) -> bool {
        if self.settings.bypass_super_admin && context.role == Some(Role::SuperAdmin) {
            return true;
        }
        let trusted = &self.settings.trusted_identifiers;
        if trusted.is_empty() {
            return false;
        }
        let mut candidates = vec![context.ip.clone(), context.ip_key()];
        if let (Some(id), Some(key)) = (&context.user_id, context.user_key()) {
            candidates.push(id.clone());
            candidates.push(key);
        }
        candidates.iter().any(|c| trusted.contains(c))
    }

    fn reject(
        &self,
        identifier: &str,
        endpoint: &Endpoint,
        metadata: &EventMetadata,
        rejection: Rejection,
    ) -> Decision {
        self.record(EventKind::Block, identifier, endpoint, metadata);
        self.store.metrics().record_blocked();
        Decision::Limited(rejection)
    }

    fn record(&self, kind: EventKind, identifier: &str, endpoint: &Endpoint, metadata: &EventMetadata) {
        self.monitoring
            .record_event(EventKind::Request, identifier, endpoint, metadata);
        self.monitoring.record_event(kind, identifier, endpoint, metadata);
    }

    /// Operator tooling bound to this engine's store.
    pub fn admin(&self) -> AdminFacade {
        AdminFacade::new(
            self.store.clone(),
            self.keys.clone(),
            self.clock.clone(),
            self.windows.clone(),
            self.penalties.clone(),
            self.monitoring.clone(),
        )
    }

    /// Cleanup scheduler bound to this engine's store.
    pub fn scheduler(&self, config: SchedulerConfig) -> CleanupScheduler {
        CleanupScheduler::new(self.monitoring.clone(), self.clock.clone(), config)
    }

    /// Run one monitoring cleanup pass now.
    pub fn cleanup(&self) -> CleanupReport {
        self.monitoring.cleanup(self.clock.now_millis())
    }

    pub fn window_counter(&self) -> &WindowCounter {
        &self.windows
    }

    pub fn combined_limiter(&self) -> &CombinedLimiter {
        &self.combined
    }

    pub fn resolver(&self) -> &LimitResolver {
        &self.resolver
    }

    pub fn penalties(&self) -> &PenaltyEscalator {
        &self.penalties
    }

    pub fn bans(&self) -> &BanStore {
        self.penalties.bans()
    }

    pub fn monitoring(&self) -> &MonitoringAggregator {
        &self.monitoring
    }

    pub fn metrics(&self) -> &Metrics {
        self.store.metrics()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        self.store.breaker()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

fn role_name(role: Option<Role>) -> &'static str {
    role.map(|r| r.as_str()).unwrap_or("anonymous")
}
