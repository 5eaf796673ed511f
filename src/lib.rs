//! # api-throttle
//!
//! Distributed sliding-window rate limiting for HTTP APIs, with progressive
//! penalties, bans and abuse monitoring.
//!
//! Every request is counted against two independent windows, one for the
//! client address and one for the authenticated user, both kept in a shared
//! store so that any number of stateless instances enforce the same limits.
//! Clients that keep hitting their limits accumulate violations, which
//! shrink their allotment and escalate to temporary bans. Monitoring
//! counters and alerts give operators a view of who is being limited and
//! why.
//!
//! ## Quick Start
//!
//! ```rust
//! use api_throttle::{Decision, Endpoint, EngineBuilder, Role, Settings, UserContext};
//!
//! let engine = EngineBuilder::new()
//!     .with_settings(Settings::default())
//!     .build()
//!     .unwrap();
//!
//! let ctx = UserContext::authenticated("42", Role::User, "203.0.113.7");
//! match engine.check(&Endpoint::parse("POST /orders"), &ctx) {
//!     Decision::Allowed(_) | Decision::Bypassed => { /* serve the request */ }
//!     Decision::Limited(rejection) => {
//!         let status = rejection.status_code();
//!         let headers = rejection.headers();
//!         # let _ = (status, headers);
//!     }
//! }
//! ```
//!
//! ## Configuration
//!
//! [`Settings`] deserialize from JSON; omitted fields keep their defaults.
//!
//! ```rust
//! use api_throttle::Settings;
//!
//! let settings = Settings::from_json(r#"{
//!     "namespace": "shop",
//!     "default_limit": { "window_size_ms": 60000, "max_requests": 120 },
//!     "endpoints": {
//!         "/auth/login": { "window_size_ms": 900000, "max_requests": 5 },
//!         "/search/*": { "window_size_ms": 60000, "max_requests": 30 }
//!     }
//! }"#).unwrap();
//! assert_eq!(settings.namespace, "shop");
//! ```
//!
//! Limits are resolved in order: a route override passed to
//! [`Engine::check_with_override`], the role by operation table, an exact
//! endpoint entry, the longest matching `*` prefix entry, then the default.
//! The role multiplier and any penalty divisor apply to whichever matched.
//!
//! ## Penalties and Bans
//!
//! Each denied scope records a violation. Within the violation window the
//! count divides the client's allotment (by 2 from 10 violations up to 16
//! from 100) and crossing a tier threshold imposes a ban, from five minutes
//! at 5 violations to thirty days at 200. A penalty ban never replaces an
//! active one of the same or a higher level.
//!
//! ## Storage
//!
//! The default [`MemoryStore`] keeps state in process. Enable the
//! `redis-storage` feature for [`RedisStore`], which runs the window check
//! as one Lua script.
//!
//! ## Fail-Safe Operation
//!
//! Store access goes through a circuit breaker. Any store failure admits
//! the request with a `fail_open` result rather than rejecting traffic:
//!
//! ```rust,no_run
//! # use api_throttle::{CircuitState, EngineBuilder};
//! # let engine = EngineBuilder::new().build().unwrap();
//! match engine.circuit_breaker().state() {
//!     CircuitState::Closed => println!("Normal operation"),
//!     CircuitState::Open => println!("Failing open - allowing all requests"),
//!     CircuitState::HalfOpen => println!("Testing recovery"),
//! }
//! ```
//!
//! ## Observability
//!
//! Decisions are logged through `tracing` with structured fields
//! (`identifier`, `role`, `endpoint`, `limiting_factor`, `violations`).
//! Local counters are available from [`Engine::metrics`], shared ones from
//! [`AdminFacade::get_metrics`].

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    alert::{Alert, AlertType},
    ban::{BanRecord, BanSource, BanStatus},
    context::UserContext,
    endpoint::Endpoint,
    metrics_report::{CleanupReport, RateLimitMetrics, RateLimitStats, SystemHealth},
    penalty::{Severity, ViolationRecord},
    rejection::Rejection,
    result::{CombinedRateLimitResult, LimitingFactor, RateLimitConfig, RateLimitResult},
    settings::{LimitSpec, OperationClass, Role, RoleLimits, Settings, SettingsError},
};

pub use application::{
    admin::AdminFacade,
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    engine::{Admission, Decision, Engine},
    metrics::{Metrics, MetricsSnapshot},
    ports::{Clock, Store, StoreError},
    resolver::{LimitSource, ResolvedLimits},
    scheduler::{CleanupScheduler, SchedulerConfig, SchedulerConfigError},
};

pub use infrastructure::{
    builder::{BuildError, EngineBuilder},
    clock::SystemClock,
    memory_store::MemoryStore,
};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{RedisStore, RedisStoreConfig};
