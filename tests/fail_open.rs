//! Behavior while the shared store is failing.

use api_throttle::infrastructure::mocks::{FailingStore, MockClock};
use api_throttle::{
    CircuitBreakerConfig, CircuitState, Decision, Endpoint, Engine, EngineBuilder, LimitSpec,
    MemoryStore, Rejection, Role, Settings, UserContext,
};
use std::sync::Arc;
use std::time::Duration;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("api_throttle=debug")
        .try_init();
}

fn engine_over(clock: &MockClock, store: Arc<FailingStore>) -> Engine {
    EngineBuilder::new()
        .with_settings(Settings {
            default_limit: Some(LimitSpec::per_minute(2).with_ip_max(2)),
            ..Settings::default()
        })
        .with_clock(Arc::new(clock.clone()))
        .with_store(store)
        .with_circuit_breaker_config(CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        })
        .build()
        .unwrap()
}

fn healthy_store(clock: &MockClock) -> Arc<FailingStore> {
    let inner = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
    Arc::new(FailingStore::wrapping(inner, false))
}

#[test]
fn test_outage_admits_everything() {
    init_logging();
    let clock = MockClock::default();
    let store = healthy_store(&clock);
    let engine = engine_over(&clock, store.clone());
    let endpoint = Endpoint::parse("GET /catalog");
    let ctx = UserContext::authenticated("17", Role::User, "192.0.2.17");

    assert!(engine.check(&endpoint, &ctx).is_allowed());
    assert!(engine.check(&endpoint, &ctx).is_allowed());
    assert!(!engine.check(&endpoint, &ctx).is_allowed());

    store.set_failing(true);
    for _ in 0..25 {
        let Decision::Allowed(admission) = engine.check(&endpoint, &ctx) else {
            panic!("outage must not reject");
        };
        let result = admission.result.unwrap();
        assert!(result.ip.fail_open);
        assert!(result.user.unwrap().fail_open);
    }
    assert!(engine.metrics().fail_open() >= 25);
    assert!(engine.metrics().store_failures() > 0);
}

#[test]
fn test_open_circuit_stops_store_traffic() {
    init_logging();
    let clock = MockClock::default();
    let store = healthy_store(&clock);
    let engine = engine_over(&clock, store.clone());
    let endpoint = Endpoint::parse("GET /catalog");
    let ctx = UserContext::anonymous("192.0.2.18");

    store.set_failing(true);
    engine.check(&endpoint, &ctx);
    assert_eq!(engine.circuit_breaker().state(), CircuitState::Open);

    let calls = store.calls();
    for _ in 0..10 {
        assert!(engine.check(&endpoint, &ctx).is_allowed());
    }
    assert_eq!(store.calls(), calls);
}

#[test]
fn test_recovery_resumes_limiting() {
    init_logging();
    let clock = MockClock::default();
    let store = healthy_store(&clock);
    let engine = engine_over(&clock, store.clone());
    let endpoint = Endpoint::parse("POST /carts");
    let ctx = UserContext::anonymous("192.0.2.19");

    assert!(engine.check(&endpoint, &ctx).is_allowed());
    assert!(engine.check(&endpoint, &ctx).is_allowed());

    store.set_failing(true);
    engine.check(&endpoint, &ctx);
    assert_eq!(engine.circuit_breaker().state(), CircuitState::Open);

    store.set_failing(false);
    clock.advance(Duration::from_secs(31));

    // Both earlier requests are still inside the minute
    let decision = engine.check(&endpoint, &ctx);
    assert!(matches!(
        decision.rejection(),
        Some(Rejection::RateLimitExceeded { .. })
    ));
    assert_eq!(engine.circuit_breaker().state(), CircuitState::Closed);
}

#[test]
fn test_outage_never_bans() {
    let clock = MockClock::default();
    let store = healthy_store(&clock);
    let engine = engine_over(&clock, store.clone());
    let ctx = UserContext::anonymous("192.0.2.20");

    store.set_failing(true);
    for _ in 0..50 {
        engine.check(&Endpoint::parse("GET /x"), &ctx);
    }
    store.set_failing(false);
    clock.advance(Duration::from_secs(31));

    assert!(!engine.admin().check_ban_status("ip:192.0.2.20").is_banned);
    assert!(engine.admin().get_penalty_stats("ip:192.0.2.20").is_none());
    assert_eq!(engine.metrics().bans_imposed(), 0);
}
