//! End-to-end checks of the core limiting guarantees against the
//! in-process store and a mock clock.

use api_throttle::application::monitoring::EventMetadata;
use api_throttle::application::ports::Store;
use api_throttle::domain::keys::{EventKind, HOUR_MS};
use api_throttle::domain::penalty::{analyze, penalty_level, RiskLevel, ViolationRecord};
use api_throttle::domain::settings::default_penalty_tiers;
use api_throttle::infrastructure::mocks::{FailingStore, MockClock};
use api_throttle::{
    Engine, EngineBuilder, LimitSpec, LimitingFactor, MemoryStore, RateLimitConfig, Role,
    Settings, UserContext,
};
use api_throttle::{Endpoint, Rejection};
use std::sync::Arc;
use std::time::Duration;

fn engine_at(clock: &MockClock, settings: Settings) -> (Engine, Arc<MemoryStore>) {
    let clock: Arc<MockClock> = Arc::new(clock.clone());
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let engine = EngineBuilder::new()
        .with_settings(settings)
        .with_clock(clock)
        .with_store(store.clone())
        .build()
        .unwrap();
    (engine, store)
}

#[test]
fn test_scenario_a_hundred_then_denied() {
    let clock = MockClock::default();
    let (engine, _) = engine_at(&clock, Settings::default());
    let config = RateLimitConfig::new(60_000, 100);
    let windows = engine.window_counter();

    for i in 0..100 {
        let result = windows.check("ip:198.51.100.1:GET /items", &config, None);
        assert!(result.is_allowed, "request {} should be allowed", i + 1);
        assert_eq!(result.remaining_requests, 99 - i);
        clock.advance_ms(10);
    }

    let denied = windows.check("ip:198.51.100.1:GET /items", &config, None);
    assert!(!denied.is_allowed);
    assert_eq!(denied.remaining_requests, 0);
    assert!(denied.retry_after.unwrap() > 0);
}

#[test]
fn test_window_slides() {
    let clock = MockClock::default();
    let (engine, _) = engine_at(&clock, Settings::default());
    let config = RateLimitConfig::new(60_000, 3);
    let windows = engine.window_counter();

    for _ in 0..3 {
        assert!(windows.check("user:7", &config, None).is_allowed);
        clock.advance(Duration::from_secs(10));
    }
    let denied = windows.check("user:7", &config, None);
    assert!(!denied.is_allowed);
    // Oldest entry is 30s old, so it leaves the window in 30s
    assert_eq!(denied.retry_after, Some(30));

    clock.advance(Duration::from_secs(30));
    assert!(windows.check("user:7", &config, None).is_allowed);
    assert!(!windows.check("user:7", &config, None).is_allowed);
}

#[test]
fn test_admitted_never_exceeds_limit() {
    let clock = MockClock::default();
    let (engine, _) = engine_at(&clock, Settings::default());
    let config = RateLimitConfig::new(60_000, 25);

    let admitted = (0..200)
        .filter(|_| {
            clock.advance_ms(100);
            engine.window_counter().check("ip:10.1.1.1", &config, None).is_allowed
        })
        .count();
    assert_eq!(admitted, 25);
}

#[test]
fn test_concurrent_checks_respect_limit() {
    let clock = MockClock::default();
    let (engine, _) = engine_at(&clock, Settings::default());
    let config = RateLimitConfig::new(60_000, 50);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let config = config.clone();
            std::thread::spawn(move || {
                (0..20)
                    .filter(|_| engine.window_counter().check("ip:shared", &config, None).is_allowed)
                    .count()
            })
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 50);
}

#[test]
fn test_role_scaling() {
    let clock = MockClock::default();
    let (engine, _) = engine_at(&clock, Settings::default());
    let config = RateLimitConfig::new(60_000, 100);
    let windows = engine.window_counter();

    assert_eq!(windows.check("user:a", &config, Some(Role::Admin)).limit, 500);
    assert_eq!(windows.check("user:b", &config, Some(Role::Viewer)).limit, 50);
    assert_eq!(windows.check("user:c", &config, Some(Role::Operator)).limit, 150);
    assert_eq!(windows.check("user:d", &config, None).limit, 100);
}

#[test]
fn test_combined_limiting_factors() {
    let clock = MockClock::default();
    let (engine, _) = engine_at(&clock, Settings::default());
    let limiter = engine.combined_limiter();
    let endpoint = Endpoint::parse("GET /reports");
    let ctx = UserContext::authenticated("9", Role::User, "192.0.2.1");

    let ip_tight = RateLimitConfig::new(60_000, 1);
    let user_loose = RateLimitConfig::new(60_000, 10);
    assert!(limiter.check_combined(&endpoint, &ip_tight, &user_loose, &ctx).combined.is_allowed);

    // IP denies, user allows
    let result = limiter.check_combined(&endpoint, &ip_tight, &user_loose, &ctx);
    assert!(!result.combined.is_allowed);
    assert!(result.user.as_ref().unwrap().is_allowed);
    assert_eq!(result.combined.limiting_factor, LimitingFactor::Ip);

    // Both deny
    let user_tight = RateLimitConfig::new(60_000, 2);
    let result = limiter.check_combined(&endpoint, &ip_tight, &user_tight, &ctx);
    assert!(!result.combined.is_allowed);
    assert_eq!(result.combined.limiting_factor, LimitingFactor::Both);

    // Anonymous callers only get the IP check
    let anon = UserContext::anonymous("192.0.2.2");
    let result = limiter.check_combined(&endpoint, &ip_tight, &user_tight, &anon);
    assert!(result.user.is_none());
    assert!(result.combined.is_allowed);
}

#[test]
fn test_scenario_b_violations_halve_limit() {
    let clock = MockClock::default();
    let (engine, _) = engine_at(&clock, Settings::default());
    let endpoint = Endpoint::parse("GET /search");

    for _ in 0..15 {
        engine.penalties().record_violation("ip:203.0.113.50", &endpoint, None);
        clock.advance(Duration::from_secs(60));
    }

    let windows = engine.window_counter();
    assert_eq!(windows.penalty_multiplier("ip:203.0.113.50"), 2);
    let config = RateLimitConfig::new(60_000, 100);
    assert_eq!(windows.effective_limit(&config, None, "ip:203.0.113.50"), 50);
    assert_eq!(
        windows
            .check_with_offender("ip:203.0.113.50:GET /search", "ip:203.0.113.50", &config, None)
            .limit,
        50
    );

    // Violations older than the rolling hour stop counting
    clock.advance(Duration::from_secs(2 * 3600));
    assert_eq!(windows.penalty_multiplier("ip:203.0.113.50"), 1);
}

#[test]
fn test_penalty_level_monotonic_in_violations() {
    let tiers = default_penalty_tiers();
    let risks = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High, RiskLevel::Critical];

    for risk in risks {
        let mut previous = 0;
        for violations in 0..=300 {
            let level = penalty_level(&tiers, violations, risk);
            assert!(level >= previous, "level dropped at {} violations", violations);
            previous = level;
        }
    }

    // Same monotonicity once risk is derived from the record itself
    let mut previous = 0;
    for violations in 1..=300u32 {
        let mut record = ViolationRecord::new("ip:x", 0);
        record.violations = violations;
        record.last_violation = HOUR_MS;
        let rate = violations as f64;
        let level = penalty_level(&tiers, violations, analyze(&record, rate).risk_level);
        assert!(level >= previous);
        previous = level;
    }
}

#[test]
fn test_scenario_c_ban_expires_and_is_purged() {
    let clock = MockClock::default();
    let (engine, store) = engine_at(&clock, Settings::default());
    let admin = engine.admin();

    let ban = admin
        .impose_ban("ip:198.51.100.23", 5 * 60_000, "credential stuffing")
        .unwrap();
    assert_eq!(ban.ban_level, 1);
    assert!(ban.can_appeal);

    clock.advance(Duration::from_secs(4 * 60));
    let status = admin.check_ban_status("ip:198.51.100.23");
    assert!(status.is_banned);
    assert_eq!(status.ban.unwrap().reason, "credential stuffing");

    clock.advance(Duration::from_secs(2 * 60));
    assert!(!admin.check_ban_status("ip:198.51.100.23").is_banned);
    let key = format!("{}:penalty:ban:ip:198.51.100.23", engine.settings().namespace);
    assert_eq!(store.get(&key).unwrap(), None);
}

#[test]
fn test_scenario_d_metrics_across_buckets() {
    // Twenty minutes into an hour
    let clock = MockClock::new(400_000 * HOUR_MS + 20 * 60_000);
    let (engine, _) = engine_at(&clock, Settings::default());
    let monitoring = engine.monitoring();
    let endpoint = Endpoint::parse("GET /catalog");
    let meta = EventMetadata::default();

    let record = |requests: usize, blocks: usize| {
        for i in 0..requests {
            monitoring.record_event(EventKind::Request, &format!("ip:10.0.0.{}", i % 7), &endpoint, &meta);
        }
        for i in 0..blocks {
            monitoring.record_event(EventKind::Block, &format!("ip:10.0.0.{}", i % 7), &endpoint, &meta);
        }
    };

    record(50, 5);
    clock.advance(Duration::from_secs(3600));
    record(70, 10);

    let metrics = engine.admin().get_metrics(2);
    assert_eq!(metrics.total_requests, 120);
    assert_eq!(metrics.blocked_requests, 15);
    assert!((metrics.block_rate - 0.125).abs() < f64::EPSILON);
    assert_eq!(metrics.endpoint_stats[0].endpoint, "GET /catalog");
    assert_eq!(metrics.endpoint_stats[0].requests, 120);
    assert_eq!(metrics.top_violators.iter().map(|v| v.violations).sum::<u64>(), 15);
}

#[test]
fn test_scenario_e_store_error_fails_open() {
    let clock = MockClock::default();
    let engine = EngineBuilder::new()
        .with_settings(Settings {
            default_limit: Some(LimitSpec::per_minute(1)),
            ..Settings::default()
        })
        .with_clock(Arc::new(clock.clone()))
        .with_store(Arc::new(FailingStore::new()))
        .build()
        .unwrap();

    let config = RateLimitConfig::new(60_000, 1);
    for _ in 0..10 {
        let result = engine.window_counter().check("ip:192.0.2.9", &config, None);
        assert!(result.is_allowed);
        assert!(result.fail_open);
        assert_eq!(result.remaining_requests, 0);
    }

    let decision = engine.check(&Endpoint::parse("GET /x"), &UserContext::anonymous("192.0.2.9"));
    assert!(decision.is_allowed());
    assert!(engine.metrics().fail_open() > 0);
}

#[test]
fn test_denial_headers() {
    let clock = MockClock::default();
    let (engine, _) = engine_at(
        &clock,
        Settings {
            default_limit: Some(LimitSpec::per_minute(2).with_ip_max(2)),
            ..Settings::default()
        },
    );
    let endpoint = Endpoint::parse("POST /orders");
    let ctx = UserContext::anonymous("192.0.2.44");

    engine.check(&endpoint, &ctx);
    engine.check(&endpoint, &ctx);
    let decision = engine.check(&endpoint, &ctx);
    let rejection = decision.rejection().unwrap();
    assert!(matches!(rejection, Rejection::RateLimitExceeded { .. }));
    assert_eq!(rejection.status_code(), 429);

    let headers = rejection.headers();
    let header = |name: &str| {
        headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
            .unwrap()
    };
    assert_eq!(header("X-RateLimit-Limit"), "2");
    assert_eq!(header("X-RateLimit-Remaining"), "0");
    assert_eq!(header("Retry-After"), "60");
}
