//! Integration tests for the Redis store.
//!
//! These tests require a Redis instance running at `redis://127.0.0.1/`.
//! Tests are ignored by default - run with `cargo test --features redis-storage --test redis_store -- --ignored`

#![cfg(feature = "redis-storage")]

use api_throttle::application::ports::{Store, StoreError, WindowRequest, NO_EXPIRY};
use api_throttle::infrastructure::mocks::MockClock;
use api_throttle::{
    Endpoint, EngineBuilder, LimitSpec, RedisStore, RedisStoreConfig, Settings, UserContext,
};
use std::sync::Arc;

const URL: &str = "redis://127.0.0.1/";

/// Check if Redis is available before running tests
async fn redis_available() -> bool {
    RedisStore::connect(URL).await.is_ok()
}

/// Create a test store with unique prefix, starting empty
async fn create_test_store(test_name: &str) -> RedisStore {
    let config = RedisStoreConfig {
        key_prefix: format!("test:{}:", test_name),
        ..RedisStoreConfig::default()
    };

    let store = RedisStore::connect_with_config(URL, config)
        .await
        .expect("Failed to connect to Redis");
    let keys = store.scan("*").unwrap();
    store.delete(&keys).unwrap();
    store
}

fn request(now_ms: u64, limit: u64) -> WindowRequest {
    WindowRequest {
        now_ms,
        window_ms: 60_000,
        limit,
        member: format!("{}-{}", now_ms, uuid::Uuid::new_v4()),
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires Redis
async fn test_window_script() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available at {}", URL);
        return;
    }

    let store = create_test_store("window_script").await;
    let t0 = 1_700_000_000_000;

    for i in 0..3 {
        let outcome = store.check_and_insert("w", &request(t0 + i, 3)).unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.count, i + 1);
        assert_eq!(outcome.oldest_ms, Some(t0));
    }
    let denied = store.check_and_insert("w", &request(t0 + 10, 3)).unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.count, 3);

    // The first entry leaves the window exactly one window later
    let later = store.check_and_insert("w", &request(t0 + 60_000, 3)).unwrap();
    assert!(later.allowed);
    assert_eq!(later.oldest_ms, Some(t0 + 1));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires Redis
async fn test_counters_hashes_sets_and_records() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = create_test_store("shapes").await;

    assert_eq!(store.increment("c", 2, 60_000).unwrap(), 2);
    assert_eq!(store.increment("c", 3, 60_000).unwrap(), 5);
    assert_eq!(store.counter("c").unwrap(), 5);
    assert_eq!(store.counter("missing").unwrap(), 0);

    store.increment_field("h", "GET /a", 1, 60_000).unwrap();
    store.increment_field("h", "GET /a", 1, 60_000).unwrap();
    assert_eq!(store.field("h", "GET /a").unwrap(), Some(2));
    assert_eq!(store.fields("h").unwrap().len(), 1);

    store.add_member("s", "10.0.0.1", 60_000).unwrap();
    store.add_member("s", "10.0.0.1", 60_000).unwrap();
    assert_eq!(store.members("s").unwrap(), vec!["10.0.0.1".to_string()]);

    store.put("r", b"payload", 60_000).unwrap();
    assert_eq!(store.get("r").unwrap(), Some(b"payload".to_vec()));
    store.put("p", b"kept", NO_EXPIRY).unwrap();
    store.append_to_window("p:index", 1, "a", 0, NO_EXPIRY).unwrap();
    assert_eq!(store.get("p").unwrap(), Some(b"kept".to_vec()));

    assert!(matches!(
        store.counter("s"),
        Err(StoreError::WrongType { .. })
    ));

    let mut keys = store.scan("*").unwrap();
    keys.sort();
    assert_eq!(keys, vec!["c", "h", "p", "p:index", "r", "s"]);
    assert_eq!(store.delete(&keys).unwrap(), 6);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires Redis
async fn test_append_and_remove() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = create_test_store("append").await;
    assert_eq!(store.append_to_window("v", 100, "a", 0, 60_000).unwrap(), 1);
    assert_eq!(store.append_to_window("v", 200, "b", 0, 60_000).unwrap(), 2);
    assert_eq!(store.append_to_window("v", 300, "c", 150, 60_000).unwrap(), 2);
    assert_eq!(store.count_window("v", 200).unwrap(), 1);

    let entries = store.window_entries("v", 0, u64::MAX).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].score, 200);

    assert!(store.remove_from_window("v", "b").unwrap());
    assert!(!store.remove_from_window("v", "b").unwrap());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires Redis
async fn test_two_engines_share_limits() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = Arc::new(create_test_store("shared").await);
    let clock = MockClock::default();
    let build = || {
        EngineBuilder::new()
            .with_settings(Settings {
                default_limit: Some(LimitSpec::per_minute(3).with_ip_max(3)),
                ..Settings::default()
            })
            .with_store(store.clone())
            .with_clock(Arc::new(clock.clone()))
            .build()
            .unwrap()
    };
    let first = build();
    let second = build();
    let endpoint = Endpoint::parse("GET /shared");
    let ctx = UserContext::anonymous("198.51.100.200");

    assert!(first.check(&endpoint, &ctx).is_allowed());
    assert!(second.check(&endpoint, &ctx).is_allowed());
    assert!(first.check(&endpoint, &ctx).is_allowed());
    assert!(!second.check(&endpoint, &ctx).is_allowed());
}
