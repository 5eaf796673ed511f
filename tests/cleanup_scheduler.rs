//! Background cleanup driven by a tokio interval.

#![cfg(feature = "async")]

use api_throttle::infrastructure::mocks::MockClock;
use api_throttle::{Endpoint, EngineBuilder, SchedulerConfig, Settings, UserContext};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn test_scheduler_purges_expired_buckets() {
    let clock = MockClock::default();
    let engine = EngineBuilder::new()
        .with_settings(Settings::default())
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    engine.check(&Endpoint::parse("GET /a"), &UserContext::anonymous("10.0.0.1"));

    // Past the 25 hour retention, before the bucket's own TTL runs out
    clock.advance(Duration::from_secs(25 * 3600 - 400));

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let scheduler = engine.scheduler(SchedulerConfig::new(Duration::from_millis(50)).unwrap());
    let handle = scheduler.start(move |report| sink.lock().unwrap().push(report));

    tokio::time::sleep(Duration::from_millis(180)).await;
    handle.abort();

    let reports = reports.lock().unwrap();
    assert!(reports.len() >= 2);
    assert!(reports[0].hour_keys > 0);
    // Later passes find nothing left
    assert_eq!(reports[1].total(), 0);
}
