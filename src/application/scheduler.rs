//! Periodic cleanup of monitoring data.
//!
//! Cleanup is the only background work the engine needs. Hosts either call
//! [`CleanupScheduler::run_cleanup`] from their own timer or, with the
//! `async` feature, let [`CleanupScheduler::start`] spawn a tokio task.

use crate::application::monitoring::MonitoringAggregator;
use crate::application::ports::Clock;
use crate::domain::metrics_report::CleanupReport;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "async")]
use tokio::time::interval;

/// Error returned when scheduler configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerConfigError {
    /// Cleanup interval duration must be greater than zero
    ZeroInterval,
}

impl std::fmt::Display for SchedulerConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerConfigError::ZeroInterval => {
                write!(f, "cleanup interval must be greater than 0")
            }
        }
    }
}

impl std::error::Error for SchedulerConfigError {}

/// Configuration for periodic cleanup.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often to run cleanup
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
        }
    }
}

impl SchedulerConfig {
    /// Create a new scheduler config with the specified interval.
    ///
    /// # Errors
    /// Returns `SchedulerConfigError::ZeroInterval` if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self, SchedulerConfigError> {
        if interval.is_zero() {
            return Err(SchedulerConfigError::ZeroInterval);
        }
        Ok(Self { interval })
    }
}

/// Runs monitoring cleanup on demand or on an interval.
#[derive(Debug, Clone)]
pub struct CleanupScheduler {
    monitoring: MonitoringAggregator,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl CleanupScheduler {
    pub fn new(
        monitoring: MonitoringAggregator,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            monitoring,
            clock,
            config,
        }
    }

    /// Run one cleanup pass now.
    pub fn run_cleanup(&self) -> CleanupReport {
        self.monitoring.cleanup(self.clock.now_millis())
    }

    /// Start cleaning up periodically (async version).
    ///
    /// This spawns a background task that runs cleanup at the configured
    /// interval and hands each report to `on_report`.
    #[cfg(feature = "async")]
    pub fn start<F>(self, mut on_report: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(CleanupReport) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);

            loop {
                ticker.tick().await;
                let report = self.run_cleanup();
                if report.total() > 0 {
                    tracing::info!(
                        hour_keys = report.hour_keys,
                        day_keys = report.day_keys,
                        alerts = report.alerts,
                        "purged expired monitoring data"
                    );
                }
                on_report(report);
            }
        })
    }

    /// Get the scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::circuit_breaker::CircuitBreaker;
    use crate::application::guarded::GuardedStore;
    use crate::application::metrics::Metrics;
    use crate::application::monitoring::EventMetadata;
    use crate::domain::endpoint::Endpoint;
    use crate::domain::keys::{EventKind, KeySpace, HOUR_MS};
    use crate::domain::settings::Settings;
    use crate::infrastructure::memory_store::MemoryStore;
    use crate::infrastructure::mocks::MockClock;

    fn scheduler(clock: &MockClock, config: SchedulerConfig) -> CleanupScheduler {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let breaker = Arc::new(CircuitBreaker::new(clock.clone()));
        let monitoring = MonitoringAggregator::new(
            GuardedStore::new(store, breaker, Metrics::new()),
            KeySpace::new("test"),
            Arc::new(Settings::default()),
            clock.clone(),
        );
        monitoring.record_event(
            EventKind::Request,
            "ip:a",
            &Endpoint::parse("GET /x"),
            &EventMetadata::default(),
        );
        CleanupScheduler::new(monitoring, clock, config)
    }

    #[test]
    fn test_run_cleanup_uses_clock() {
        // Half past hour ten, so the event lands in the bucket starting at 10h
        let clock = MockClock::new(10 * HOUR_MS + 30 * 60_000);
        let scheduler = scheduler(&clock, SchedulerConfig::default());
        assert_eq!(scheduler.run_cleanup().total(), 0);

        clock.advance(Duration::from_secs(24 * 3600));
        assert_eq!(scheduler.run_cleanup().total(), 0);

        // The bucket leaves retention before its own TTL runs out
        clock.advance(Duration::from_secs(50 * 60));
        assert!(scheduler.run_cleanup().hour_keys > 0);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_async_cleanup() {
        use std::sync::Mutex;

        let clock = MockClock::default();
        let config = SchedulerConfig::new(Duration::from_millis(100)).unwrap();
        let scheduler = scheduler(&clock, config);

        let reports = Arc::new(Mutex::new(Vec::new()));
        let reports_clone = Arc::clone(&reports);
        let handle = scheduler.start(move |report| {
            reports_clone.lock().unwrap().push(report);
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.abort();

        assert!(reports.lock().unwrap().len() >= 2);
    }

    #[test]
    fn test_config_zero_interval() {
        assert!(matches!(
            SchedulerConfig::new(Duration::ZERO),
            Err(SchedulerConfigError::ZeroInterval)
        ));
        assert_eq!(
            SchedulerConfig::new(Duration::from_secs(5)).unwrap().interval,
            Duration::from_secs(5)
        );
    }
}
