//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly, enabling deterministic
/// testing of window expiry, ban expiry and metric bucket rollover.
///
/// # Examples
///
/// ```
/// use api_throttle::infrastructure::mocks::MockClock;
/// use api_throttle::application::ports::Clock;
/// use std::time::Duration;
///
/// let clock = MockClock::new(1_700_000_000_000);
/// assert_eq!(clock.now_millis(), 1_700_000_000_000);
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now_millis(), 1_700_000_010_000);
///
/// clock.set(1_800_000_000_000);
/// assert_eq!(clock.now_millis(), 1_800_000_000_000);
/// ```
///
/// # Thread Safety
///
/// All clones share the same underlying time value, so advancing time in
/// one clone affects all clones.
///
/// ```
/// use api_throttle::infrastructure::mocks::MockClock;
/// use api_throttle::application::ports::Clock;
/// use std::time::Duration;
/// use std::thread;
///
/// let clock = MockClock::new(0);
/// let clock_clone = clock.clone();
///
/// let handle = thread::spawn(move || {
///     clock_clone.advance(Duration::from_secs(5));
/// });
///
/// handle.join().unwrap();
/// assert_eq!(clock.now_millis(), 5_000);
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    current_ms: Arc<Mutex<u64>>,
}

impl MockClock {
    /// Create a mock clock starting at the given epoch milliseconds.
    pub fn new(start_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(Mutex::new(start_ms)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut time = self
            .current_ms
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        *time += duration.as_millis() as u64;
    }

    /// Advance the clock by a number of milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Set the clock to specific epoch milliseconds.
    pub fn set(&self, ms: u64) {
        let mut time = self
            .current_ms
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        *time = ms;
    }
}

impl Default for MockClock {
    /// Starts at 2023-11-14T22:13:20Z so hour and day buckets are realistic.
    fn default() -> Self {
        Self::new(1_700_000_000_000)
    }
}

impl Clock for MockClock {
    fn now_millis(&self) -> u64 {
        *self
            .current_ms
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock() {
        let clock = MockClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);

        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now_millis(), 11_000);

        clock.advance_ms(5);
        assert_eq!(clock.now_millis(), 11_005);

        clock.set(100);
        assert_eq!(clock.now_millis(), 100);
    }

    #[test]
    fn test_shared_through_arc() {
        let clock = Arc::new(MockClock::default());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        clock.advance_ms(42);
        assert_eq!(dyn_clock.now_millis(), 1_700_000_000_042);
    }
}
