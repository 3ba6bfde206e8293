//! Clock capability
//!
//! Everything in Orbit that waits or compares against "now" goes through a
//! [`Clock`]. Production code uses [`SystemClock`]; tests use [`MockClock`],
//! whose sleeps return immediately and simply move its notion of time forward.

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of current time and blocking delay
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time
    fn now(&self) -> SystemTime;

    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// Real wall clock backed by `SystemTime::now` and `thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug)]
struct MockClockState {
    now: SystemTime,
    sleeps: Vec<Duration>,
}

/// Instantaneous clock for deterministic tests
///
/// `sleep` advances the clock by the requested amount and records it, so a
/// test can assert on the exact backoff sequence without waiting.
#[derive(Debug)]
pub struct MockClock {
    state: Mutex<MockClockState>,
}

impl MockClock {
    /// Create a clock starting at a fixed instant (2020-01-01T00:00:00Z)
    pub fn new() -> Self {
        Self::starting_at(UNIX_EPOCH + Duration::from_secs(1_577_836_800))
    }

    /// Create a clock starting at `start`
    pub fn starting_at(start: SystemTime) -> Self {
        Self {
            state: Mutex::new(MockClockState {
                now: start,
                sleeps: Vec::new(),
            }),
        }
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state();
        state.now += duration;
    }

    /// All delays requested through `sleep`, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state().sleeps.clone()
    }

    /// Total time spent in `sleep`
    pub fn total_slept(&self) -> Duration {
        self.state().sleeps.iter().sum()
    }

    // Poisoning is ignored: every update leaves the state consistent
    fn state(&self) -> MutexGuard<'_, MockClockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> SystemTime {
        self.state().now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state();
        state.now += duration;
        state.sleeps.push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_sleep_advances_time() {
        let clock = MockClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_millis(250));
        clock.sleep(Duration::from_millis(750));

        assert_eq!(clock.now().duration_since(start).unwrap(), Duration::from_secs(1));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(250), Duration::from_millis(750)]
        );
        assert_eq!(clock.total_slept(), Duration::from_secs(1));
    }

    #[test]
    fn test_mock_clock_advance_is_not_a_sleep() {
        let clock = MockClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(30));

        assert_eq!(clock.now().duration_since(start).unwrap(), Duration::from_secs(30));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let before = clock.now();
        clock.sleep(Duration::from_millis(1));
        assert!(clock.now() >= before);
    }
}
