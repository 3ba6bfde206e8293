//! Retry policy with bounded attempts and backoff
//!
//! A [`RetryPolicy`] runs an operation, and when it fails with an error that
//! its [`Retryable`] classification reports as transient, waits for a backoff
//! delay (through the injected [`Clock`]) and runs it again. Retries stop when
//! the attempt budget or the time limit is spent; the last error is returned.
//! Permanent errors are returned on the spot.
//!
//! # Example
//!
//! ```
//! use orbit_core_resilience::{BackoffStrategy, RetryConfig};
//! use std::time::Duration;
//!
//! let config = RetryConfig {
//!     max_attempts: 5,
//!     initial_delay: Duration::from_millis(100),
//!     max_delay: Duration::from_secs(1),
//!     backoff: BackoffStrategy::Exponential,
//!     ..Default::default()
//! };
//!
//! assert_eq!(config.calculate_delay(1), Duration::from_millis(100));
//! assert_eq!(config.calculate_delay(3), Duration::from_millis(400));
//! assert_eq!(config.calculate_delay(10), Duration::from_secs(1));
//! ```

use crate::clock::Clock;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Classification of an error for retry purposes
pub trait Retryable {
    /// True if the failure is temporary and the operation is worth repeating
    fn is_transient(&self) -> bool;
}

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,

    /// Linear increase in delay
    Linear,

    /// Exponential increase in delay (2^n)
    Exponential,

    /// Exponential with random jitter to prevent thundering herd
    ExponentialWithJitter,
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// No retry is started once this much time has passed since the first attempt
    pub time_limit: Duration,

    /// Delay after the first failed attempt
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Backoff strategy to use
    pub backoff: BackoffStrategy,

    /// Jitter factor (0.0-1.0), only used by `ExponentialWithJitter`
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            time_limit: Duration::from_secs(300),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff: BackoffStrategy::Exponential,
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Calculate the delay that follows failed attempt number `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_delay = match self.backoff {
            BackoffStrategy::Fixed => Some(self.initial_delay),
            BackoffStrategy::Linear => self.initial_delay.checked_mul(attempt),
            BackoffStrategy::Exponential | BackoffStrategy::ExponentialWithJitter => 2_u32
                .checked_pow(attempt - 1)
                .and_then(|multiplier| self.initial_delay.checked_mul(multiplier)),
        };

        // Cap at max_delay (overflow saturates to the cap)
        let capped_delay = base_delay.map_or(self.max_delay, |d| d.min(self.max_delay));

        if self.backoff == BackoffStrategy::ExponentialWithJitter && self.jitter_factor > 0.0 {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor);
            capped_delay + Duration::from_secs_f64(capped_delay.as_secs_f64() * jitter)
        } else {
            capped_delay
        }
    }
}

/// Executes operations under a [`RetryConfig`], sleeping through a [`Clock`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: Arc<RetryConfig>,
    clock: Arc<dyn Clock>,
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(config: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: Arc::new(config),
            clock,
        }
    }

    /// Create a retry policy with the default configuration
    pub fn new_default(clock: Arc<dyn Clock>) -> Self {
        Self::new(RetryConfig::default(), clock)
    }

    /// The configuration this policy runs with
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// The clock used for delays and the time limit
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Begin tracking a single logical operation
    pub fn start(&self) -> RetryState<'_> {
        RetryState {
            policy: self,
            attempt: 1,
            started: self.clock.now(),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent
    ///
    /// `op` receives the 1-based attempt number, so it can re-establish any
    /// state a failed attempt may have disturbed before trying again.
    pub fn execute<T, E, F>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable + fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut state = self.start();
        loop {
            match op(state.attempt()) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !state.should_retry(operation, &e) {
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Progress of one operation through a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
    started: SystemTime,
}

impl RetryState<'_> {
    /// The attempt about to run (or that just ran), starting at 1
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Decide whether to retry after `error`; sleeps the backoff delay if so
    pub fn should_retry<E>(&mut self, operation: &str, error: &E) -> bool
    where
        E: Retryable + fmt::Display,
    {
        if !error.is_transient() {
            return false;
        }

        let config = &self.policy.config;
        if self.attempt >= config.max_attempts.max(1) {
            tracing::error!(
                operation,
                attempts = self.attempt,
                error = %error,
                "Retry attempts exhausted"
            );
            return false;
        }

        let elapsed = self
            .policy
            .clock
            .now()
            .duration_since(self.started)
            .unwrap_or_default();
        if elapsed >= config.time_limit {
            tracing::error!(
                operation,
                attempts = self.attempt,
                elapsed = ?elapsed,
                error = %error,
                "Retry time limit exceeded"
            );
            return false;
        }

        let delay = config.calculate_delay(self.attempt);
        tracing::warn!(
            operation,
            attempt = self.attempt,
            max_attempts = config.max_attempts,
            delay = ?delay,
            error = %error,
            "Transient failure, retrying"
        );
        self.policy.clock.sleep(delay);
        self.attempt += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient: {0}")]
        Transient(u32),
        #[error("permanent")]
        Permanent,
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Transient(_))
        }
    }

    fn policy(config: RetryConfig) -> (RetryPolicy, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new());
        (RetryPolicy::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let (policy, clock) = policy(RetryConfig {
            initial_delay: Duration::from_millis(10),
            ..Default::default()
        });

        let mut calls = 0;
        let result = policy.execute("read", |attempt| {
            calls += 1;
            if attempt < 3 {
                Err(TestError::Transient(attempt))
            } else {
                Ok(attempt)
            }
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[test]
    fn test_exhaustion_returns_last_error() {
        let (policy, clock) = policy(RetryConfig {
            max_attempts: 4,
            ..Default::default()
        });

        let mut calls = 0;
        let result: Result<(), TestError> = policy.execute("seek", |attempt| {
            calls += 1;
            Err(TestError::Transient(attempt))
        });

        assert!(matches!(result, Err(TestError::Transient(4))));
        assert_eq!(calls, 4);
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let (policy, clock) = policy(RetryConfig::default());

        let mut calls = 0;
        let result: Result<(), TestError> = policy.execute("read", |_| {
            calls += 1;
            Err(TestError::Permanent)
        });

        assert!(matches!(result, Err(TestError::Permanent)));
        assert_eq!(calls, 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_time_limit_stops_retries() {
        let (policy, clock) = policy(RetryConfig {
            max_attempts: 100,
            time_limit: Duration::from_secs(1),
            initial_delay: Duration::from_millis(400),
            backoff: BackoffStrategy::Fixed,
            ..Default::default()
        });

        let mut calls = 0;
        let result: Result<(), TestError> = policy.execute("read", |attempt| {
            calls += 1;
            Err(TestError::Transient(attempt))
        });

        assert!(result.is_err());
        // attempts at 0, 400, 800 and 1200ms; the last one is past the limit
        assert_eq!(calls, 4);
        assert_eq!(clock.total_slept(), Duration::from_millis(1200));
    }

    #[test]
    fn test_no_retry_config() {
        let (policy, _clock) = policy(RetryConfig::no_retry());

        let mut calls = 0;
        let result: Result<(), TestError> = policy.execute("read", |attempt| {
            calls += 1;
            Err(TestError::Transient(attempt))
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_state_manual_loop() {
        let (policy, clock) = policy(RetryConfig {
            initial_delay: Duration::from_millis(5),
            backoff: BackoffStrategy::Linear,
            ..Default::default()
        });

        let mut state = policy.start();
        assert_eq!(state.attempt(), 1);
        assert!(state.should_retry("op", &TestError::Transient(1)));
        assert_eq!(state.attempt(), 2);
        assert!(state.should_retry("op", &TestError::Transient(2)));
        assert!(!state.should_retry("op", &TestError::Permanent));
        assert_eq!(state.attempt(), 3);

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(5), Duration::from_millis(10)]
        );
    }

    #[test]
    fn test_calculate_delay_strategies() {
        let fixed = RetryConfig {
            initial_delay: Duration::from_millis(100),
            backoff: BackoffStrategy::Fixed,
            ..Default::default()
        };
        assert_eq!(fixed.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(fixed.calculate_delay(7), Duration::from_millis(100));

        let linear = RetryConfig {
            backoff: BackoffStrategy::Linear,
            ..fixed.clone()
        };
        assert_eq!(linear.calculate_delay(3), Duration::from_millis(300));

        let exponential = RetryConfig {
            backoff: BackoffStrategy::Exponential,
            max_delay: Duration::from_secs(2),
            ..fixed
        };
        assert_eq!(exponential.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(exponential.calculate_delay(4), Duration::from_millis(800));
        assert_eq!(exponential.calculate_delay(6), Duration::from_secs(2));
        // 2^(attempt-1) overflows u32 here; the cap still applies
        assert_eq!(exponential.calculate_delay(200), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff: BackoffStrategy::ExponentialWithJitter,
            jitter_factor: 0.5,
            ..Default::default()
        };

        for _ in 0..50 {
            let delay = config.calculate_delay(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay < Duration::from_millis(300));
        }
    }
}
