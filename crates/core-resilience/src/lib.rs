//! Orbit Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks Orbit uses to make remote
//! operations survive transient failures:
//!
//! - **Clock**: An injectable source of time and delay, so that anything
//!   waiting on backoff can be driven deterministically in tests
//! - **Retry Policy**: Bounded retries with configurable backoff for
//!   operations whose errors can be classified as transient
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Storage systems (remote file stores, local file systems)
//! - Network protocols
//! - Application-specific concerns
//!
//! Delays run synchronously on the calling thread. Callers that dispatch one
//! request per thread only ever block the request that is being retried.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry Policy                      │  ← Bounded attempts + backoff
//! │  (Classifies errors via Retryable)      │
//! └─────────────┬───────────────────────────┘
//!               │ sleeps through
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Clock                             │  ← SystemClock / MockClock
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage Example
//!
//! ```
//! use orbit_core_resilience::{MockClock, RetryConfig, RetryPolicy, Retryable};
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct Flaky;
//!
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "flaky")
//!     }
//! }
//!
//! impl Retryable for Flaky {
//!     fn is_transient(&self) -> bool {
//!         true
//!     }
//! }
//!
//! let clock = Arc::new(MockClock::new());
//! let policy = RetryPolicy::new(RetryConfig::default(), clock.clone());
//!
//! let value = policy
//!     .execute("demo", |attempt| if attempt < 3 { Err(Flaky) } else { Ok(42) })
//!     .unwrap();
//!
//! assert_eq!(value, 42);
//! assert_eq!(clock.sleeps().len(), 2);
//! ```

pub mod clock;
pub mod retry;

// Re-export main types for convenience
pub use clock::{Clock, MockClock, SystemClock};
pub use retry::{BackoffStrategy, RetryConfig, RetryPolicy, RetryState, Retryable};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use orbit_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::clock::{Clock, MockClock, SystemClock};
    pub use super::retry::{BackoffStrategy, RetryConfig, RetryPolicy, Retryable};
}
