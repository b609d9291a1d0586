//! Resilience primitives for talking to rate-limited code hosts
//!
//! - [`Clock`]: time abstraction with a [`MockClock`] for deterministic tests
//! - [`TokenBucket`]: burst-tolerant rate limiter with cancellable waits

pub mod clock;
#[cfg(feature = "runtime")]
pub mod rate_limiter;

pub use clock::{Clock, MockClock, SystemClock};
#[cfg(feature = "runtime")]
pub use rate_limiter::{RateLimitError, TokenBucket, TokenBucketConfig, TokenBucketConfigBuilder};
