//! Common utilities shared across permsync crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: clock abstraction
//! - `runtime`: async rate limiting (token buckets with cancellable waits)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

#[cfg(feature = "foundation")]
pub mod resilience;

#[cfg(feature = "foundation")]
pub use resilience::{Clock, MockClock, SystemClock};
#[cfg(feature = "runtime")]
pub use resilience::{RateLimitError, TokenBucket, TokenBucketConfig};
