//! Rate limiting of outbound code host calls

pub mod registry;

pub use registry::RateLimiterRegistry;
