//! Metrics collection modules
//!
//! Thread-safe metrics for the permissions syncer.

pub mod perms;

// Re-export metric types for convenience
pub use perms::{PermsSyncMetrics, PermsSyncMetricsSnapshot, SyncCountersSnapshot};
