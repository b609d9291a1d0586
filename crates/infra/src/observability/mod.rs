//! Observability infrastructure for the permissions syncer
//!
//! Metrics are plain atomics read through serializable snapshots; logging is
//! `tracing` throughout the crate.
//!
//! ## Design Principles
//!
//! 1. **Poison Recovery**: mutex locks recover poisoned data and log a
//!    warning instead of panicking.
//!
//! 2. **Infallible Recording**: recording never fails; reads of aggregates
//!    over empty data return [`MetricsError::EmptyData`].

pub mod metrics;

pub use metrics::{PermsSyncMetrics, PermsSyncMetricsSnapshot, SyncCountersSnapshot};

/// Metrics error type
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Empty data set - cannot calculate aggregate metric
    #[error("Empty data: cannot calculate {metric}")]
    EmptyData {
        /// Metric name that failed (e.g., "P95", "P50")
        metric: &'static str,
    },
}

/// Result type for metrics operations
pub type MetricsResult<T> = Result<T, MetricsError>;
