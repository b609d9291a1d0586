//! # Permsync Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - Configuration loading (environment and JSON/TOML files)
//! - Per-code-host rate limiters built on token buckets
//! - An in-memory permissions and directory store
//! - The Perforce authorization provider
//! - Sync metrics, the feature gate and the background runtime
//!
//! ## Architecture
//! - Implements traits defined in `permsync-core`
//! - Depends on `permsync-common`, `permsync-domain` and `permsync-core`
//! - Contains all "impure" code (processes, timers, spawned tasks)

pub mod config;
pub mod database;
pub mod integrations;
pub mod observability;
pub mod rate_limit;
pub mod scheduling;
pub mod services;

// Re-export commonly used items
pub use database::MemoryStore;
pub use integrations::perforce::{P4Cli, P4Executor, PerforceAccountData, PerforceProvider};
pub use observability::{PermsSyncMetrics, PermsSyncMetricsSnapshot};
pub use rate_limit::RateLimiterRegistry;
pub use scheduling::{PermsSyncRuntime, SchedulerError, SchedulerResult};
pub use services::ConfigSyncGate;
