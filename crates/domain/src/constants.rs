//! Domain-level constants and defaults

/// Seconds between periodic scheduling passes
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 60;

/// Seconds between metrics collection passes
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 60;

/// Oldest users and oldest repositories picked per scheduling pass
pub const DEFAULT_OLDEST_PERMS_LIMIT: usize = 10;

/// Permissions older than this are reported as stale (3 days)
pub const DEFAULT_STALE_PERMS_THRESHOLD_SECS: u64 = 3 * 24 * 60 * 60;

/// External repository specs resolved per store lookup, bounded by the
/// store's bind parameter limit
pub const DEFAULT_REPO_SPEC_BATCH_SIZE: usize = 10_000;

/// Default token bucket capacity per code host
pub const DEFAULT_RATE_LIMIT_CAPACITY: u64 = 100;

/// Default tokens added per refill interval
pub const DEFAULT_RATE_LIMIT_REFILL_AMOUNT: u64 = 10;

/// Default refill interval in milliseconds
pub const DEFAULT_RATE_LIMIT_REFILL_INTERVAL_MS: u64 = 1_000;

/// Name reported by the queue debug dump
pub const DEBUG_DUMP_NAME: &str = "permissions";
