//! Permissions sync metrics
//!
//! Counters for finished syncs, sync duration samples for percentiles and
//! gauges fed by the metrics loop (store staleness, queue size).
//!
//! ## Design
//! - **VecDeque ring buffer** of the last 1000 durations per request type
//! - **Poison-safe locking** with explicit match pattern (no .expect())
//! - **f64 gauges** stored as bits in `AtomicU64`

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use permsync_core::SyncObserver;
use permsync_domain::{PermsMetrics, RequestType};
use serde::{Deserialize, Serialize};

use crate::observability::{MetricsError, MetricsResult};

const MAX_DURATION_SAMPLES: usize = 1000;

/// Outcome counters and duration samples of one request type
#[derive(Debug, Default)]
struct SyncCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    no_perms: AtomicU64,
    durations_ms: Mutex<VecDeque<u64>>,
}

impl SyncCounters {
    fn record(&self, success: bool, elapsed: Duration) {
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let mut samples = match self.durations_ms.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                tracing::warn!(
                    metric = "PermsSyncMetrics::durations",
                    "Mutex poisoned during duration recording, recovering data"
                );
                poison_err.into_inner()
            }
        };
        samples.push_back(ms);
        if samples.len() > MAX_DURATION_SAMPLES {
            samples.pop_front();
        }
    }

    fn percentile(&self, percentile: f64, metric: &'static str) -> MetricsResult<u64> {
        let samples = match self.durations_ms.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                tracing::warn!(
                    metric = "PermsSyncMetrics::durations",
                    percentile,
                    "Mutex poisoned during percentile read, recovering"
                );
                poison_err.into_inner()
            }
        };
        if samples.is_empty() {
            return Err(MetricsError::EmptyData { metric });
        }

        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile) as usize).min(sorted.len() - 1);
        Ok(sorted[index])
    }

    fn snapshot(&self) -> SyncCountersSnapshot {
        SyncCountersSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            no_perms: self.no_perms.load(Ordering::Relaxed),
            p50_ms: self.percentile(0.50, "P50").ok(),
            p95_ms: self.percentile(0.95, "P95").ok(),
        }
    }
}

/// Point-in-time counters of one request type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCountersSnapshot {
    /// Syncs that completed
    pub succeeded: u64,
    /// Syncs that returned an error
    pub failed: u64,
    /// Entities without permissions found by the last scheduling pass
    pub no_perms: u64,
    /// Median sync duration, `None` before the first sync
    pub p50_ms: Option<u64>,
    /// 95th percentile sync duration, `None` before the first sync
    pub p95_ms: Option<u64>,
}

/// Serializable view of [`PermsSyncMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermsSyncMetricsSnapshot {
    /// User sync counters
    pub users: SyncCountersSnapshot,
    /// Repository sync counters
    pub repos: SyncCountersSnapshot,
    /// Users whose permissions are older than the stale threshold
    pub users_with_stale_perms: i64,
    /// Seconds between the oldest and newest user sync
    pub users_perms_gap_seconds: f64,
    /// Repositories whose permissions are older than the stale threshold
    pub repos_with_stale_perms: i64,
    /// Seconds between the oldest and newest repository sync
    pub repos_perms_gap_seconds: f64,
    /// Requests waiting in the queue
    pub queue_size: u64,
}

/// Metrics of the permissions syncer
///
/// Fed by the syncer through [`SyncObserver`] and by the metrics loop through
/// the gauge setters.
#[derive(Debug, Default)]
pub struct PermsSyncMetrics {
    users: SyncCounters,
    repos: SyncCounters,
    users_with_stale_perms: AtomicI64,
    users_perms_gap_seconds: AtomicU64,
    repos_with_stale_perms: AtomicI64,
    repos_perms_gap_seconds: AtomicU64,
    queue_size: AtomicU64,
}

impl PermsSyncMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, request_type: RequestType) -> &SyncCounters {
        match request_type {
            RequestType::User => &self.users,
            RequestType::Repo => &self.repos,
        }
    }

    /// Record a finished sync.
    pub fn record_sync(&self, request_type: RequestType, success: bool, elapsed: Duration) {
        self.counters(request_type).record(success, elapsed);
    }

    /// Record how many entities a scheduling pass found without permissions.
    pub fn record_no_perms(&self, request_type: RequestType, count: usize) {
        let count = u64::try_from(count).unwrap_or(u64::MAX);
        self.counters(request_type).no_perms.store(count, Ordering::Relaxed);
    }

    /// Update the staleness gauges from the store.
    pub fn set_store_metrics(&self, metrics: &PermsMetrics) {
        self.users_with_stale_perms.store(metrics.users_with_stale_perms, Ordering::Relaxed);
        self.users_perms_gap_seconds
            .store(metrics.users_perms_gap_seconds.to_bits(), Ordering::Relaxed);
        self.repos_with_stale_perms.store(metrics.repos_with_stale_perms, Ordering::Relaxed);
        self.repos_perms_gap_seconds
            .store(metrics.repos_perms_gap_seconds.to_bits(), Ordering::Relaxed);
    }

    /// Update the queue size gauge.
    pub fn set_queue_size(&self, size: usize) {
        self.queue_size.store(u64::try_from(size).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// 95th percentile sync duration in milliseconds
    ///
    /// Returns `MetricsError::EmptyData` if no sync of that type finished.
    pub fn p95_sync_ms(&self, request_type: RequestType) -> MetricsResult<u64> {
        self.counters(request_type).percentile(0.95, "P95")
    }

    /// Current values of every metric
    pub fn snapshot(&self) -> PermsSyncMetricsSnapshot {
        PermsSyncMetricsSnapshot {
            users: self.users.snapshot(),
            repos: self.repos.snapshot(),
            users_with_stale_perms: self.users_with_stale_perms.load(Ordering::Relaxed),
            users_perms_gap_seconds: f64::from_bits(
                self.users_perms_gap_seconds.load(Ordering::Relaxed),
            ),
            repos_with_stale_perms: self.repos_with_stale_perms.load(Ordering::Relaxed),
            repos_perms_gap_seconds: f64::from_bits(
                self.repos_perms_gap_seconds.load(Ordering::Relaxed),
            ),
            queue_size: self.queue_size.load(Ordering::Relaxed),
        }
    }
}

impl SyncObserver for PermsSyncMetrics {
    fn observe_sync(&self, request_type: RequestType, success: bool, elapsed: Duration) {
        self.record_sync(request_type, success, elapsed);
    }

    fn observe_no_perms(&self, request_type: RequestType, count: usize) {
        self.record_no_perms(request_type, count);
    }
}
