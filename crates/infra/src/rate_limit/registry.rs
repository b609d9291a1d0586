//! Per-service token buckets
//!
//! The registry hands every code host its own [`TokenBucket`], created on
//! first use from the configured limit for that service ID. Services
//! configured as unlimited never wait.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use permsync_common::{Clock, RateLimitError, SystemClock, TokenBucket, TokenBucketConfig};
use permsync_core::RateLimiter;
use permsync_domain::{PermsSyncError, RateLimitConfig, RateLimitsConfig, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Rate limiters keyed by service ID
pub struct RateLimiterRegistry<C: Clock + Clone = SystemClock> {
    config: RateLimitsConfig,
    buckets: RwLock<HashMap<String, Option<TokenBucket<C>>>>,
    clock: C,
}

impl RateLimiterRegistry<SystemClock> {
    /// Create a registry over the system clock.
    ///
    /// # Errors
    ///
    /// Returns `PermsSyncError::Config` if any configured limit is invalid.
    pub fn from_config(config: &RateLimitsConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone> RateLimiterRegistry<C> {
    /// Create a registry whose buckets read time from `clock`.
    ///
    /// Every configured limit is validated up front so a bad override fails
    /// at startup rather than on the first call to that code host.
    ///
    /// # Errors
    ///
    /// Returns `PermsSyncError::Config` if any configured limit is invalid.
    pub fn with_clock(config: &RateLimitsConfig, clock: C) -> Result<Self> {
        std::iter::once(&config.default)
            .chain(config.services.values())
            .filter_map(bucket_config)
            .try_for_each(|bucket| bucket.validate())
            .map_err(|e| PermsSyncError::Config(e.to_string()))?;

        Ok(Self { config: config.clone(), buckets: RwLock::new(HashMap::new()), clock })
    }

    /// The bucket for `service_id`, or `None` when it is unlimited.
    pub fn bucket(&self, service_id: &str) -> Result<Option<TokenBucket<C>>> {
        if let Some(bucket) = self.buckets.read().get(service_id) {
            return Ok(bucket.clone());
        }

        let mut buckets = self.buckets.write();
        if let Some(bucket) = buckets.get(service_id) {
            return Ok(bucket.clone());
        }

        let bucket = bucket_config(self.config.for_service(service_id))
            .map(|config| TokenBucket::with_clock(config, self.clock.clone()))
            .transpose()
            .map_err(|e| PermsSyncError::Config(e.to_string()))?;
        debug!(service_id, unlimited = bucket.is_none(), "Created rate limiter");
        buckets.insert(service_id.to_string(), bucket.clone());
        Ok(bucket)
    }
}

#[async_trait]
impl<C: Clock + Clone> RateLimiter for RateLimiterRegistry<C> {
    async fn wait_n(&self, cancel: &CancellationToken, service_id: &str, n: u32) -> Result<()> {
        let Some(bucket) = self.bucket(service_id)? else {
            return Ok(());
        };
        bucket.acquire(u64::from(n), cancel).await.map_err(|e| match e {
            RateLimitError::Cancelled => PermsSyncError::Cancelled,
            other => PermsSyncError::RateLimit(format!("{service_id}: {other}")),
        })
    }
}

fn bucket_config(limit: &RateLimitConfig) -> Option<TokenBucketConfig> {
    (!limit.unlimited).then(|| TokenBucketConfig {
        capacity: limit.capacity,
        refill_amount: limit.refill_amount,
        refill_interval: limit.refill_interval(),
    })
}
