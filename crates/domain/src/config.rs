//! Configuration structures

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_METRICS_INTERVAL_SECS, DEFAULT_OLDEST_PERMS_LIMIT, DEFAULT_RATE_LIMIT_CAPACITY,
    DEFAULT_RATE_LIMIT_REFILL_AMOUNT, DEFAULT_RATE_LIMIT_REFILL_INTERVAL_MS,
    DEFAULT_REPO_SPEC_BATCH_SIZE, DEFAULT_SCHEDULE_INTERVAL_SECS,
    DEFAULT_STALE_PERMS_THRESHOLD_SECS,
};
use crate::errors::{PermsSyncError, Result};

/// Permissions syncer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermsSyncConfig {
    /// Seconds between scheduling passes
    pub schedule_interval_secs: u64,
    /// Seconds between metrics collection passes
    pub metrics_interval_secs: u64,
    /// Oldest users/repositories scheduled per pass
    pub oldest_perms_limit: usize,
    /// Age after which stored permissions count as stale
    pub stale_perms_threshold_secs: u64,
    /// External repository specs resolved per store lookup
    pub repo_spec_batch_size: usize,
    /// Conditions that switch background syncing off
    pub feature_gate: FeatureGateConfig,
    /// Per code host rate limits
    pub rate_limits: RateLimitsConfig,
}

impl Default for PermsSyncConfig {
    fn default() -> Self {
        Self {
            schedule_interval_secs: DEFAULT_SCHEDULE_INTERVAL_SECS,
            metrics_interval_secs: DEFAULT_METRICS_INTERVAL_SECS,
            oldest_perms_limit: DEFAULT_OLDEST_PERMS_LIMIT,
            stale_perms_threshold_secs: DEFAULT_STALE_PERMS_THRESHOLD_SECS,
            repo_spec_batch_size: DEFAULT_REPO_SPEC_BATCH_SIZE,
            feature_gate: FeatureGateConfig::default(),
            rate_limits: RateLimitsConfig::default(),
        }
    }
}

impl PermsSyncConfig {
    /// Interval between scheduling passes
    pub const fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    /// Interval between metrics collection passes
    pub const fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    /// Stale permissions threshold
    pub const fn stale_perms_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_perms_threshold_secs)
    }

    /// Check that intervals, limits and rate limits are usable.
    ///
    /// # Errors
    ///
    /// Returns `PermsSyncError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.schedule_interval_secs == 0 {
            return Err(PermsSyncError::Config("schedule_interval_secs must be positive".into()));
        }
        if self.metrics_interval_secs == 0 {
            return Err(PermsSyncError::Config("metrics_interval_secs must be positive".into()));
        }
        if self.oldest_perms_limit == 0 {
            return Err(PermsSyncError::Config("oldest_perms_limit must be positive".into()));
        }
        if self.repo_spec_batch_size == 0 {
            return Err(PermsSyncError::Config("repo_spec_batch_size must be positive".into()));
        }
        self.rate_limits.default.validate("default")?;
        for (service_id, limit) in &self.rate_limits.services {
            limit.validate(service_id)?;
        }
        Ok(())
    }
}

/// Site-level switches that disable background permissions syncing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureGateConfig {
    /// Permissions are managed by explicit user mapping instead of code hosts
    pub permissions_user_mapping: bool,
    /// Kill switch for automatic code host syncs
    pub disable_auto_code_host_syncs: bool,
    /// Whether license checks apply
    pub enforce_license: bool,
    /// Whether the license includes ACL support (only read when enforced)
    pub acls_licensed: bool,
}

impl FeatureGateConfig {
    /// Whether any switch disables syncing.
    pub const fn disables_sync(&self) -> bool {
        self.permissions_user_mapping
            || self.disable_auto_code_host_syncs
            || (self.enforce_license && !self.acls_licensed)
    }
}

/// Rate limits for outbound code host calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Limit applied to code hosts without an override
    pub default: RateLimitConfig,
    /// Overrides keyed by service ID
    pub services: HashMap<String, RateLimitConfig>,
}

impl RateLimitsConfig {
    /// Limit for `service_id`, falling back to the default.
    pub fn for_service(&self, service_id: &str) -> &RateLimitConfig {
        self.services.get(service_id).unwrap_or(&self.default)
    }
}

/// Token bucket parameters for one code host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Skip rate limiting entirely
    pub unlimited: bool,
    /// Burst size
    pub capacity: u64,
    /// Tokens added per interval
    pub refill_amount: u64,
    /// Refill interval in milliseconds
    pub refill_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            unlimited: false,
            capacity: DEFAULT_RATE_LIMIT_CAPACITY,
            refill_amount: DEFAULT_RATE_LIMIT_REFILL_AMOUNT,
            refill_interval_ms: DEFAULT_RATE_LIMIT_REFILL_INTERVAL_MS,
        }
    }
}

impl RateLimitConfig {
    /// A limit that never blocks.
    pub fn unlimited() -> Self {
        Self { unlimited: true, ..Self::default() }
    }

    /// Refill interval as a duration
    pub const fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.unlimited {
            return Ok(());
        }
        if self.capacity == 0 || self.refill_amount == 0 || self.refill_interval_ms == 0 {
            return Err(PermsSyncError::Config(format!(
                "rate limit for {name} needs positive capacity, refill_amount and refill_interval_ms"
            )));
        }
        Ok(())
    }
}
