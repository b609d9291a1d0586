//! Sync gate backed by site configuration.
//!
//! Background syncing stops when permissions come from explicit user
//! mapping, when automatic code host syncs are disabled, or when license
//! enforcement is on without ACL support. A runtime kill switch can stop
//! syncing without touching the configuration.
//!
//! # Example
//!
//! ```
//! use permsync_core::SyncGate;
//! use permsync_domain::FeatureGateConfig;
//! use permsync_infra::services::ConfigSyncGate;
//!
//! let gate = ConfigSyncGate::new(FeatureGateConfig::default());
//! assert!(!gate.is_disabled());
//!
//! gate.set_kill_switch(true);
//! assert!(gate.is_disabled());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use permsync_core::SyncGate;
use permsync_domain::FeatureGateConfig;
use tracing::info;

/// [`SyncGate`] reading the current [`FeatureGateConfig`].
///
/// The configuration can be replaced while the syncer runs; the next
/// scheduling pass or explicit request sees the new value.
#[derive(Debug, Default)]
pub struct ConfigSyncGate {
    config: RwLock<FeatureGateConfig>,
    kill_switch: AtomicBool,
}

impl ConfigSyncGate {
    /// Create a gate for `config` with the kill switch released.
    pub fn new(config: FeatureGateConfig) -> Self {
        Self { config: RwLock::new(config), kill_switch: AtomicBool::new(false) }
    }

    /// Current configuration
    pub fn config(&self) -> FeatureGateConfig {
        self.config.read().clone()
    }

    /// Replace the configuration.
    pub fn update(&self, config: FeatureGateConfig) {
        let disabled = config.disables_sync();
        *self.config.write() = config;
        info!(disabled, "Updated permissions sync gate");
    }

    /// Engage or release the kill switch.
    pub fn set_kill_switch(&self, engaged: bool) {
        let was = self.kill_switch.swap(engaged, Ordering::SeqCst);
        if was != engaged {
            info!(engaged, "Toggled permissions sync kill switch");
        }
    }

    /// Whether the kill switch is engaged
    pub fn kill_switch_engaged(&self) -> bool {
        self.kill_switch.load(Ordering::SeqCst)
    }
}

impl SyncGate for ConfigSyncGate {
    fn is_disabled(&self) -> bool {
        self.kill_switch_engaged() || self.config.read().disables_sync()
    }
}
