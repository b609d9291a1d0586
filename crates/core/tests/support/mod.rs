//! Shared test helpers for `permsync-core` integration tests.
//!
//! In-memory fakes for every port the syncer consumes. Each fake records the
//! calls it receives so tests can assert on store traffic, not just results.

#![allow(dead_code)]

pub mod directory;
pub mod providers;
pub mod store;

use std::sync::Arc;

use permsync_core::{PermsSyncer, StaticProviders};
pub use directory::MockDirectory;
use permsync_core::AuthzProvider;
pub use providers::{MockProvider, MockRateLimiter};
pub use store::MockPermsStore;

/// Build a syncer over the given fakes.
pub fn syncer(
    store: &Arc<MockPermsStore>,
    directory: &Arc<MockDirectory>,
    providers: Vec<Arc<dyn AuthzProvider>>,
) -> PermsSyncer {
    PermsSyncer::new(
        Arc::clone(store) as _,
        Arc::clone(directory) as _,
        Arc::new(StaticProviders::new(providers)),
    )
}
