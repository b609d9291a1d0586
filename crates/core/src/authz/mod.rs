//! Permissions synchronization with code host authorization providers.

pub mod ports;
pub mod queue;
pub mod syncer;

pub use ports::{
    AuthzProvider, DirectoryStore, NoopObserver, PermsStore, PermsTransaction, ProviderRegistry,
    ProviderResult, RateLimiter, StaticProviders, SyncGate, SyncObserver,
};
pub use queue::{Acquisition, QueueDump, QueuedRequestInfo, RequestQueue, SyncRequest};
pub use syncer::{PermsSyncer, Schedule, ScheduledRepo, ScheduledUser, SyncerOptions};
