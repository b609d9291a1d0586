//! # Permsync Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for providers, stores and rate limiting
//! - The sync request priority queue
//! - The permissions syncer: user and repository fetchers and the scheduler
//!
//! ## Architecture Principles
//! - Only depends on `permsync-common` and `permsync-domain`
//! - No database, HTTP, process or timer code
//! - All external dependencies via traits

pub mod authz;

pub use authz::{
    Acquisition, AuthzProvider, DirectoryStore, NoopObserver, PermsStore, PermsSyncer,
    PermsTransaction, ProviderRegistry, ProviderResult, QueueDump, QueuedRequestInfo, RateLimiter,
    RequestQueue, Schedule, ScheduledRepo, ScheduledUser, StaticProviders, SyncGate, SyncObserver,
    SyncRequest, SyncerOptions,
};
