//! Permissions syncer: keeps user and repository permissions in step with
//! the code hosts.
//!
//! [`PermsSyncer`] owns the [`RequestQueue`] and the sync routines. The
//! infrastructure layer drives it from three loops (executor, scheduler,
//! metrics); everything here is free of timers and spawning so it can be
//! called directly from tests.

mod repo_perms;
mod schedule;
mod user_perms;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use permsync_common::resilience::{Clock, SystemClock};
use permsync_domain::constants::{DEFAULT_OLDEST_PERMS_LIMIT, DEFAULT_REPO_SPEC_BATCH_SIZE};
use permsync_domain::{
    PermsSyncConfig, PermsSyncError, Priority, RepoId, RequestMeta, RequestType, Result,
    ResultExt, UserId,
};
pub use schedule::{Schedule, ScheduledRepo, ScheduledUser};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::ports::{
    DirectoryStore, NoopObserver, PermsStore, ProviderRegistry, RateLimiter, SyncGate,
    SyncObserver,
};
use super::queue::{QueueDump, RequestQueue, SyncRequest};

/// Tunables of the sync routines and the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncerOptions {
    /// Oldest users and oldest repositories picked per scheduling pass
    pub oldest_perms_limit: usize,
    /// External repository specs resolved per store lookup
    pub repo_spec_batch_size: usize,
}

impl Default for SyncerOptions {
    fn default() -> Self {
        Self {
            oldest_perms_limit: DEFAULT_OLDEST_PERMS_LIMIT,
            repo_spec_batch_size: DEFAULT_REPO_SPEC_BATCH_SIZE,
        }
    }
}

impl SyncerOptions {
    /// Reject limits that would stall scheduling or lookups.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.oldest_perms_limit == 0 {
            return Err(PermsSyncError::InvalidInput("oldest_perms_limit must be positive".into()));
        }
        if self.repo_spec_batch_size == 0 {
            return Err(PermsSyncError::InvalidInput(
                "repo_spec_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl From<&PermsSyncConfig> for SyncerOptions {
    fn from(config: &PermsSyncConfig) -> Self {
        Self {
            oldest_perms_limit: config.oldest_perms_limit,
            repo_spec_batch_size: config.repo_spec_batch_size,
        }
    }
}

/// Syncs permissions between code hosts and the permissions store
pub struct PermsSyncer {
    queue: Arc<RequestQueue>,
    perms_store: Arc<dyn PermsStore>,
    directory: Arc<dyn DirectoryStore>,
    providers: Arc<dyn ProviderRegistry>,
    gate: Arc<dyn SyncGate>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    observer: Arc<dyn SyncObserver>,
    clock: Arc<dyn Clock>,
    options: SyncerOptions,
}

impl PermsSyncer {
    /// Create a syncer with default options, no rate limiting, an always-open
    /// gate and the system clock.
    pub fn new(
        perms_store: Arc<dyn PermsStore>,
        directory: Arc<dyn DirectoryStore>,
        providers: Arc<dyn ProviderRegistry>,
    ) -> Self {
        Self {
            queue: Arc::new(RequestQueue::new()),
            perms_store,
            directory,
            providers,
            gate: Arc::new(|| false),
            rate_limiter: None,
            observer: Arc::new(NoopObserver),
            clock: Arc::new(SystemClock),
            options: SyncerOptions::default(),
        }
    }

    /// Gate calls to each code host through `rate_limiter`
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Use `gate` to decide whether background syncing is switched off
    pub fn with_gate(mut self, gate: Arc<dyn SyncGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Report sync outcomes to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Read time from `clock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the tunables.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the options are unusable.
    pub fn with_options(mut self, options: SyncerOptions) -> Result<Self> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    /// The request queue
    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    /// The permissions store
    pub fn perms_store(&self) -> &Arc<dyn PermsStore> {
        &self.perms_store
    }

    /// Current time according to the syncer's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.utc_now()
    }

    /// Whether background syncing is switched off, either by the gate or
    /// because no provider is configured.
    pub fn is_disabled(&self) -> bool {
        self.gate.is_disabled() || self.providers.providers().is_empty()
    }

    /// Queue high priority syncs for the users.
    #[instrument(skip(self, user_ids), fields(count = user_ids.len()))]
    pub fn schedule_users(&self, user_ids: &[UserId]) {
        if user_ids.is_empty() {
            return;
        }
        if self.is_disabled() {
            warn!("Permissions syncing is disabled, not scheduling users");
            return;
        }
        for &user_id in user_ids {
            self.queue.enqueue(RequestMeta::user(user_id, Priority::High));
        }
        debug!("Scheduled user permissions syncs");
    }

    /// Queue high priority syncs for the repositories.
    #[instrument(skip(self, repo_ids), fields(count = repo_ids.len()))]
    pub fn schedule_repos(&self, repo_ids: &[RepoId]) {
        if repo_ids.is_empty() {
            return;
        }
        if self.is_disabled() {
            warn!("Permissions syncing is disabled, not scheduling repositories");
            return;
        }
        for &repo_id in repo_ids {
            self.queue.enqueue(RequestMeta::repo(repo_id, Priority::High));
        }
        debug!("Scheduled repository permissions syncs");
    }

    /// Run the sync for an acquired request.
    ///
    /// The request is removed from the queue when this returns, whatever the
    /// outcome, and also when the returned future is dropped early.
    #[instrument(
        skip(self, cancel, request),
        fields(request_type = %request.meta.request_type, id = request.meta.id)
    )]
    pub async fn sync_perms(&self, cancel: &CancellationToken, request: &SyncRequest) -> Result<()> {
        let _remove = RemoveOnDrop {
            queue: &self.queue,
            request_type: request.meta.request_type,
            id: request.meta.id,
        };

        let meta = &request.meta;
        match meta.request_type {
            RequestType::User => self.sync_user_perms(cancel, meta.id, meta.no_perms).await,
            RequestType::Repo => self.sync_repo_perms(cancel, meta.id, meta.no_perms).await,
        }
    }

    /// Snapshot of the queue for debugging endpoints
    pub fn debug_dump(&self) -> QueueDump {
        self.queue.dump()
    }

    async fn wait_for_rate_limit(&self, cancel: &CancellationToken, service_id: &str) -> Result<()> {
        let Some(rate_limiter) = &self.rate_limiter else {
            return Ok(());
        };
        rate_limiter
            .wait_n(cancel, service_id, 1)
            .await
            .with_context(|| format!("wait for rate limiter of {service_id}"))
    }
}

struct RemoveOnDrop<'a> {
    queue: &'a RequestQueue,
    request_type: RequestType,
    id: i32,
}

impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        self.queue.remove(self.request_type, self.id, true);
    }
}
