//! Background runtime of the permissions syncer
//!
//! Drives a [`PermsSyncer`] with three loops sharing one cancellation token:
//! - the executor, which takes due requests off the queue and syncs them
//! - the schedule ticker, which queues never-synced and oldest entities
//! - the metrics ticker, which reads staleness gauges from the store
//!
//! The loops only talk through the queue and the store.

use std::sync::Arc;
use std::time::Duration;

use permsync_core::{
    Acquisition, DirectoryStore, PermsStore, PermsSyncer, ProviderRegistry, RequestQueue,
    SyncerOptions,
};
use permsync_domain::{PermsSyncConfig, Result};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::observability::PermsSyncMetrics;
use crate::rate_limit::RateLimiterRegistry;
use crate::scheduling::error::{SchedulerError, SchedulerResult};
use crate::services::ConfigSyncGate;

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the loops need, cheap to clone into a spawned task
#[derive(Clone)]
struct LoopContext {
    syncer: Arc<PermsSyncer>,
    metrics: Arc<PermsSyncMetrics>,
    schedule_interval: Duration,
    metrics_interval: Duration,
    stale_perms_threshold: Duration,
}

impl LoopContext {
    async fn run(self, cancel: CancellationToken) {
        info!(
            schedule_interval = ?self.schedule_interval,
            metrics_interval = ?self.metrics_interval,
            "Permissions syncer started"
        );

        let mut loops = JoinSet::new();
        loops.spawn(sync_loop(Arc::clone(&self.syncer), cancel.clone()));
        loops.spawn(schedule_loop(
            Arc::clone(&self.syncer),
            self.schedule_interval,
            cancel.clone(),
        ));
        loops.spawn(metrics_loop(self.clone(), cancel.clone()));

        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Permissions syncer loop failed");
            }
        }

        info!("Permissions syncer stopped");
    }
}

/// Takes requests off the queue until cancelled.
///
/// Cancellation is observed between requests; a sync that has started runs
/// to completion, with only its rate limit waits cut short. A request that
/// is not due yet arms the wake-up timer for the remaining wait.
async fn sync_loop(syncer: Arc<PermsSyncer>, cancel: CancellationToken) {
    let queue = Arc::clone(syncer.queue());
    let mut wakeup = WakeupTimer::default();

    while !cancel.is_cancelled() {
        match queue.acquire_next(syncer.now()) {
            Acquisition::Ready(request) => {
                if let Err(e) = syncer.sync_perms(&cancel, &request).await {
                    error!(
                        request_type = %request.meta.request_type,
                        id = request.meta.id,
                        error = %e,
                        "Failed to sync permissions"
                    );
                }
                // There may be more due work; look again before waiting.
                continue;
            }
            Acquisition::NotDue { request, wait } => {
                if wakeup.arm(&queue, Instant::now() + wait) {
                    debug!(
                        request_type = %request.meta.request_type,
                        id = request.meta.id,
                        ?wait,
                        "Next request not due yet"
                    );
                }
            }
            Acquisition::Empty => {}
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = queue.notified() => {}
        }
    }
    debug!("Sync loop cancelled");
}

/// The one pending timer that raises the enqueue signal when the earliest
/// deferred request becomes due. Dropping it aborts the timer.
#[derive(Debug, Default)]
struct WakeupTimer {
    pending: Option<(Instant, JoinHandle<()>)>,
}

impl WakeupTimer {
    /// Make sure a wake-up fires no later than `deadline`.
    ///
    /// Returns whether a new timer was spawned. A live timer with an earlier
    /// or equal deadline is kept; a later one is replaced.
    fn arm(&mut self, queue: &Arc<RequestQueue>, deadline: Instant) -> bool {
        if let Some((armed_at, handle)) = &self.pending {
            if *armed_at <= deadline && !handle.is_finished() {
                return false;
            }
        }
        self.disarm();

        let queue = Arc::clone(queue);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            queue.notify();
        });
        self.pending = Some((deadline, handle));
        true
    }

    fn disarm(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for WakeupTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Queues the computed schedule on every tick while syncing is enabled.
async fn schedule_loop(syncer: Arc<PermsSyncer>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if syncer.is_disabled() {
            debug!("Permissions syncing is disabled, skipping schedule");
            continue;
        }

        match syncer.schedule().await {
            Ok(schedule) => {
                let queued = syncer.apply_schedule(&cancel, &schedule);
                debug!(scheduled = schedule.len(), queued, "Applied permissions sync schedule");
            }
            Err(e) => error!(error = %e, "Failed to compute schedule"),
        }
    }
    debug!("Schedule loop cancelled");
}

/// Refreshes the staleness and queue gauges on every tick.
async fn metrics_loop(context: LoopContext, cancel: CancellationToken) {
    let interval = context.metrics_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match context.syncer.perms_store().metrics(context.stale_perms_threshold).await {
            Ok(store_metrics) => context.metrics.set_store_metrics(&store_metrics),
            Err(e) => {
                error!(error = %e, "Failed to get metrics from store");
                continue;
            }
        }
        context.metrics.set_queue_size(context.syncer.queue().len());
    }
    debug!("Metrics loop cancelled");
}

/// Runs a [`PermsSyncer`] in the background
///
/// Either block on [`PermsSyncRuntime::run`] with a caller-owned token, or
/// use [`start`](PermsSyncRuntime::start) and [`stop`](PermsSyncRuntime::stop)
/// to manage a spawned task.
pub struct PermsSyncRuntime {
    context: LoopContext,
    gate: Option<Arc<ConfigSyncGate>>,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl PermsSyncRuntime {
    /// Wrap an already configured syncer.
    ///
    /// `metrics` only sees sync outcomes if the syncer reports to it; the
    /// gauges are fed by the metrics loop either way.
    ///
    /// # Errors
    ///
    /// Returns `PermsSyncError::Config` if an interval in `config` is zero.
    pub fn new(
        syncer: Arc<PermsSyncer>,
        metrics: Arc<PermsSyncMetrics>,
        config: &PermsSyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            context: LoopContext {
                syncer,
                metrics,
                schedule_interval: config.schedule_interval(),
                metrics_interval: config.metrics_interval(),
                stale_perms_threshold: config.stale_perms_threshold(),
            },
            gate: None,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        })
    }

    /// Build the syncer and its collaborators from configuration.
    ///
    /// Wires per-service rate limiters, a configuration backed gate and the
    /// metrics observer.
    ///
    /// # Errors
    ///
    /// Returns `Config` or `InvalidInput` errors for unusable settings.
    pub fn from_config(
        config: &PermsSyncConfig,
        perms_store: Arc<dyn PermsStore>,
        directory: Arc<dyn DirectoryStore>,
        providers: Arc<dyn ProviderRegistry>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(PermsSyncMetrics::new());
        let gate = Arc::new(ConfigSyncGate::new(config.feature_gate.clone()));
        let rate_limiter = Arc::new(RateLimiterRegistry::from_config(&config.rate_limits)?);

        let syncer = PermsSyncer::new(perms_store, directory, providers)
            .with_rate_limiter(rate_limiter)
            .with_gate(Arc::clone(&gate) as _)
            .with_observer(Arc::clone(&metrics) as _)
            .with_options(SyncerOptions::from(config))?;

        let mut runtime = Self::new(Arc::new(syncer), metrics, config)?;
        runtime.gate = Some(gate);
        Ok(runtime)
    }

    /// The driven syncer
    pub fn syncer(&self) -> &Arc<PermsSyncer> {
        &self.context.syncer
    }

    /// Metrics fed by the syncer and the metrics loop
    pub fn metrics(&self) -> &Arc<PermsSyncMetrics> {
        &self.context.metrics
    }

    /// The configuration gate, when built by [`from_config`](Self::from_config)
    pub fn gate(&self) -> Option<&Arc<ConfigSyncGate>> {
        self.gate.as_ref()
    }

    /// Run all loops until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        self.context.clone().run(cancel).await;
    }

    /// Start the loops on a background task.
    ///
    /// # Errors
    ///
    /// Returns error if the runtime is already running
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!("Starting permissions sync runtime");

        // Fresh token so the runtime can restart after stop
        self.cancellation_token = CancellationToken::new();

        let context = self.context.clone();
        let cancel = self.cancellation_token.clone();
        let handle = tokio::spawn(context.run(cancel));

        *self.task_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the loops and wait for them to finish.
    ///
    /// # Errors
    ///
    /// Returns error if the runtime is not running or does not stop in time
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("Stopping permissions sync runtime");
        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.lock().await.take() {
            tokio::time::timeout(JOIN_TIMEOUT, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { duration: JOIN_TIMEOUT })??;
        }

        info!("Permissions sync runtime stopped");
        Ok(())
    }

    /// Whether a started task is still alive
    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for PermsSyncRuntime {
    fn drop(&mut self) {
        if !self.cancellation_token.is_cancelled() && self.is_running() {
            warn!("Permissions sync runtime dropped while running");
            self.cancellation_token.cancel();
        }
    }
}
