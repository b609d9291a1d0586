//! Scheduler error types

use std::time::Duration;

use permsync_domain::PermsSyncError;
use thiserror::Error;

/// Lifecycle errors of the background runtime
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Runtime is already running
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// Runtime is not running
    #[error("Scheduler not running")]
    NotRunning,

    /// Operation timed out
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Task join failed
    #[error("Task join failed: {0}")]
    TaskJoinFailed(#[from] tokio::task::JoinError),
}

impl From<SchedulerError> for PermsSyncError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::AlreadyRunning | SchedulerError::NotRunning => {
                PermsSyncError::InvalidInput(err.to_string())
            }
            _ => PermsSyncError::Internal(err.to_string()),
        }
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
