//! Background execution of the permissions syncer
//!
//! [`PermsSyncRuntime`] follows the runtime rules of this crate:
//! - Explicit lifecycle management (start/stop)
//! - Join handles for spawned tasks
//! - Cancellation token support on every wait
//! - Structured tracing

pub mod error;
pub mod perms_runtime;

pub use error::{SchedulerError, SchedulerResult};
pub use perms_runtime::PermsSyncRuntime;
