//! Running `p4` commands

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use permsync_core::ProviderResult;
use permsync_domain::ProviderError;
use tokio::process::Command;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs a `p4` command against a Perforce server and returns its stdout.
#[async_trait]
pub trait P4Executor: Send + Sync {
    /// Run `p4 <args>`.
    ///
    /// # Errors
    ///
    /// Failures are classified into [`ProviderError`] variants so the syncer
    /// can tell rejected credentials from transient failures.
    async fn exec(&self, args: &[&str]) -> ProviderResult<String>;
}

/// [`P4Executor`] spawning the `p4` command line client.
#[derive(Debug, Clone)]
pub struct P4Cli {
    binary: PathBuf,
    port: String,
    user: String,
    password: String,
    timeout: Duration,
}

impl P4Cli {
    /// Client for the server at `port` (e.g. `ssl:perforce.example.com:1666`).
    pub fn new(port: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            binary: PathBuf::from("p4"),
            port: port.into(),
            user: user.into(),
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use a `p4` binary other than the one on `PATH`.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Abort commands running longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Map `p4` stderr output onto a provider error.
pub(crate) fn classify_failure(stderr: &str) -> ProviderError {
    let message = stderr.trim().to_string();
    if message.contains("You don't have permission for this operation") {
        ProviderError::Forbidden(message)
    } else if message.contains("password (P4PASSWD) invalid or unset")
        || message.contains("Your session has expired")
    {
        ProviderError::Unauthorized(message)
    } else if message.contains("no such file") || message.contains("doesn't exist") {
        ProviderError::NotFound(message)
    } else {
        ProviderError::Other(message)
    }
}

#[async_trait]
impl P4Executor for P4Cli {
    async fn exec(&self, args: &[&str]) -> ProviderResult<String> {
        debug!(port = %self.port, ?args, "Running p4");

        let child = Command::new(&self.binary)
            .arg("-p")
            .arg(&self.port)
            .arg("-u")
            .arg(&self.user)
            .args(args)
            .env("P4PASSWD", &self.password)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!("p4 {} after {:?}", args.join(" "), self.timeout))
            })?
            .map_err(|e| ProviderError::Other(format!("spawn {}: {e}", self.binary.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = ?output.status.code(), ?args, "p4 command failed");
            return Err(classify_failure(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
