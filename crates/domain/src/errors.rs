//! Error types used throughout the permissions syncer
//!
//! Two layers:
//! - [`ProviderError`] classifies failures reported by a code-host
//!   authorization provider. The classification drives recovery: credential
//!   errors expire the account, not-found on an ACL query touches the repo,
//!   anything else aborts the sync unless partial results are acceptable.
//! - [`PermsSyncError`] is the crate-wide error, with a [`PermsSyncError::Context`]
//!   variant added through [`ResultExt`] so logs carry the failing step.

use thiserror::Error;

/// Failure reported by an authorization provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Credential rejected (HTTP 401)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Credential lacks access (HTTP 403)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The code host suspended the account
    #[error("account suspended: {0}")]
    AccountSuspended(String),

    /// The queried resource does not exist or is hidden (HTTP 404)
    #[error("not found: {0}")]
    NotFound(String),

    /// The code host rejected the call for exceeding its rate limit
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The call did not complete in time
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The provider does not support the operation
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Any other provider failure
    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Whether the error means the credential used for the call is no
    /// longer usable.
    pub const fn invalidates_credential(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Forbidden(_) | Self::AccountSuspended(_))
    }

    /// Whether the error is a 401.
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Whether the error is a 404.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Main error type for permissions sync operations
#[derive(Error, Debug)]
pub enum PermsSyncError {
    /// Persistent store failure
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authorization provider failure
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Rate limiter refused or abandoned a wait
    #[error("Rate limit error: {0}")]
    RateLimit(String),

    /// A required entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation observed cancellation
    #[error("Operation cancelled")]
    Cancelled,

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Error annotated with the step that produced it
    #[error("{context}: {source}")]
    Context {
        /// Description of the failing step
        context: String,
        /// Underlying error
        #[source]
        source: Box<PermsSyncError>,
    },
}

impl PermsSyncError {
    /// Wrap the error with a description of the failing step.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context { context: context.into(), source: Box::new(self) }
    }

    /// The innermost error, with all context layers removed.
    pub fn root(&self) -> &Self {
        let mut current = self;
        while let Self::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// The provider error at the root, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self.root() {
            Self::Provider(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type alias for permissions sync operations
pub type Result<T> = std::result::Result<T, PermsSyncError>;

/// Context helpers for results carrying a [`PermsSyncError`]
pub trait ResultExt<T> {
    /// Annotate an error with a fixed description.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Annotate an error with a lazily built description.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<PermsSyncError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|err| err.into().context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|err| err.into().context(f()))
    }
}
