//! Sync request metadata shared by the queue and the scheduler

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal user identifier
pub type UserId = i32;

/// Internal repository identifier
pub type RepoId = i32;

/// Priority of a sync request
///
/// `High` is used for explicit triggers (a user logged in, a repository was
/// added); periodic refreshes use `Low` so they never preempt triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Routine refresh
    Low,
    /// Explicitly requested
    High,
}

/// Kind of entity a sync request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    /// Sync a user's repository permissions
    User,
    /// Sync a repository's user permissions
    Repo,
}

impl RequestType {
    /// Label used in logs and metrics
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Repo => "repo",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata describing what to sync and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    /// Request priority
    pub priority: Priority,
    /// Entity kind
    #[serde(rename = "type")]
    pub request_type: RequestType,
    /// Entity identifier
    pub id: i32,
    /// Earliest time the sync may run; `None` means as soon as possible
    pub next_sync_at: Option<DateTime<Utc>>,
    /// The entity has never had permissions stored, so partial results are
    /// better than none
    pub no_perms: bool,
}

impl RequestMeta {
    /// Request to sync a user's permissions as soon as possible.
    pub const fn user(id: UserId, priority: Priority) -> Self {
        Self { priority, request_type: RequestType::User, id, next_sync_at: None, no_perms: false }
    }

    /// Request to sync a repository's permissions as soon as possible.
    pub const fn repo(id: RepoId, priority: Priority) -> Self {
        Self { priority, request_type: RequestType::Repo, id, next_sync_at: None, no_perms: false }
    }

    /// Defer the request until `at`.
    #[must_use]
    pub const fn with_next_sync_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.next_sync_at = at;
        self
    }

    /// Mark the entity as having no stored permissions yet.
    #[must_use]
    pub const fn with_no_perms(mut self, no_perms: bool) -> Self {
        self.no_perms = no_perms;
        self
    }
}
