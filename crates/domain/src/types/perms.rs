//! Permission records written by the syncer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::{RepoId, UserId};

/// Compact set of entity identifiers
pub type Bitmap = roaring::RoaringBitmap;

/// Permission level stored for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Perms {
    /// Read access
    Read,
}

/// Kind of entity referenced by a user's permission set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermType {
    /// Repository identifiers
    Repos,
}

/// Repositories a user can access
///
/// Each successful sync replaces the stored set wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct UserPermissions {
    /// Owner of the permission set
    pub user_id: UserId,
    /// Permission level
    pub perm: Perms,
    /// Kind of the identifiers in `ids`
    pub perm_type: PermType,
    /// Accessible repository identifiers
    pub ids: Bitmap,
    /// When the set last changed
    pub updated_at: Option<DateTime<Utc>>,
    /// When the set was last synced, even if unchanged
    pub synced_at: Option<DateTime<Utc>>,
}

impl UserPermissions {
    /// Read permissions over repositories for `user_id`.
    pub fn new(user_id: UserId, ids: Bitmap) -> Self {
        Self {
            user_id,
            perm: Perms::Read,
            perm_type: PermType::Repos,
            ids,
            updated_at: None,
            synced_at: None,
        }
    }
}

/// Users that can access a repository
#[derive(Debug, Clone, PartialEq)]
pub struct RepoPermissions {
    /// The repository
    pub repo_id: RepoId,
    /// Permission level
    pub perm: Perms,
    /// Users with access
    pub user_ids: Bitmap,
    /// When the set last changed
    pub updated_at: Option<DateTime<Utc>>,
    /// When the set was last synced, even if unchanged
    pub synced_at: Option<DateTime<Utc>>,
}

impl RepoPermissions {
    /// Read permissions for `repo_id`.
    pub fn new(repo_id: RepoId, user_ids: Bitmap) -> Self {
        Self { repo_id, perm: Perms::Read, user_ids, updated_at: None, synced_at: None }
    }
}

/// External account identifiers on one code host
///
/// Used both to look up internal users and as the key set for pending
/// permissions: accounts that have not signed in yet keep their grants until
/// they are linked to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAccountIds {
    /// Code host type, e.g. `github`
    pub service_type: String,
    /// Code host identity, e.g. `https://github.com/`
    pub service_id: String,
    /// Account identifiers on that code host
    pub account_ids: Vec<String>,
}

/// Repository access as reported by a provider for one account
///
/// `exacts` are external repository identifiers. `include_contains` and
/// `exclude_contains` are patterns matched against external repository
/// identifiers; `%` matches any sequence and `[^/]+` one path segment.
/// Exclusions only narrow inclusions and are ignored without them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUserPermissions {
    /// Exact external repository identifiers
    pub exacts: Vec<String>,
    /// Inclusion patterns
    pub include_contains: Vec<String>,
    /// Exclusion patterns
    pub exclude_contains: Vec<String>,
}

impl ExternalUserPermissions {
    /// Whether the provider reported no access at all.
    pub fn is_empty(&self) -> bool {
        self.exacts.is_empty() && self.include_contains.is_empty()
    }
}

/// Staleness of stored permissions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PermsMetrics {
    /// Users whose permissions were last synced before the stale threshold
    pub users_with_stale_perms: i64,
    /// Seconds between the oldest and newest user sync
    pub users_perms_gap_seconds: f64,
    /// Repositories whose permissions were last synced before the threshold
    pub repos_with_stale_perms: i64,
    /// Seconds between the oldest and newest repository sync
    pub repos_perms_gap_seconds: f64,
}

/// Build a bitmap from entity identifiers.
///
/// Negative identifiers are not valid entity ids and are skipped.
pub fn bitmap_of<I>(ids: I) -> Bitmap
where
    I: IntoIterator<Item = i32>,
{
    ids.into_iter().filter_map(|id| u32::try_from(id).ok()).collect()
}
