//! Users and repositories as known to the directory store

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::extsvc::{ExternalRepoSpec, ExternalRepository};
use super::request::{RepoId, UserId};

/// An internal user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User identifier
    pub id: UserId,
    /// Login name
    pub username: String,
    /// Whether the user administers the site
    pub site_admin: bool,
}

/// An internal repository mirrored from one or more code hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Repository identifier
    pub id: RepoId,
    /// Repository name, e.g. `github.com/org/repo`
    pub name: String,
    /// Whether access is restricted by the code host
    pub private: bool,
    /// Identity of the repository on its code host
    pub external_repo: ExternalRepoSpec,
    /// External service URN to clone URL, one entry per connection that
    /// yields this repository
    pub sources: BTreeMap<String, String>,
}

impl Repo {
    /// Reference handed to authorization providers.
    pub fn to_external_repository(&self) -> ExternalRepository {
        ExternalRepository { uri: self.name.clone(), spec: self.external_repo.clone() }
    }
}
