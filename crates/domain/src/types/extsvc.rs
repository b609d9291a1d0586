//! External service (code host) identities, accounts and repositories

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::UserId;
use crate::errors::{PermsSyncError, Result};

/// Kind of code host connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalServiceKind {
    /// GitHub or GitHub Enterprise
    GitHub,
    /// GitLab
    GitLab,
    /// Bitbucket Server
    BitbucketServer,
    /// Perforce Helix Core
    Perforce,
}

impl ExternalServiceKind {
    /// Lowercase identifier used in URNs and service types
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
            Self::BitbucketServer => "bitbucketserver",
            Self::Perforce => "perforce",
        }
    }
}

impl fmt::Display for ExternalServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured code host connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalService {
    /// Connection identifier
    pub id: i64,
    /// Code host kind
    pub kind: ExternalServiceKind,
    /// Human readable name
    pub display_name: String,
    /// Raw connection configuration
    pub config: serde_json::Value,
    /// Set when the connection belongs to a single user
    pub namespace_user_id: Option<UserId>,
}

impl ExternalService {
    /// Stable identifier of this connection, `extsvc:<kind>:<id>`.
    pub fn urn(&self) -> String {
        format!("extsvc:{}:{}", self.kind.as_str(), self.id)
    }

    /// Access token stored in the connection configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for kinds that do not carry a token and
    /// `Config` when the configuration has no string `token` field.
    pub fn extract_token(&self) -> Result<String> {
        match self.kind {
            ExternalServiceKind::GitHub | ExternalServiceKind::GitLab => self
                .config
                .get("token")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| {
                    PermsSyncError::Config(format!("external service {} has no token", self.id))
                }),
            kind => Err(PermsSyncError::InvalidInput(format!(
                "cannot extract token for external service kind {kind}"
            ))),
        }
    }
}

/// Identity of an account on a code host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountSpec {
    /// Code host type, e.g. `github`
    pub service_type: String,
    /// Code host identity, e.g. `https://github.com/`
    pub service_id: String,
    /// OAuth client the account authenticated through, if any
    pub client_id: String,
    /// Account identifier on the code host
    pub account_id: String,
}

/// A code host account linked to an internal user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalAccount {
    /// Store identifier; zero until persisted
    pub id: i64,
    /// Linked user
    pub user_id: UserId,
    /// Account identity
    #[serde(flatten)]
    pub spec: AccountSpec,
    /// Provider-specific account data
    pub data: Option<serde_json::Value>,
    /// Set when the credential was rejected by the code host
    pub expired_at: Option<DateTime<Utc>>,
    /// Last time the credential was accepted
    pub last_valid_at: Option<DateTime<Utc>>,
}

impl ExternalAccount {
    /// Key matching providers to accounts, `<service_type>:<service_id>`.
    pub fn service_key(&self) -> String {
        service_key(&self.spec.service_type, &self.spec.service_id)
    }
}

/// Key matching providers to accounts, `<service_type>:<service_id>`.
pub fn service_key(service_type: &str, service_id: &str) -> String {
    format!("{service_type}:{service_id}")
}

/// Identity of a repository on a code host
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalRepoSpec {
    /// Repository identifier on the code host
    pub id: String,
    /// Code host type
    pub service_type: String,
    /// Code host identity
    pub service_id: String,
}

/// Repository reference handed to providers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRepository {
    /// Repository URI, e.g. `github.com/org/repo`
    pub uri: String,
    /// Code host identity of the repository
    pub spec: ExternalRepoSpec,
}
