//! Perforce authorization provider

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use permsync_core::{AuthzProvider, ProviderResult};
use permsync_domain::{
    AccountSpec, ExternalAccount, ExternalRepository, ExternalService, ExternalServiceKind,
    ExternalUserPermissions, PermsSyncError, ProviderError, Result, User,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::executor::{P4Cli, P4Executor};
use super::protects::{
    can_grant_read, can_revoke_read, parse_group_members, parse_protection, parse_users,
    user_depot_patterns,
};

/// Account data stored for Perforce accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerforceAccountData {
    /// Perforce user name
    pub username: String,
    /// Email address the account was matched on
    pub email: String,
}

/// Connection settings of a Perforce external service
#[derive(Debug, Clone, Deserialize)]
struct PerforceConnection {
    #[serde(rename = "p4.port")]
    port: String,
    #[serde(rename = "p4.user")]
    user: String,
    #[serde(rename = "p4.passwd")]
    password: String,
}

#[derive(Debug, Default)]
struct ServerCache {
    user_emails: Option<Arc<HashMap<String, String>>>,
    group_members: HashMap<String, Arc<Vec<String>>>,
}

/// [`AuthzProvider`] backed by the protection table of a Perforce server.
///
/// Users are matched to Perforce users by verified email, and the
/// email is the account identifier. User and group listings are cached for
/// the lifetime of the provider.
pub struct PerforceProvider {
    urn: String,
    service_id: String,
    user: String,
    executor: Arc<dyn P4Executor>,
    cache: Mutex<ServerCache>,
}

impl std::fmt::Debug for PerforceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerforceProvider")
            .field("urn", &self.urn)
            .field("service_id", &self.service_id)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl PerforceProvider {
    /// Service type reported by Perforce providers.
    pub const SERVICE_TYPE: &'static str = "perforce";

    /// Provider for the server at `port`, queried as `user` through `executor`.
    pub fn new(
        urn: impl Into<String>,
        port: &str,
        user: impl Into<String>,
        executor: Arc<dyn P4Executor>,
    ) -> Self {
        Self {
            urn: urn.into(),
            service_id: format!("{}/", port.trim_end_matches('/')),
            user: user.into(),
            executor,
            cache: Mutex::new(ServerCache::default()),
        }
    }

    /// Provider for a Perforce external service, talking to it through the
    /// `p4` command line client.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for other service kinds and `Config` when the
    /// connection settings are incomplete.
    pub fn from_service(service: &ExternalService) -> Result<Self> {
        if service.kind != ExternalServiceKind::Perforce {
            return Err(PermsSyncError::InvalidInput(format!(
                "external service {} is not a Perforce connection",
                service.id
            )));
        }
        let conn: PerforceConnection = serde_json::from_value(service.config.clone())
            .map_err(|e| PermsSyncError::Config(format!("external service {}: {e}", service.id)))?;

        let cli = P4Cli::new(conn.port.clone(), conn.user.clone(), conn.password);
        Ok(Self::new(service.urn(), &conn.port, conn.user, Arc::new(cli)))
    }

    /// Problems with the configured credentials, empty when usable.
    ///
    /// Listing another user's protections requires super access, so the
    /// check asks for the provider user's own.
    pub async fn validate(&self) -> Vec<String> {
        match self.executor.exec(&["protects", "-u", &self.user]).await {
            Ok(_) => Vec::new(),
            Err(ProviderError::Forbidden(_)) => vec!["the user does not have super access".into()],
            Err(e) => vec![format!("validate user access level: {e}")],
        }
    }

    async fn user_emails(&self) -> ProviderResult<Arc<HashMap<String, String>>> {
        let cached = self.cache.lock().user_emails.clone();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let output = self.executor.exec(&["users"]).await?;
        let emails: Arc<HashMap<_, _>> = Arc::new(parse_users(&output).into_iter().collect());
        self.cache.lock().user_emails = Some(Arc::clone(&emails));
        Ok(emails)
    }

    async fn group_members(&self, group: &str) -> ProviderResult<Arc<Vec<String>>> {
        let cached = self.cache.lock().group_members.get(group).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let output = self.executor.exec(&["group", "-o", group]).await.map_err(|e| {
            ProviderError::Other(format!("list members of group {group:?}: {e}"))
        })?;
        let members = Arc::new(parse_group_members(&output));
        self.cache.lock().group_members.insert(group.to_string(), Arc::clone(&members));
        Ok(members)
    }

    /// Usernames left with read access after applying the table top to bottom.
    async fn users_with_access(&self, output: &str) -> ProviderResult<HashSet<String>> {
        let mut users = HashSet::new();

        for line in output.lines().map(str::trim).filter_map(parse_protection) {
            let exclusion = line.is_exclusion();
            let applies =
                if exclusion { can_revoke_read(line.level) } else { can_grant_read(line.level) };
            if !applies {
                continue;
            }

            match (line.kind, line.name, exclusion) {
                ("user", "*", true) => users.clear(),
                ("user", "*", false) => users.extend(self.user_emails().await?.keys().cloned()),
                ("user", name, true) => {
                    users.remove(name);
                }
                ("user", name, false) => {
                    users.insert(name.to_string());
                }
                ("group", name, true) => {
                    for member in self.group_members(name).await?.iter() {
                        users.remove(member);
                    }
                }
                ("group", name, false) => {
                    users.extend(self.group_members(name).await?.iter().cloned());
                }
                (kind, _, _) => warn!(kind, "Unrecognized protection type"),
            }
        }

        Ok(users)
    }

    fn check_host(&self, service_id: &str) -> ProviderResult<()> {
        if service_id == self.service_id {
            Ok(())
        } else {
            Err(ProviderError::Other(format!(
                "not a code host of the resource: want {service_id:?} but have {:?}",
                self.service_id
            )))
        }
    }
}

#[async_trait]
impl AuthzProvider for PerforceProvider {
    fn service_type(&self) -> &str {
        Self::SERVICE_TYPE
    }

    fn service_id(&self) -> &str {
        &self.service_id
    }

    fn urn(&self) -> &str {
        &self.urn
    }

    #[instrument(skip_all, fields(user_id = user.id))]
    async fn fetch_account(
        &self,
        user: &User,
        _current: &[ExternalAccount],
        verified_emails: &[String],
    ) -> ProviderResult<Option<ExternalAccount>> {
        let wanted: HashSet<&str> = verified_emails.iter().map(String::as_str).collect();
        let output = self.executor.exec(&["users"]).await?;

        let Some((username, email)) =
            parse_users(&output).into_iter().find(|(_, email)| wanted.contains(email.as_str()))
        else {
            debug!("No Perforce user matches a verified email");
            return Ok(None);
        };

        let data = serde_json::to_value(PerforceAccountData { username, email: email.clone() })
            .map_err(|e| ProviderError::Other(format!("encode account data: {e}")))?;

        Ok(Some(ExternalAccount {
            id: 0,
            user_id: user.id,
            spec: AccountSpec {
                service_type: Self::SERVICE_TYPE.into(),
                service_id: self.service_id.clone(),
                client_id: String::new(),
                account_id: email,
            },
            data: Some(data),
            expired_at: None,
            last_valid_at: None,
        }))
    }

    #[instrument(skip(self, account), fields(account_id = %account.spec.account_id))]
    async fn fetch_user_perms(
        &self,
        account: &ExternalAccount,
    ) -> ProviderResult<ExternalUserPermissions> {
        self.check_host(&account.spec.service_id)?;

        let data: PerforceAccountData = account
            .data
            .clone()
            .ok_or_else(|| ProviderError::Other("no user found in the external account data".into()))
            .and_then(|value| {
                serde_json::from_value(value)
                    .map_err(|e| ProviderError::Other(format!("decode account data: {e}")))
            })?;

        let output = self.executor.exec(&["protects", "-u", &data.username]).await?;
        let (include_contains, exclude_contains) = user_depot_patterns(&output);
        debug!(
            includes = include_contains.len(),
            excludes = exclude_contains.len(),
            "Fetched depot patterns"
        );

        Ok(ExternalUserPermissions { exacts: Vec::new(), include_contains, exclude_contains })
    }

    async fn fetch_user_perms_by_token(
        &self,
        _token: &str,
    ) -> ProviderResult<ExternalUserPermissions> {
        Err(ProviderError::NotImplemented("perforce permissions by token".into()))
    }

    #[instrument(skip(self, repo), fields(repo = %repo.spec.id))]
    async fn fetch_repo_perms(&self, repo: &ExternalRepository) -> ProviderResult<Vec<String>> {
        self.check_host(&repo.spec.service_id)?;

        let output = self.executor.exec(&["protects", "-a", &repo.spec.id]).await?;
        let users = self.users_with_access(&output).await?;
        let emails = self.user_emails().await?;

        let account_ids: BTreeSet<String> =
            users.iter().filter_map(|user| emails.get(user).cloned()).collect();
        Ok(account_ids.into_iter().collect())
    }
}
