//! Ports consumed by the permissions syncer.
//!
//! Authorization providers, the permissions store, the user/repository
//! directory and the rate limiter are all reached through these traits so the
//! sync logic stays free of I/O and can be exercised with in-memory fakes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use permsync_domain::{
    ExternalAccount, ExternalAccountIds, ExternalRepoSpec, ExternalRepository, ExternalService,
    ExternalServiceKind, ExternalUserPermissions, PermsMetrics, ProviderError, Repo, RepoId,
    RepoPermissions, RequestType, Result, User, UserId, UserPermissions,
};
use tokio_util::sync::CancellationToken;

/// Result of a provider call
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A code host that is authoritative for who can read its repositories.
///
/// Each provider is identified by its `service_type`/`service_id` pair (used
/// to match external accounts and to key rate limits) and by the URN of the
/// external service connection it was built from (used to match
/// repositories).
#[async_trait]
pub trait AuthzProvider: Send + Sync {
    /// Code host type, e.g. `github` or `perforce`
    fn service_type(&self) -> &str;

    /// Code host identity, e.g. `https://github.com/`
    fn service_id(&self) -> &str;

    /// URN of the external service connection backing this provider
    fn urn(&self) -> &str;

    /// Discover the user's account on this code host.
    ///
    /// Called only when the user has no account for this provider yet.
    /// Returns `Ok(None)` when no account matches.
    async fn fetch_account(
        &self,
        user: &User,
        current: &[ExternalAccount],
        verified_emails: &[String],
    ) -> ProviderResult<Option<ExternalAccount>>;

    /// Repositories the account can read.
    async fn fetch_user_perms(
        &self,
        account: &ExternalAccount,
    ) -> ProviderResult<ExternalUserPermissions>;

    /// Repositories readable with a raw access token.
    async fn fetch_user_perms_by_token(
        &self,
        token: &str,
    ) -> ProviderResult<ExternalUserPermissions>;

    /// Account identifiers that can read the repository.
    async fn fetch_repo_perms(&self, repo: &ExternalRepository) -> ProviderResult<Vec<String>>;
}

/// Source of the currently configured providers.
///
/// Queried on every sync so configuration changes take effect without a
/// restart.
pub trait ProviderRegistry: Send + Sync {
    /// All configured providers
    fn providers(&self) -> Vec<Arc<dyn AuthzProvider>>;
}

/// A fixed provider list.
#[derive(Clone, Default)]
pub struct StaticProviders {
    providers: Vec<Arc<dyn AuthzProvider>>,
}

impl StaticProviders {
    /// Wrap a provider list.
    pub fn new(providers: Vec<Arc<dyn AuthzProvider>>) -> Self {
        Self { providers }
    }
}

impl ProviderRegistry for StaticProviders {
    fn providers(&self) -> Vec<Arc<dyn AuthzProvider>> {
        self.providers.clone()
    }
}

/// Persistent store for permission records and external account state.
#[async_trait]
pub trait PermsStore: Send + Sync {
    /// Replace the user's repository permissions.
    async fn set_user_permissions(&self, perms: &UserPermissions) -> Result<()>;

    /// Begin a transaction for the repository permission pair.
    async fn transact(&self) -> Result<Box<dyn PermsTransaction>>;

    /// Bump the repository's sync timestamp without changing its content.
    async fn touch_repo_permissions(&self, repo_id: RepoId) -> Result<()>;

    /// Map external account identifiers to the users they are linked to.
    ///
    /// Accounts not linked to any user are absent from the result.
    async fn get_user_ids_by_external_accounts(
        &self,
        accounts: &ExternalAccountIds,
    ) -> Result<HashMap<String, UserId>>;

    /// Users without any stored permissions.
    async fn user_ids_with_no_perms(&self) -> Result<Vec<UserId>>;

    /// Private repositories without any stored permissions.
    async fn repo_ids_with_no_perms(&self) -> Result<Vec<RepoId>>;

    /// Users whose permissions were synced longest ago, oldest first.
    async fn user_ids_with_oldest_perms(
        &self,
        limit: usize,
    ) -> Result<Vec<(UserId, DateTime<Utc>)>>;

    /// Repositories whose permissions were synced longest ago, oldest first.
    async fn repo_ids_with_oldest_perms(
        &self,
        limit: usize,
    ) -> Result<Vec<(RepoId, DateTime<Utc>)>>;

    /// Non-expired external accounts of the user.
    async fn list_external_accounts(&self, user_id: UserId) -> Result<Vec<ExternalAccount>>;

    /// Mark the account's credential as rejected by the code host.
    async fn touch_expired(&self, account_id: i64) -> Result<()>;

    /// Mark the account's credential as accepted by the code host.
    async fn touch_last_valid(&self, account_id: i64) -> Result<()>;

    /// Staleness of stored permissions.
    async fn metrics(&self, stale_after: Duration) -> Result<PermsMetrics>;
}

/// Transaction writing a repository's permissions and pending permissions.
///
/// Both writes become visible on [`commit`](Self::commit) or neither does.
#[async_trait]
pub trait PermsTransaction: Send {
    /// Replace the repository's user permissions.
    async fn set_repo_permissions(&mut self, perms: &RepoPermissions) -> Result<()>;

    /// Replace the pending grants of the repository on the accounts' code
    /// host with the given accounts.
    async fn set_repo_pending_permissions(
        &mut self,
        accounts: &ExternalAccountIds,
        perms: &RepoPermissions,
    ) -> Result<()>;

    /// Apply the buffered writes.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard the buffered writes.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Users, repositories and their code host connections.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Look up a user.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the user does not exist.
    async fn get_user(&self, user_id: UserId) -> Result<User>;

    /// Verified email addresses of the user.
    async fn list_verified_emails(&self, user_id: UserId) -> Result<Vec<String>>;

    /// Look up a repository; `None` when it does not exist.
    async fn get_repo(&self, repo_id: RepoId) -> Result<Option<Repo>>;

    /// Private repositories whose external spec is one of `specs`.
    async fn list_private_repo_ids_by_specs(
        &self,
        specs: &[ExternalRepoSpec],
    ) -> Result<Vec<RepoId>>;

    /// Private repositories whose external id matches an include pattern of
    /// their code host and no exclude pattern of it.
    async fn list_private_repo_ids_by_contains(
        &self,
        include: &[ExternalRepoSpec],
        exclude: &[ExternalRepoSpec],
    ) -> Result<Vec<RepoId>>;

    /// Repositories the user was granted directly, bypassing providers.
    async fn list_direct_grant_repo_ids_by_user(&self, user_id: UserId) -> Result<Vec<RepoId>>;

    /// Users granted the repository directly.
    async fn list_direct_grant_user_ids_by_repo(&self, repo_id: RepoId) -> Result<Vec<UserId>>;

    /// Code host connections owned by the user, restricted to `kinds`.
    async fn list_user_external_services(
        &self,
        user_id: UserId,
        kinds: &[ExternalServiceKind],
    ) -> Result<Vec<ExternalService>>;

    /// Link the account to the user and persist it.
    ///
    /// Returns the stored account, including its store identifier.
    async fn associate_user_and_save(
        &self,
        user_id: UserId,
        account: &ExternalAccount,
    ) -> Result<ExternalAccount>;
}

/// Per code host rate limiting of outbound calls.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until `n` calls against `service_id` are allowed.
    ///
    /// # Errors
    ///
    /// Fails when `cancel` fires first or when `n` exceeds the burst size.
    async fn wait_n(&self, cancel: &CancellationToken, service_id: &str, n: u32) -> Result<()>;
}

/// Predicate deciding whether background syncing is switched off.
pub trait SyncGate: Send + Sync {
    /// Whether syncing is disabled right now.
    fn is_disabled(&self) -> bool;
}

impl<F> SyncGate for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_disabled(&self) -> bool {
        self()
    }
}

/// Hook receiving sync outcomes, for metrics.
pub trait SyncObserver: Send + Sync {
    /// A user or repository sync finished.
    fn observe_sync(&self, request_type: RequestType, success: bool, elapsed: Duration);

    /// A scheduling pass found `count` entities without permissions.
    fn observe_no_perms(&self, request_type: RequestType, count: usize);
}

/// Observer that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn observe_sync(&self, _request_type: RequestType, _success: bool, _elapsed: Duration) {}

    fn observe_no_perms(&self, _request_type: RequestType, _count: usize) {}
}
