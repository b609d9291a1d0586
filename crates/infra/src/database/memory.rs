//! In-memory permissions and directory store
//!
//! Keeps both sides of the permission mapping consistent: writing a user's
//! repository set updates the user set of every affected repository and vice
//! versa, the way the database tables are kept in step.
//!
//! Repository writes go through [`MemoryTransaction`], which buffers them and
//! applies everything under one write lock on commit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use permsync_common::{Clock, SystemClock};
use permsync_core::{DirectoryStore, PermsStore, PermsTransaction};
use permsync_domain::{
    Bitmap, ExternalAccount, ExternalAccountIds, ExternalRepoSpec, ExternalService,
    ExternalServiceKind, PermsMetrics, PermsSyncError, Repo, RepoId, RepoPermissions, Result,
    User, UserId, UserPermissions,
};
use tracing::debug;

use super::contains::ContainsMatcher;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AccountKey {
    service_type: String,
    service_id: String,
    account_id: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: BTreeMap<UserId, User>,
    emails: HashMap<UserId, Vec<String>>,
    repos: BTreeMap<RepoId, Repo>,
    accounts: Vec<ExternalAccount>,
    next_account_id: i64,
    services: Vec<ExternalService>,
    direct_grants: BTreeSet<(UserId, RepoId)>,
    user_perms: HashMap<UserId, UserPermissions>,
    repo_perms: HashMap<RepoId, RepoPermissions>,
    pending: HashMap<AccountKey, Bitmap>,
}

fn to_id(value: u32) -> Option<i32> {
    i32::try_from(value).ok()
}

impl MemoryState {
    fn apply_user_permissions(&mut self, perms: &UserPermissions, now: DateTime<Utc>) {
        let Ok(user) = u32::try_from(perms.user_id) else {
            return;
        };
        let old = self.user_perms.get(&perms.user_id).map(|p| p.ids.clone()).unwrap_or_default();

        for repo_id in (&old - &perms.ids).iter().filter_map(to_id) {
            if let Some(repo_perms) = self.repo_perms.get_mut(&repo_id) {
                repo_perms.user_ids.remove(user);
                repo_perms.updated_at = Some(now);
            }
        }
        for repo_id in (&perms.ids - &old).iter().filter_map(to_id) {
            let repo_perms = self
                .repo_perms
                .entry(repo_id)
                .or_insert_with(|| RepoPermissions::new(repo_id, Bitmap::new()));
            repo_perms.user_ids.insert(user);
            repo_perms.updated_at = Some(now);
        }

        let mut stored = perms.clone();
        stored.updated_at = Some(now);
        stored.synced_at = Some(now);
        self.user_perms.insert(perms.user_id, stored);
    }

    fn apply_repo_permissions(&mut self, perms: &RepoPermissions, now: DateTime<Utc>) {
        let Ok(repo) = u32::try_from(perms.repo_id) else {
            return;
        };
        let old =
            self.repo_perms.get(&perms.repo_id).map(|p| p.user_ids.clone()).unwrap_or_default();

        for user_id in (&old - &perms.user_ids).iter().filter_map(to_id) {
            if let Some(user_perms) = self.user_perms.get_mut(&user_id) {
                user_perms.ids.remove(repo);
                user_perms.updated_at = Some(now);
            }
        }
        for user_id in (&perms.user_ids - &old).iter().filter_map(to_id) {
            let user_perms = self
                .user_perms
                .entry(user_id)
                .or_insert_with(|| UserPermissions::new(user_id, Bitmap::new()));
            user_perms.ids.insert(repo);
            user_perms.updated_at = Some(now);
        }

        let mut stored = perms.clone();
        stored.updated_at = Some(now);
        stored.synced_at = Some(now);
        self.repo_perms.insert(perms.repo_id, stored);
    }

    /// Replace the pending accounts of one repository on one code host.
    fn apply_pending(&mut self, accounts: &ExternalAccountIds, repo_id: RepoId) {
        let Ok(repo) = u32::try_from(repo_id) else {
            return;
        };

        for (key, repos) in &mut self.pending {
            if key.service_type == accounts.service_type && key.service_id == accounts.service_id {
                repos.remove(repo);
            }
        }
        for account_id in &accounts.account_ids {
            let key = AccountKey {
                service_type: accounts.service_type.clone(),
                service_id: accounts.service_id.clone(),
                account_id: account_id.clone(),
            };
            self.pending.entry(key).or_default().insert(repo);
        }
        self.pending.retain(|_, repos| !repos.is_empty());
    }

    fn account_mut(&mut self, account_id: i64) -> Result<&mut ExternalAccount> {
        self.accounts
            .iter_mut()
            .find(|a| a.id == account_id)
            .ok_or_else(|| PermsSyncError::NotFound(format!("external account {account_id}")))
    }
}

/// Oldest synced entries first, ties broken by id.
fn oldest<I>(entries: I, limit: usize) -> Vec<(i32, DateTime<Utc>)>
where
    I: Iterator<Item = (i32, Option<DateTime<Utc>>)>,
{
    let mut synced: Vec<_> = entries.filter_map(|(id, at)| at.map(|at| (id, at))).collect();
    synced.sort_by_key(|&(id, at)| (at, id));
    synced.truncate(limit);
    synced
}

/// Stale count and oldest-to-newest gap of a set of sync timestamps.
fn staleness<I>(synced_at: I, cutoff: Option<DateTime<Utc>>) -> (i64, f64)
where
    I: Iterator<Item = DateTime<Utc>> + Clone,
{
    let stale = cutoff.map_or(0, |cutoff| synced_at.clone().filter(|at| *at <= cutoff).count());
    let gap = match (synced_at.clone().min(), synced_at.max()) {
        (Some(min), Some(max)) => (max - min).num_milliseconds() as f64 / 1000.0,
        _ => 0.0,
    };
    (i64::try_from(stale).unwrap_or(i64::MAX), gap)
}

/// In-memory [`PermsStore`] and [`DirectoryStore`]
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryStore")
            .field("users", &state.users.len())
            .field("repos", &state.repos.len())
            .field("accounts", &state.accounts.len())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create an empty store stamping writes with the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store stamping writes with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { state: Arc::new(RwLock::new(MemoryState::default())), clock }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.utc_now()
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    /// Add or replace a user.
    pub fn insert_user(&self, user: User) {
        self.state.write().users.insert(user.id, user);
    }

    /// Record a verified email address for a user.
    pub fn add_verified_email(&self, user_id: UserId, email: impl Into<String>) {
        self.state.write().emails.entry(user_id).or_default().push(email.into());
    }

    /// Add or replace a repository.
    pub fn insert_repo(&self, repo: Repo) {
        self.state.write().repos.insert(repo.id, repo);
    }

    /// Store an external account, assigning it a fresh id.
    pub fn insert_external_account(&self, mut account: ExternalAccount) -> ExternalAccount {
        let mut state = self.state.write();
        state.next_account_id += 1;
        account.id = state.next_account_id;
        state.accounts.push(account.clone());
        account
    }

    /// Add a code host connection.
    pub fn insert_external_service(&self, service: ExternalService) {
        self.state.write().services.push(service);
    }

    /// Grant a user access to a repository outside any code host.
    pub fn grant_repo_access(&self, user_id: UserId, repo_id: RepoId) {
        self.state.write().direct_grants.insert((user_id, repo_id));
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Stored permissions of a user
    pub fn user_permissions(&self, user_id: UserId) -> Option<UserPermissions> {
        self.state.read().user_perms.get(&user_id).cloned()
    }

    /// Stored permissions of a repository
    pub fn repo_permissions(&self, repo_id: RepoId) -> Option<RepoPermissions> {
        self.state.read().repo_perms.get(&repo_id).cloned()
    }

    /// Repositories pending for an account that is not linked to a user yet
    pub fn pending_repo_ids(
        &self,
        service_type: &str,
        service_id: &str,
        account_id: &str,
    ) -> Vec<RepoId> {
        let key = AccountKey {
            service_type: service_type.to_string(),
            service_id: service_id.to_string(),
            account_id: account_id.to_string(),
        };
        self.state
            .read()
            .pending
            .get(&key)
            .map(|repos| repos.iter().filter_map(to_id).collect())
            .unwrap_or_default()
    }

    /// External account by id, including expired ones
    pub fn external_account(&self, account_id: i64) -> Option<ExternalAccount> {
        self.state.read().accounts.iter().find(|a| a.id == account_id).cloned()
    }
}

#[async_trait]
impl PermsStore for MemoryStore {
    async fn set_user_permissions(&self, perms: &UserPermissions) -> Result<()> {
        let now = self.now();
        self.state.write().apply_user_permissions(perms, now);
        Ok(())
    }

    async fn transact(&self) -> Result<Box<dyn PermsTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
            repo_perms: None,
            pending: Vec::new(),
        }))
    }

    async fn touch_repo_permissions(&self, repo_id: RepoId) -> Result<()> {
        let now = self.now();
        let mut state = self.state.write();
        let perms = state
            .repo_perms
            .entry(repo_id)
            .or_insert_with(|| RepoPermissions::new(repo_id, Bitmap::new()));
        perms.updated_at = Some(now);
        perms.synced_at = Some(now);
        Ok(())
    }

    async fn get_user_ids_by_external_accounts(
        &self,
        accounts: &ExternalAccountIds,
    ) -> Result<HashMap<String, UserId>> {
        let state = self.state.read();
        Ok(state
            .accounts
            .iter()
            .filter(|a| {
                a.spec.service_type == accounts.service_type
                    && a.spec.service_id == accounts.service_id
                    && accounts.account_ids.contains(&a.spec.account_id)
            })
            .map(|a| (a.spec.account_id.clone(), a.user_id))
            .collect())
    }

    async fn user_ids_with_no_perms(&self) -> Result<Vec<UserId>> {
        let state = self.state.read();
        Ok(state
            .users
            .keys()
            .filter(|id| state.user_perms.get(id).map_or(true, |p| p.synced_at.is_none()))
            .copied()
            .collect())
    }

    async fn repo_ids_with_no_perms(&self) -> Result<Vec<RepoId>> {
        let state = self.state.read();
        Ok(state
            .repos
            .values()
            .filter(|repo| repo.private)
            .filter(|repo| state.repo_perms.get(&repo.id).map_or(true, |p| p.synced_at.is_none()))
            .map(|repo| repo.id)
            .collect())
    }

    async fn user_ids_with_oldest_perms(
        &self,
        limit: usize,
    ) -> Result<Vec<(UserId, DateTime<Utc>)>> {
        let state = self.state.read();
        let entries = state
            .user_perms
            .values()
            .filter(|p| state.users.contains_key(&p.user_id))
            .map(|p| (p.user_id, p.synced_at));
        Ok(oldest(entries, limit))
    }

    async fn repo_ids_with_oldest_perms(
        &self,
        limit: usize,
    ) -> Result<Vec<(RepoId, DateTime<Utc>)>> {
        let state = self.state.read();
        let entries = state
            .repo_perms
            .values()
            .filter(|p| state.repos.contains_key(&p.repo_id))
            .map(|p| (p.repo_id, p.synced_at));
        Ok(oldest(entries, limit))
    }

    async fn list_external_accounts(&self, user_id: UserId) -> Result<Vec<ExternalAccount>> {
        Ok(self
            .state
            .read()
            .accounts
            .iter()
            .filter(|a| a.user_id == user_id && a.expired_at.is_none())
            .cloned()
            .collect())
    }

    async fn touch_expired(&self, account_id: i64) -> Result<()> {
        let now = self.now();
        self.state.write().account_mut(account_id)?.expired_at = Some(now);
        Ok(())
    }

    async fn touch_last_valid(&self, account_id: i64) -> Result<()> {
        let now = self.now();
        let mut state = self.state.write();
        let account = state.account_mut(account_id)?;
        account.last_valid_at = Some(now);
        account.expired_at = None;
        Ok(())
    }

    async fn metrics(&self, stale_after: Duration) -> Result<PermsMetrics> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| PermsSyncError::InvalidInput(format!("stale threshold: {e}")))?;
        let cutoff = self.now().checked_sub_signed(stale_after);

        let state = self.state.read();
        let user_synced = state.user_perms.values().filter_map(|p| p.synced_at);
        let repo_synced = state.repo_perms.values().filter_map(|p| p.synced_at);
        let (users_with_stale_perms, users_perms_gap_seconds) = staleness(user_synced, cutoff);
        let (repos_with_stale_perms, repos_perms_gap_seconds) = staleness(repo_synced, cutoff);

        Ok(PermsMetrics {
            users_with_stale_perms,
            users_perms_gap_seconds,
            repos_with_stale_perms,
            repos_perms_gap_seconds,
        })
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn get_user(&self, user_id: UserId) -> Result<User> {
        self.state
            .read()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PermsSyncError::NotFound(format!("user {user_id}")))
    }

    async fn list_verified_emails(&self, user_id: UserId) -> Result<Vec<String>> {
        Ok(self.state.read().emails.get(&user_id).cloned().unwrap_or_default())
    }

    async fn get_repo(&self, repo_id: RepoId) -> Result<Option<Repo>> {
        Ok(self.state.read().repos.get(&repo_id).cloned())
    }

    async fn list_private_repo_ids_by_specs(
        &self,
        specs: &[ExternalRepoSpec],
    ) -> Result<Vec<RepoId>> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: BTreeSet<&ExternalRepoSpec> = specs.iter().collect();
        Ok(self
            .state
            .read()
            .repos
            .values()
            .filter(|repo| repo.private && wanted.contains(&repo.external_repo))
            .map(|repo| repo.id)
            .collect())
    }

    async fn list_private_repo_ids_by_contains(
        &self,
        include: &[ExternalRepoSpec],
        exclude: &[ExternalRepoSpec],
    ) -> Result<Vec<RepoId>> {
        let compile = |specs: &[ExternalRepoSpec]| {
            specs
                .iter()
                .map(|spec| ContainsMatcher::new(&spec.service_id, &spec.id))
                .collect::<Result<Vec<_>>>()
        };
        let include = compile(include)?;
        let exclude = compile(exclude)?;
        let matches = |matchers: &[ContainsMatcher], repo: &Repo| {
            matchers
                .iter()
                .any(|m| m.matches(&repo.external_repo.service_id, &repo.external_repo.id))
        };

        let ids: Vec<RepoId> = self
            .state
            .read()
            .repos
            .values()
            .filter(|repo| repo.private && matches(&include, repo) && !matches(&exclude, repo))
            .map(|repo| repo.id)
            .collect();
        debug!(include = include.len(), exclude = exclude.len(), matched = ids.len(), "Contains lookup");
        Ok(ids)
    }

    async fn list_direct_grant_repo_ids_by_user(&self, user_id: UserId) -> Result<Vec<RepoId>> {
        Ok(self
            .state
            .read()
            .direct_grants
            .range((user_id, RepoId::MIN)..=(user_id, RepoId::MAX))
            .map(|&(_, repo_id)| repo_id)
            .collect())
    }

    async fn list_direct_grant_user_ids_by_repo(&self, repo_id: RepoId) -> Result<Vec<UserId>> {
        Ok(self
            .state
            .read()
            .direct_grants
            .iter()
            .filter(|&&(_, granted)| granted == repo_id)
            .map(|&(user_id, _)| user_id)
            .collect())
    }

    async fn list_user_external_services(
        &self,
        user_id: UserId,
        kinds: &[ExternalServiceKind],
    ) -> Result<Vec<ExternalService>> {
        Ok(self
            .state
            .read()
            .services
            .iter()
            .filter(|s| s.namespace_user_id == Some(user_id) && kinds.contains(&s.kind))
            .cloned()
            .collect())
    }

    async fn associate_user_and_save(
        &self,
        user_id: UserId,
        account: &ExternalAccount,
    ) -> Result<ExternalAccount> {
        let mut state = self.state.write();
        if !state.users.contains_key(&user_id) {
            return Err(PermsSyncError::NotFound(format!("user {user_id}")));
        }

        if let Some(existing) = state.accounts.iter_mut().find(|a| a.spec == account.spec) {
            if existing.user_id != user_id {
                return Err(PermsSyncError::InvalidInput(format!(
                    "external account {} is linked to user {}, not {user_id}",
                    existing.id, existing.user_id
                )));
            }
            existing.data.clone_from(&account.data);
            existing.expired_at = None;
            return Ok(existing.clone());
        }

        state.next_account_id += 1;
        let saved = ExternalAccount {
            id: state.next_account_id,
            user_id,
            expired_at: None,
            ..account.clone()
        };
        state.accounts.push(saved.clone());
        Ok(saved)
    }
}

/// Buffered repository write, applied atomically on commit
struct MemoryTransaction {
    state: Arc<RwLock<MemoryState>>,
    clock: Arc<dyn Clock>,
    repo_perms: Option<RepoPermissions>,
    pending: Vec<(ExternalAccountIds, RepoId)>,
}

#[async_trait]
impl PermsTransaction for MemoryTransaction {
    async fn set_repo_permissions(&mut self, perms: &RepoPermissions) -> Result<()> {
        self.repo_perms = Some(perms.clone());
        Ok(())
    }

    async fn set_repo_pending_permissions(
        &mut self,
        accounts: &ExternalAccountIds,
        perms: &RepoPermissions,
    ) -> Result<()> {
        self.pending.push((accounts.clone(), perms.repo_id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let now = self.clock.utc_now();
        let mut state = self.state.write();
        if let Some(perms) = &self.repo_perms {
            state.apply_repo_permissions(perms, now);
        }
        for (accounts, repo_id) in &self.pending {
            state.apply_pending(accounts, *repo_id);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("Discarding buffered repository permissions");
        Ok(())
    }
}
