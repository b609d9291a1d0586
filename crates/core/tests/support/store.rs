//! Recording fake of the permissions store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use permsync_core::{PermsStore, PermsTransaction};
use permsync_domain::{
    ExternalAccount, ExternalAccountIds, PermsMetrics, PermsSyncError, RepoId, RepoPermissions,
    Result, UserId, UserPermissions,
};

#[derive(Debug, Default)]
pub struct StoreState {
    pub accounts: Vec<ExternalAccount>,
    pub account_users: HashMap<String, UserId>,
    pub user_perms: HashMap<UserId, UserPermissions>,
    pub repo_perms: HashMap<RepoId, RepoPermissions>,
    pub pending: HashMap<RepoId, ExternalAccountIds>,
    pub no_perms_users: Vec<UserId>,
    pub no_perms_repos: Vec<RepoId>,
    pub oldest_users: Vec<(UserId, DateTime<Utc>)>,
    pub oldest_repos: Vec<(RepoId, DateTime<Utc>)>,
    pub expired: Vec<i64>,
    pub last_valid: Vec<i64>,
    pub calls: Vec<&'static str>,
    pub fail_pending_write: bool,
    pub fail_set_user_permissions: bool,
}

/// Permissions store fake with a buffering transaction.
#[derive(Debug, Default)]
pub struct MockPermsStore {
    pub state: Arc<Mutex<StoreState>>,
}

impl MockPermsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_state(f: impl FnOnce(&mut StoreState)) -> Arc<Self> {
        let store = Self::default();
        f(&mut store.state.lock());
        Arc::new(store)
    }

    /// Number of times `name` was called.
    pub fn calls(&self, name: &str) -> usize {
        self.state.lock().calls.iter().filter(|call| **call == name).count()
    }

    pub fn user_perms(&self, user_id: UserId) -> Option<UserPermissions> {
        self.state.lock().user_perms.get(&user_id).cloned()
    }

    pub fn user_repo_ids(&self, user_id: UserId) -> Option<Vec<u32>> {
        self.user_perms(user_id).map(|p| p.ids.iter().collect())
    }

    pub fn repo_user_ids(&self, repo_id: RepoId) -> Option<Vec<u32>> {
        self.state.lock().repo_perms.get(&repo_id).map(|p| p.user_ids.iter().collect())
    }

    pub fn pending(&self, repo_id: RepoId) -> Option<ExternalAccountIds> {
        self.state.lock().pending.get(&repo_id).cloned()
    }

    fn record(&self, name: &'static str) {
        self.state.lock().calls.push(name);
    }
}

#[async_trait]
impl PermsStore for MockPermsStore {
    async fn set_user_permissions(&self, perms: &UserPermissions) -> Result<()> {
        self.record("set_user_permissions");
        let mut state = self.state.lock();
        if state.fail_set_user_permissions {
            return Err(PermsSyncError::Database("disk full".into()));
        }
        state.user_perms.insert(perms.user_id, perms.clone());
        Ok(())
    }

    async fn transact(&self) -> Result<Box<dyn PermsTransaction>> {
        self.record("transact");
        Ok(Box::new(MockTransaction {
            state: Arc::clone(&self.state),
            repo_perms: None,
            pending: None,
        }))
    }

    async fn touch_repo_permissions(&self, repo_id: RepoId) -> Result<()> {
        self.record("touch_repo_permissions");
        let _ = repo_id;
        Ok(())
    }

    async fn get_user_ids_by_external_accounts(
        &self,
        accounts: &ExternalAccountIds,
    ) -> Result<HashMap<String, UserId>> {
        self.record("get_user_ids_by_external_accounts");
        let state = self.state.lock();
        Ok(accounts
            .account_ids
            .iter()
            .filter_map(|id| state.account_users.get(id).map(|user| (id.clone(), *user)))
            .collect())
    }

    async fn user_ids_with_no_perms(&self) -> Result<Vec<UserId>> {
        self.record("user_ids_with_no_perms");
        Ok(self.state.lock().no_perms_users.clone())
    }

    async fn repo_ids_with_no_perms(&self) -> Result<Vec<RepoId>> {
        self.record("repo_ids_with_no_perms");
        Ok(self.state.lock().no_perms_repos.clone())
    }

    async fn user_ids_with_oldest_perms(
        &self,
        limit: usize,
    ) -> Result<Vec<(UserId, DateTime<Utc>)>> {
        self.record("user_ids_with_oldest_perms");
        Ok(self.state.lock().oldest_users.iter().take(limit).copied().collect())
    }

    async fn repo_ids_with_oldest_perms(
        &self,
        limit: usize,
    ) -> Result<Vec<(RepoId, DateTime<Utc>)>> {
        self.record("repo_ids_with_oldest_perms");
        Ok(self.state.lock().oldest_repos.iter().take(limit).copied().collect())
    }

    async fn list_external_accounts(&self, user_id: UserId) -> Result<Vec<ExternalAccount>> {
        self.record("list_external_accounts");
        Ok(self.state.lock().accounts.iter().filter(|a| a.user_id == user_id).cloned().collect())
    }

    async fn touch_expired(&self, account_id: i64) -> Result<()> {
        self.record("touch_expired");
        self.state.lock().expired.push(account_id);
        Ok(())
    }

    async fn touch_last_valid(&self, account_id: i64) -> Result<()> {
        self.record("touch_last_valid");
        self.state.lock().last_valid.push(account_id);
        Ok(())
    }

    async fn metrics(&self, _stale_after: Duration) -> Result<PermsMetrics> {
        self.record("metrics");
        Ok(PermsMetrics::default())
    }
}

struct MockTransaction {
    state: Arc<Mutex<StoreState>>,
    repo_perms: Option<RepoPermissions>,
    pending: Option<(RepoId, ExternalAccountIds)>,
}

#[async_trait]
impl PermsTransaction for MockTransaction {
    async fn set_repo_permissions(&mut self, perms: &RepoPermissions) -> Result<()> {
        self.state.lock().calls.push("set_repo_permissions");
        self.repo_perms = Some(perms.clone());
        Ok(())
    }

    async fn set_repo_pending_permissions(
        &mut self,
        accounts: &ExternalAccountIds,
        perms: &RepoPermissions,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push("set_repo_pending_permissions");
        if state.fail_pending_write {
            return Err(PermsSyncError::Database("deadlock detected".into()));
        }
        self.pending = Some((perms.repo_id, accounts.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push("commit");
        if let Some(perms) = self.repo_perms {
            state.repo_perms.insert(perms.repo_id, perms);
        }
        if let Some((repo_id, accounts)) = self.pending {
            state.pending.insert(repo_id, accounts);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.lock().calls.push("rollback");
        Ok(())
    }
}
