//! Fake user/repository directory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use permsync_core::DirectoryStore;
use permsync_domain::{
    ExternalAccount, ExternalRepoSpec, ExternalService, ExternalServiceKind, PermsSyncError,
    Repo, RepoId, Result, User, UserId,
};

#[derive(Debug, Default)]
pub struct DirectoryState {
    pub users: HashMap<UserId, User>,
    pub emails: HashMap<UserId, Vec<String>>,
    pub repos: HashMap<RepoId, Repo>,
    pub direct_repo_grants: HashMap<UserId, Vec<RepoId>>,
    pub direct_user_grants: HashMap<RepoId, Vec<UserId>>,
    pub services: Vec<ExternalService>,
    pub associated: Vec<ExternalAccount>,
    pub fail_associate: bool,
    pub spec_batches: Vec<usize>,
    pub contains_calls: usize,
}

#[derive(Debug, Default)]
pub struct MockDirectory {
    pub state: Mutex<DirectoryState>,
}

impl MockDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_state(f: impl FnOnce(&mut DirectoryState)) -> Arc<Self> {
        let directory = Self::default();
        f(&mut directory.state.lock());
        Arc::new(directory)
    }
}

pub fn user(id: UserId, username: &str) -> User {
    User { id, username: username.into(), site_admin: false }
}

/// Repository mirrored from the code host identified by `urn`
/// (`extsvc:<kind>:<id>`).
pub fn repo(id: RepoId, external_id: &str, service_id: &str, private: bool, urn: &str) -> Repo {
    let service_type = urn.split(':').nth(1).unwrap_or("github");
    Repo {
        id,
        name: format!("code.host/{external_id}"),
        private,
        external_repo: ExternalRepoSpec {
            id: external_id.into(),
            service_type: service_type.into(),
            service_id: service_id.into(),
        },
        sources: [(urn.to_string(), format!("https://{service_id}/{external_id}"))]
            .into_iter()
            .collect(),
    }
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('%') {
        Some(prefix) => value.starts_with(prefix),
        None => value.starts_with(pattern),
    }
}

#[async_trait]
impl DirectoryStore for MockDirectory {
    async fn get_user(&self, user_id: UserId) -> Result<User> {
        self.state
            .lock()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PermsSyncError::NotFound(format!("user {user_id}")))
    }

    async fn list_verified_emails(&self, user_id: UserId) -> Result<Vec<String>> {
        Ok(self.state.lock().emails.get(&user_id).cloned().unwrap_or_default())
    }

    async fn get_repo(&self, repo_id: RepoId) -> Result<Option<Repo>> {
        Ok(self.state.lock().repos.get(&repo_id).cloned())
    }

    async fn list_private_repo_ids_by_specs(
        &self,
        specs: &[ExternalRepoSpec],
    ) -> Result<Vec<RepoId>> {
        let mut state = self.state.lock();
        state.spec_batches.push(specs.len());
        let mut ids: Vec<RepoId> = state
            .repos
            .values()
            .filter(|r| r.private && specs.contains(&r.external_repo))
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn list_private_repo_ids_by_contains(
        &self,
        include: &[ExternalRepoSpec],
        exclude: &[ExternalRepoSpec],
    ) -> Result<Vec<RepoId>> {
        let mut state = self.state.lock();
        state.contains_calls += 1;
        let matches = |specs: &[ExternalRepoSpec], repo: &Repo| {
            specs.iter().any(|s| {
                s.service_id == repo.external_repo.service_id
                    && pattern_matches(&s.id, &repo.external_repo.id)
            })
        };
        let mut ids: Vec<RepoId> = state
            .repos
            .values()
            .filter(|r| r.private && matches(include, r) && !matches(exclude, r))
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn list_direct_grant_repo_ids_by_user(&self, user_id: UserId) -> Result<Vec<RepoId>> {
        Ok(self.state.lock().direct_repo_grants.get(&user_id).cloned().unwrap_or_default())
    }

    async fn list_direct_grant_user_ids_by_repo(&self, repo_id: RepoId) -> Result<Vec<UserId>> {
        Ok(self.state.lock().direct_user_grants.get(&repo_id).cloned().unwrap_or_default())
    }

    async fn list_user_external_services(
        &self,
        user_id: UserId,
        kinds: &[ExternalServiceKind],
    ) -> Result<Vec<ExternalService>> {
        Ok(self
            .state
            .lock()
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
        let mut state = self.state.lock();
        if state.fail_associate {
            return Err(PermsSyncError::Database("unique constraint violated".into()));
        }
        let mut saved = account.clone();
        saved.user_id = user_id;
        saved.id = 1_000 + i64::try_from(state.associated.len()).unwrap_or_default();
        state.associated.push(saved.clone());
        Ok(saved)
    }
}
