//! Scripted authorization provider and recording rate limiter.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use permsync_core::{AuthzProvider, ProviderResult, RateLimiter};
use permsync_domain::{
    AccountSpec, ExternalAccount, ExternalRepository, ExternalUserPermissions, PermsSyncError,
    ProviderError, Result, User,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct ProviderScript {
    pub account_perms: HashMap<String, ProviderResult<ExternalUserPermissions>>,
    pub token_perms: HashMap<String, ProviderResult<ExternalUserPermissions>>,
    pub repo_perms: HashMap<String, ProviderResult<Vec<String>>>,
    pub discover: Option<ProviderResult<Option<ExternalAccount>>>,
    pub calls: Vec<String>,
}

/// Provider answering from a script keyed by account, token or repository.
#[derive(Debug)]
pub struct MockProvider {
    service_type: String,
    service_id: String,
    urn: String,
    pub script: Mutex<ProviderScript>,
}

impl MockProvider {
    pub fn new(service_type: &str, service_id: &str, urn: &str) -> Self {
        Self {
            service_type: service_type.into(),
            service_id: service_id.into(),
            urn: urn.into(),
            script: Mutex::new(ProviderScript::default()),
        }
    }

    pub fn github() -> Self {
        Self::new("github", "https://github.com/", "extsvc:github:1")
    }

    pub fn with_account_perms(
        self,
        account_id: &str,
        result: ProviderResult<ExternalUserPermissions>,
    ) -> Self {
        self.script.lock().account_perms.insert(account_id.into(), result);
        self
    }

    pub fn with_token_perms(
        self,
        token: &str,
        result: ProviderResult<ExternalUserPermissions>,
    ) -> Self {
        self.script.lock().token_perms.insert(token.into(), result);
        self
    }

    pub fn with_repo_perms(self, external_id: &str, result: ProviderResult<Vec<String>>) -> Self {
        self.script.lock().repo_perms.insert(external_id.into(), result);
        self
    }

    pub fn with_discovered_account(self, result: ProviderResult<Option<ExternalAccount>>) -> Self {
        self.script.lock().discover = Some(result);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    /// Account on this provider's code host.
    pub fn account(&self, id: i64, user_id: i32, account_id: &str) -> ExternalAccount {
        ExternalAccount {
            id,
            user_id,
            spec: AccountSpec {
                service_type: self.service_type.clone(),
                service_id: self.service_id.clone(),
                client_id: String::new(),
                account_id: account_id.into(),
            },
            data: None,
            expired_at: None,
            last_valid_at: None,
        }
    }
}

pub fn exacts(ids: &[&str]) -> ExternalUserPermissions {
    ExternalUserPermissions {
        exacts: ids.iter().map(|id| (*id).to_string()).collect(),
        ..Default::default()
    }
}

#[async_trait]
impl AuthzProvider for MockProvider {
    fn service_type(&self) -> &str {
        &self.service_type
    }

    fn service_id(&self) -> &str {
        &self.service_id
    }

    fn urn(&self) -> &str {
        &self.urn
    }

    async fn fetch_account(
        &self,
        user: &User,
        _current: &[ExternalAccount],
        _verified_emails: &[String],
    ) -> ProviderResult<Option<ExternalAccount>> {
        let mut script = self.script.lock();
        script.calls.push(format!("fetch_account:{}", user.id));
        script.discover.clone().unwrap_or(Ok(None))
    }

    async fn fetch_user_perms(
        &self,
        account: &ExternalAccount,
    ) -> ProviderResult<ExternalUserPermissions> {
        let mut script = self.script.lock();
        script.calls.push(format!("fetch_user_perms:{}", account.spec.account_id));
        script
            .account_perms
            .get(&account.spec.account_id)
            .cloned()
            .unwrap_or_else(|| Ok(ExternalUserPermissions::default()))
    }

    async fn fetch_user_perms_by_token(
        &self,
        token: &str,
    ) -> ProviderResult<ExternalUserPermissions> {
        let mut script = self.script.lock();
        script.calls.push(format!("fetch_user_perms_by_token:{token}"));
        script
            .token_perms
            .get(token)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::Unauthorized("unknown token".into())))
    }

    async fn fetch_repo_perms(&self, repo: &ExternalRepository) -> ProviderResult<Vec<String>> {
        let mut script = self.script.lock();
        script.calls.push(format!("fetch_repo_perms:{}", repo.spec.id));
        script
            .repo_perms
            .get(&repo.spec.id)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::NotFound(repo.uri.clone())))
    }
}

/// Rate limiter recording every wait.
#[derive(Debug, Default)]
pub struct MockRateLimiter {
    pub waits: Mutex<Vec<(String, u32)>>,
    pub refuse: bool,
}

#[async_trait]
impl RateLimiter for MockRateLimiter {
    async fn wait_n(&self, cancel: &CancellationToken, service_id: &str, n: u32) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PermsSyncError::Cancelled);
        }
        if self.refuse {
            return Err(PermsSyncError::RateLimit(format!("burst exceeded for {service_id}")));
        }
        self.waits.lock().push((service_id.to_string(), n));
        Ok(())
    }
}
