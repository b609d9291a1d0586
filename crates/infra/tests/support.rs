#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use permsync_core::{AuthzProvider, ProviderResult};
use permsync_domain::{
    AccountSpec, ExternalAccount, ExternalRepoSpec, ExternalRepository, ExternalUserPermissions,
    ProviderError, Repo, RepoId, User, UserId,
};
use permsync_infra::P4Executor;

pub const P4_PORT: &str = "ssl:perforce.example.com:1666";
pub const P4_SERVICE_ID: &str = "ssl:perforce.example.com:1666/";
pub const P4_URN: &str = "extsvc:perforce:1";

static TRACING: Once = Once::new();

/// Route tracing output through the test harness so it shows on failure.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    });
}

/// `p4` fake answering from canned output keyed by the joined arguments.
#[derive(Debug, Default)]
pub struct FakeP4 {
    responses: HashMap<String, ProviderResult<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeP4 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, args: &str, output: &str) -> Self {
        self.responses.insert(args.to_string(), Ok(output.to_string()));
        self
    }

    pub fn fail(mut self, args: &str, err: ProviderError) -> Self {
        self.responses.insert(args.to_string(), Err(err));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of times `args` ran.
    pub fn count(&self, args: &str) -> usize {
        self.calls.lock().iter().filter(|call| *call == args).count()
    }
}

#[async_trait]
impl P4Executor for FakeP4 {
    async fn exec(&self, args: &[&str]) -> ProviderResult<String> {
        let key = args.join(" ");
        self.calls.lock().push(key.clone());
        self.responses
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::Other(format!("unexpected p4 {key}"))))
    }
}

pub fn user(id: UserId, username: &str) -> User {
    User { id, username: username.into(), site_admin: false }
}

/// Repository on the Perforce test server.
pub fn depot(id: RepoId, path: &str, private: bool) -> Repo {
    Repo {
        id,
        name: format!("perforce.example.com/{}", path.trim_start_matches('/')),
        private,
        external_repo: ExternalRepoSpec {
            id: path.into(),
            service_type: "perforce".into(),
            service_id: P4_SERVICE_ID.into(),
        },
        sources: BTreeMap::from([(P4_URN.to_string(), format!("perforce://{P4_PORT}{path}"))]),
    }
}

pub fn account(user_id: UserId, service_type: &str, service_id: &str, account_id: &str) -> ExternalAccount {
    ExternalAccount {
        id: 0,
        user_id,
        spec: AccountSpec {
            service_type: service_type.into(),
            service_id: service_id.into(),
            client_id: String::new(),
            account_id: account_id.into(),
        },
        data: None,
        expired_at: None,
        last_valid_at: None,
    }
}

/// Provider reporting fixed exact grants, counting the calls it serves.
#[derive(Debug)]
pub struct StaticGrants {
    pub service_id: String,
    pub urn: String,
    pub user_repos: HashMap<String, Vec<String>>,
    pub repo_users: HashMap<String, Vec<String>>,
    pub calls: Mutex<Vec<String>>,
    /// Time each fetch takes after it is recorded.
    pub latency: Duration,
}

impl StaticGrants {
    pub fn github() -> Self {
        Self {
            service_id: "https://github.com/".into(),
            urn: "extsvc:github:1".into(),
            user_repos: HashMap::new(),
            repo_users: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    pub fn grant(mut self, account_id: &str, repo_external_id: &str) -> Self {
        self.user_repos.entry(account_id.into()).or_default().push(repo_external_id.into());
        self.repo_users.entry(repo_external_id.into()).or_default().push(account_id.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    async fn respond(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl AuthzProvider for StaticGrants {
    fn service_type(&self) -> &str {
        "github"
    }

    fn service_id(&self) -> &str {
        &self.service_id
    }

    fn urn(&self) -> &str {
        &self.urn
    }

    async fn fetch_account(
        &self,
        _user: &User,
        _current: &[ExternalAccount],
        _verified_emails: &[String],
    ) -> ProviderResult<Option<ExternalAccount>> {
        Ok(None)
    }

    async fn fetch_user_perms(
        &self,
        account: &ExternalAccount,
    ) -> ProviderResult<ExternalUserPermissions> {
        self.calls.lock().push(format!("user:{}", account.spec.account_id));
        self.respond().await;
        Ok(ExternalUserPermissions {
            exacts: self.user_repos.get(&account.spec.account_id).cloned().unwrap_or_default(),
            ..Default::default()
        })
    }

    async fn fetch_user_perms_by_token(
        &self,
        _token: &str,
    ) -> ProviderResult<ExternalUserPermissions> {
        Err(ProviderError::NotImplemented("tokens".into()))
    }

    async fn fetch_repo_perms(&self, repo: &ExternalRepository) -> ProviderResult<Vec<String>> {
        self.calls.lock().push(format!("repo:{}", repo.spec.id));
        self.respond().await;
        Ok(self.repo_users.get(&repo.spec.id).cloned().unwrap_or_default())
    }
}

/// Shared handle usable both as a provider and for inspection.
pub fn shared<P: AuthzProvider + 'static>(provider: P) -> (Arc<P>, Vec<Arc<dyn AuthzProvider>>) {
    let provider = Arc::new(provider);
    let erased: Arc<dyn AuthzProvider> = Arc::clone(&provider) as _;
    (provider, vec![erased])
}
