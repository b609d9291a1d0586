//! Integration tests for the Perforce authorization provider
//!
//! The provider talks to a scripted `p4` executor; protection tables mirror
//! what `p4 protects` prints on a real server.

mod support;

use std::sync::Arc;

use permsync_core::AuthzProvider;
use permsync_domain::{ExternalService, ExternalServiceKind, PermsSyncError, ProviderError};
use permsync_infra::{PerforceProvider, PerforceAccountData};
use serde_json::json;
use support::{depot, user, FakeP4, P4_PORT, P4_SERVICE_ID, P4_URN};

const USERS: &str = "\
alice <alice@example.com> (Alice) accessed 2020/12/04
bob <bob@example.com> (Bob) accessed 2020/12/04
carol <carol@example.com> (Carol) accessed 2021/01/11
dave <dave@example.com> (Dave) accessed 2021/02/01
";

const DEVS: &str = "\
Group:\tdevs
MaxResults:\tunset

Users:
\tbob
\tcarol
";

fn provider(p4: FakeP4) -> (PerforceProvider, Arc<FakeP4>) {
    let p4 = Arc::new(p4);
    let provider = PerforceProvider::new(P4_URN, P4_PORT, "admin", Arc::clone(&p4) as _);
    (provider, p4)
}

fn alice_account() -> permsync_domain::ExternalAccount {
    let mut account = support::account(1, "perforce", P4_SERVICE_ID, "alice@example.com");
    account.data = Some(json!({"username": "alice", "email": "alice@example.com"}));
    account
}

#[tokio::test]
async fn identity_follows_the_server_port() {
    let (provider, _) = provider(FakeP4::new());

    assert_eq!(provider.service_type(), "perforce");
    assert_eq!(provider.service_id(), P4_SERVICE_ID);
    assert_eq!(provider.urn(), P4_URN);
}

/// Validates account discovery by verified email.
///
/// Assertions:
/// - Confirms the matched email becomes the account ID.
/// - Confirms the username and email are stored as account data.
#[tokio::test]
async fn fetch_account_matches_verified_email() {
    support::init_tracing();
    let (provider, _) = provider(FakeP4::new().respond("users", USERS));

    let account = provider
        .fetch_account(&user(7, "bobby"), &[], &["nobody@example.com".into(), "bob@example.com".into()])
        .await
        .unwrap()
        .expect("bob should match");

    assert_eq!(account.user_id, 7);
    assert_eq!(account.spec.service_type, "perforce");
    assert_eq!(account.spec.service_id, P4_SERVICE_ID);
    assert_eq!(account.spec.account_id, "bob@example.com");
    let data: PerforceAccountData = serde_json::from_value(account.data.unwrap()).unwrap();
    assert_eq!(data, PerforceAccountData { username: "bob".into(), email: "bob@example.com".into() });
}

#[tokio::test]
async fn fetch_account_without_match_is_none() {
    let (provider, _) = provider(FakeP4::new().respond("users", USERS));

    let account = provider.fetch_account(&user(7, "eve"), &[], &["eve@example.com".into()]).await;

    assert_eq!(account, Ok(None));
}

/// Validates user permissions computed from `p4 protects -u`.
///
/// Assertions:
/// - Confirms an include with a nested exclusion keeps both patterns.
/// - Confirms an exact exclusion drops its include.
/// - Confirms exacts stay empty.
#[tokio::test]
async fn fetch_user_perms_reads_protection_table() {
    let (provider, p4) = provider(FakeP4::new().respond(
        "protects -u alice",
        "## generated\n\
         read user alice * //depot/a/...\n\
         read user alice * -//depot/a/sub/...\n\
         write group devs * //depot/b/...\n\
         list group devs * -//depot/b/...\n\
         open user alice * //depot/*/docs/... ## docs\n",
    ));

    let perms = provider.fetch_user_perms(&alice_account()).await.unwrap();

    assert!(perms.exacts.is_empty());
    assert_eq!(perms.include_contains, vec!["//depot/a/%", "//depot/[^/]+/docs/%"]);
    assert_eq!(perms.exclude_contains, vec!["//depot/a/sub/%"]);
    assert_eq!(p4.calls(), vec!["protects -u alice"]);
}

#[tokio::test]
async fn fetch_user_perms_requires_account_data_and_host() {
    let (provider, p4) = provider(FakeP4::new());

    let mut no_data = alice_account();
    no_data.data = None;
    assert!(matches!(provider.fetch_user_perms(&no_data).await, Err(ProviderError::Other(_))));

    let mut elsewhere = alice_account();
    elsewhere.spec.service_id = "other:1666/".into();
    assert!(matches!(provider.fetch_user_perms(&elsewhere).await, Err(ProviderError::Other(_))));

    assert!(p4.calls().is_empty());
}

#[tokio::test]
async fn executor_errors_pass_through() {
    let (provider, _) = provider(FakeP4::new().fail(
        "protects -u alice",
        ProviderError::Unauthorized("Perforce password (P4PASSWD) invalid or unset.".into()),
    ));

    let err = provider.fetch_user_perms(&alice_account()).await.unwrap_err();

    assert!(err.invalidates_credential());
}

#[tokio::test]
async fn fetch_user_perms_by_token_is_not_implemented() {
    let (provider, _) = provider(FakeP4::new());

    let result = provider.fetch_user_perms_by_token("token").await;

    assert!(matches!(result, Err(ProviderError::NotImplemented(_))));
}

/// Validates repository permissions computed from `p4 protects -a`.
///
/// Assertions:
/// - Confirms groups are expanded and later revokes win.
/// - Confirms users without a known email are dropped.
/// - Confirms the result is sorted by email.
#[tokio::test]
async fn fetch_repo_perms_applies_grants_and_revokes() {
    let (provider, _) = provider(
        FakeP4::new()
            .respond(
                "protects -a //depot/a/",
                "write user dave * //depot/a/...\n\
                 read group devs * //depot/a/...\n\
                 read user alice * //depot/a/...\n\
                 list user carol * -//depot/a/...\n\
                 read user ghost * //depot/a/...\n\
                 =open user dave * -//depot/a/...\n",
            )
            .respond("group -o devs", DEVS)
            .respond("users", USERS),
    );

    let ids = provider.fetch_repo_perms(&depot(10, "//depot/a/", true).to_external_repository()).await.unwrap();

    assert_eq!(ids, vec!["alice@example.com", "bob@example.com", "dave@example.com"]);
}

#[tokio::test]
async fn wildcard_user_grants_and_revokes_everyone() {
    let (provider, _) = provider(
        FakeP4::new()
            .respond("protects -a //depot/open/", "read user * * //depot/open/...\n")
            .respond(
                "protects -a //depot/closed/",
                "read user * * //depot/closed/...\n\
                 read user * * -//depot/closed/...\n\
                 read user carol * //depot/closed/...\n",
            )
            .respond("users", USERS),
    );

    let open = provider.fetch_repo_perms(&depot(1, "//depot/open/", true).to_external_repository()).await.unwrap();
    let closed =
        provider.fetch_repo_perms(&depot(2, "//depot/closed/", true).to_external_repository()).await.unwrap();

    assert_eq!(open.len(), 4);
    assert_eq!(closed, vec!["carol@example.com"]);
}

#[tokio::test]
async fn user_and_group_listings_are_cached() {
    let table = "read group devs * //depot/x/...\nread user * * //depot/x/...\n";
    let (provider, p4) = provider(
        FakeP4::new()
            .respond("protects -a //depot/x/", table)
            .respond("group -o devs", DEVS)
            .respond("users", USERS),
    );
    let repo = depot(3, "//depot/x/", true).to_external_repository();

    provider.fetch_repo_perms(&repo).await.unwrap();
    provider.fetch_repo_perms(&repo).await.unwrap();

    assert_eq!(p4.count("protects -a //depot/x/"), 2);
    assert_eq!(p4.count("group -o devs"), 1);
    assert_eq!(p4.count("users"), 1);
}

#[tokio::test]
async fn group_lookup_failure_fails_the_fetch() {
    let (provider, _) = provider(
        FakeP4::new()
            .respond("protects -a //depot/g/", "read group missing * //depot/g/...\n")
            .fail("group -o missing", ProviderError::Other("no such group".into())),
    );

    let err = provider
        .fetch_repo_perms(&depot(4, "//depot/g/", true).to_external_repository())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("missing"));
}

#[tokio::test]
async fn validate_reports_missing_super_access() {
    let (ok, _) = provider(FakeP4::new().respond("protects -u admin", ""));
    assert!(ok.validate().await.is_empty());

    let (denied, _) = provider(FakeP4::new().fail(
        "protects -u admin",
        ProviderError::Forbidden("You don't have permission for this operation.".into()),
    ));
    assert_eq!(denied.validate().await, vec!["the user does not have super access"]);

    let (down, _) = provider(FakeP4::new().fail("protects -u admin", ProviderError::Timeout("p4".into())));
    assert!(down.validate().await[0].starts_with("validate user access level"));
}

#[test]
fn from_service_reads_connection_settings() {
    let service = ExternalService {
        id: 5,
        kind: ExternalServiceKind::Perforce,
        display_name: "Perforce".into(),
        config: json!({"p4.port": P4_PORT, "p4.user": "admin", "p4.passwd": "secret"}),
        namespace_user_id: None,
    };

    let provider = PerforceProvider::from_service(&service).unwrap();
    assert_eq!(provider.urn(), "extsvc:perforce:5");
    assert_eq!(provider.service_id(), P4_SERVICE_ID);

    let incomplete = ExternalService { config: json!({"p4.port": P4_PORT}), ..service.clone() };
    assert!(matches!(PerforceProvider::from_service(&incomplete), Err(PermsSyncError::Config(_))));

    let github = ExternalService { kind: ExternalServiceKind::GitHub, ..service };
    assert!(matches!(PerforceProvider::from_service(&github), Err(PermsSyncError::InvalidInput(_))));
}
