//! User-centric sync: which repositories can this user read?

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use permsync_domain::{
    bitmap_of, service_key, ExternalAccount, ExternalRepoSpec, ExternalService,
    ExternalServiceKind, ExternalUserPermissions, PermsSyncError, RepoId, RequestType, Result,
    ResultExt, User, UserId, UserPermissions,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use super::PermsSyncer;
use crate::authz::ports::AuthzProvider;

/// Where a user's permissions on one code host come from.
enum PermsSource {
    /// An account linked to the user
    Account(ExternalAccount),
    /// A code host connection owned by the user, queried with its token
    Service(ExternalService),
}

/// Repository identifiers reported by providers, tagged with their code host.
#[derive(Debug, Default)]
struct CollectedSpecs {
    exacts: Vec<ExternalRepoSpec>,
    include_contains: Vec<ExternalRepoSpec>,
    exclude_contains: Vec<ExternalRepoSpec>,
}

impl CollectedSpecs {
    fn add(&mut self, service_type: &str, service_id: &str, perms: ExternalUserPermissions) {
        let tag = |id: String| ExternalRepoSpec {
            id,
            service_type: service_type.to_owned(),
            service_id: service_id.to_owned(),
        };
        self.exacts.extend(perms.exacts.into_iter().map(tag));
        self.include_contains.extend(perms.include_contains.into_iter().map(tag));
        self.exclude_contains.extend(perms.exclude_contains.into_iter().map(tag));
    }
}

impl PermsSyncer {
    /// Fetch the user's permissions from every applicable provider and
    /// replace the stored set.
    ///
    /// With `no_perms` set the user has nothing stored yet, so provider
    /// failures other than credential errors are logged and whatever was
    /// collected is saved instead of failing the sync.
    #[instrument(skip(self, cancel))]
    pub async fn sync_user_perms(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
        no_perms: bool,
    ) -> Result<()> {
        let started = Instant::now();
        let result = self.fetch_and_store_user_perms(cancel, user_id, no_perms).await;
        self.observer.observe_sync(RequestType::User, result.is_ok(), started.elapsed());
        result
    }

    async fn fetch_and_store_user_perms(
        &self,
        cancel: &CancellationToken,
        user_id: UserId,
        no_perms: bool,
    ) -> Result<()> {
        let direct_repo_ids = self
            .directory
            .list_direct_grant_repo_ids_by_user(user_id)
            .await
            .context("list direct grant repository IDs by user")?;

        let user = self.directory.get_user(user_id).await.context("get user")?;
        let mut accounts = self
            .perms_store
            .list_external_accounts(user.id)
            .await
            .context("list external accounts")?;
        let emails = self
            .directory
            .list_verified_emails(user.id)
            .await
            .context("list verified emails")?;

        let providers = self.providers.providers();
        self.discover_accounts(&user, &providers, &mut accounts, &emails).await;

        let services = self
            .directory
            .list_user_external_services(
                user.id,
                &[ExternalServiceKind::GitHub, ExternalServiceKind::GitLab],
            )
            .await
            .context("list user external services")?;

        let by_service_id: HashMap<&str, &Arc<dyn AuthzProvider>> =
            providers.iter().map(|p| (p.service_id(), p)).collect();
        let by_urn: HashMap<&str, &Arc<dyn AuthzProvider>> =
            providers.iter().map(|p| (p.urn(), p)).collect();

        let sources = accounts
            .into_iter()
            .map(PermsSource::Account)
            .chain(services.into_iter().map(PermsSource::Service));

        let mut collected = CollectedSpecs::default();
        for source in sources {
            match source {
                PermsSource::Account(account) => {
                    let Some(provider) = by_service_id.get(account.spec.service_id.as_str())
                    else {
                        continue;
                    };
                    self.wait_for_rate_limit(cancel, provider.service_id()).await?;

                    match provider.fetch_user_perms(&account).await {
                        Ok(perms) => {
                            self.perms_store.touch_last_valid(account.id).await.with_context(
                                || format!("touch last valid for external account {}", account.id),
                            )?;
                            collected.add(provider.service_type(), provider.service_id(), perms);
                        }
                        Err(err) if err.invalidates_credential() => {
                            debug!(
                                account_id = account.id,
                                error = %err,
                                "Credential rejected, marking external account expired"
                            );
                            self.perms_store.touch_expired(account.id).await.with_context(
                                || format!("set expired for external account {}", account.id),
                            )?;
                        }
                        Err(err) => {
                            if !no_perms {
                                return Err(PermsSyncError::from(err)).with_context(|| {
                                    format!(
                                        "fetch user permissions for external account {}",
                                        account.id
                                    )
                                });
                            }
                            warn!(
                                account_id = account.id,
                                service_id = %account.spec.service_id,
                                error = %err,
                                "Failed to fetch user permissions, proceeding with partial results"
                            );
                        }
                    }
                }
                PermsSource::Service(service) => {
                    let urn = service.urn();
                    let Some(provider) = by_urn.get(urn.as_str()) else {
                        continue;
                    };
                    let token = match service.extract_token() {
                        Ok(token) if !token.is_empty() => token,
                        Ok(_) => {
                            warn!(urn = %urn, "External service has an empty token, skipping");
                            continue;
                        }
                        Err(err) => {
                            warn!(urn = %urn, error = %err, "Failed to extract token, skipping");
                            continue;
                        }
                    };
                    self.wait_for_rate_limit(cancel, provider.service_id()).await?;

                    match provider.fetch_user_perms_by_token(&token).await {
                        Ok(perms) => collected.add(provider.service_type(), provider.service_id(), perms),
                        Err(err) => {
                            warn!(
                                urn = %urn,
                                error = %err,
                                "Failed to fetch user permissions by token, skipping"
                            );
                        }
                    }
                }
            }
        }

        let mut repo_ids = self
            .list_private_repo_ids_by_exacts(&collected.exacts)
            .await
            .context("list external repositories by exact matching")?;

        // Exclusions only narrow inclusions; without inclusions there is
        // nothing to look up.
        if !collected.include_contains.is_empty() {
            let matched = self
                .directory
                .list_private_repo_ids_by_contains(
                    &collected.include_contains,
                    &collected.exclude_contains,
                )
                .await
                .context("list external repositories by contains matching")?;
            repo_ids.extend(matched);
        }
        repo_ids.extend(direct_repo_ids);

        let perms = UserPermissions::new(user.id, bitmap_of(repo_ids));
        self.perms_store.set_user_permissions(&perms).await.context("set user permissions")?;

        debug!(repo_count = perms.ids.len(), "Synced user permissions");
        Ok(())
    }

    /// Ask providers the user has no account with yet whether one exists,
    /// and link any account found. Failures are logged and skipped.
    async fn discover_accounts(
        &self,
        user: &User,
        providers: &[Arc<dyn AuthzProvider>],
        accounts: &mut Vec<ExternalAccount>,
        emails: &[String],
    ) {
        let linked: HashSet<String> = accounts.iter().map(ExternalAccount::service_key).collect();

        for provider in providers {
            if linked.contains(&service_key(provider.service_type(), provider.service_id())) {
                continue;
            }

            let account = match provider.fetch_account(user, accounts, emails).await {
                Ok(Some(account)) => account,
                Ok(None) => continue,
                Err(err) => {
                    error!(
                        user_id = user.id,
                        service_id = %provider.service_id(),
                        error = %err,
                        "Failed to fetch account from authorization provider"
                    );
                    continue;
                }
            };

            match self.directory.associate_user_and_save(user.id, &account).await {
                Ok(saved) => {
                    debug!(
                        user_id = user.id,
                        service_id = %provider.service_id(),
                        account_id = %saved.spec.account_id,
                        "Linked discovered external account"
                    );
                    accounts.push(saved);
                }
                Err(err) => {
                    error!(
                        user_id = user.id,
                        service_id = %provider.service_id(),
                        error = %err,
                        "Failed to associate discovered external account"
                    );
                }
            }
        }
    }

    /// Resolve exact specs in batches to keep each store query under its
    /// bind parameter limit.
    async fn list_private_repo_ids_by_exacts(
        &self,
        specs: &[ExternalRepoSpec],
    ) -> Result<Vec<RepoId>> {
        let mut repo_ids = Vec::with_capacity(specs.len());
        for batch in specs.chunks(self.options.repo_spec_batch_size) {
            repo_ids.extend(self.directory.list_private_repo_ids_by_specs(batch).await?);
        }
        Ok(repo_ids)
    }
}
