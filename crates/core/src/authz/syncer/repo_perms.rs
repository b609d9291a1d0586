//! Repository-centric sync: which users can read this repository?

use std::collections::BTreeSet;
use std::time::Instant;

use permsync_domain::{
    bitmap_of, ExternalAccountIds, PermsSyncError, RepoId, RepoPermissions, RequestType, Result,
    ResultExt,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::PermsSyncer;
use crate::authz::ports::PermsTransaction;

impl PermsSyncer {
    /// Fetch the repository's authorized accounts from its provider and
    /// replace the stored user set and pending accounts.
    ///
    /// Public repositories and repositories without a matching provider only
    /// get their sync timestamp bumped, so the scheduler does not pick them
    /// again right away.
    #[instrument(skip(self, cancel))]
    pub async fn sync_repo_perms(
        &self,
        cancel: &CancellationToken,
        repo_id: RepoId,
        no_perms: bool,
    ) -> Result<()> {
        let started = Instant::now();
        let result = self.fetch_and_store_repo_perms(cancel, repo_id, no_perms).await;
        self.observer.observe_sync(RequestType::Repo, result.is_ok(), started.elapsed());
        result
    }

    async fn fetch_and_store_repo_perms(
        &self,
        cancel: &CancellationToken,
        repo_id: RepoId,
        no_perms: bool,
    ) -> Result<()> {
        let Some(repo) = self.directory.get_repo(repo_id).await.context("get repository")? else {
            debug!("Repository no longer exists, nothing to sync");
            return Ok(());
        };

        let mut user_ids = Vec::new();
        let mut provider = None;
        if repo.private {
            user_ids = self
                .directory
                .list_direct_grant_user_ids_by_repo(repo.id)
                .await
                .context("list direct grant user IDs by repository")?;

            let providers = self.providers.providers();
            provider = repo
                .sources
                .keys()
                .find_map(|urn| providers.iter().find(|p| p.urn() == urn.as_str()).cloned());
        }

        let Some(provider) = provider else {
            debug!(private = repo.private, "No authorization provider applies, touching permissions");
            return self
                .perms_store
                .touch_repo_permissions(repo.id)
                .await
                .context("touch repository permissions");
        };

        self.wait_for_rate_limit(cancel, provider.service_id()).await?;

        let account_ids = match provider.fetch_repo_perms(&repo.to_external_repository()).await {
            Ok(account_ids) => account_ids,
            Err(err) if err.is_not_found() || err.is_unauthorized() => {
                // Usually a credential without permission to list
                // collaborators. Retrying will not help until it changes.
                warn!(
                    repo = %repo.name,
                    service_id = %provider.service_id(),
                    error = %err,
                    "Code host refused the repository permissions query, check that the \
                     configured token can read repository collaborators"
                );
                return self
                    .perms_store
                    .touch_repo_permissions(repo.id)
                    .await
                    .context("touch repository permissions");
            }
            Err(err) => {
                if !no_perms {
                    return Err(PermsSyncError::from(err))
                        .context("fetch repository permissions");
                }
                warn!(
                    repo = %repo.name,
                    error = %err,
                    "Failed to fetch repository permissions, proceeding with partial results"
                );
                Vec::new()
            }
        };

        let mut pending: BTreeSet<String> = account_ids.iter().cloned().collect();
        if !account_ids.is_empty() {
            let lookup = ExternalAccountIds {
                service_type: provider.service_type().to_owned(),
                service_id: provider.service_id().to_owned(),
                account_ids,
            };
            let linked = self
                .perms_store
                .get_user_ids_by_external_accounts(&lookup)
                .await
                .context("get user IDs by external accounts")?;
            for (account_id, user_id) in linked {
                pending.remove(&account_id);
                user_ids.push(user_id);
            }
        }

        let perms = RepoPermissions::new(repo.id, bitmap_of(user_ids));
        let pending_accounts = ExternalAccountIds {
            service_type: provider.service_type().to_owned(),
            service_id: provider.service_id().to_owned(),
            account_ids: pending.into_iter().collect(),
        };

        let mut tx = self.perms_store.transact().await.context("start transaction")?;
        let written = write_repo_perms(tx.as_mut(), &perms, &pending_accounts).await;
        finish_transaction(tx, written).await?;

        debug!(
            user_count = perms.user_ids.len(),
            pending_count = pending_accounts.account_ids.len(),
            "Synced repository permissions"
        );
        Ok(())
    }
}

async fn write_repo_perms(
    tx: &mut dyn PermsTransaction,
    perms: &RepoPermissions,
    pending: &ExternalAccountIds,
) -> Result<()> {
    tx.set_repo_permissions(perms).await.context("set repository permissions")?;
    tx.set_repo_pending_permissions(pending, perms)
        .await
        .context("set repository pending permissions")
}

async fn finish_transaction(tx: Box<dyn PermsTransaction>, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => tx.commit().await.context("commit transaction"),
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Failed to roll back permissions transaction");
            }
            Err(err)
        }
    }
}
