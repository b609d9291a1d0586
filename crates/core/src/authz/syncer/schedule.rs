//! Periodic scheduling: pick the users and repositories most in need of a
//! refresh.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use permsync_domain::{Priority, RepoId, RequestMeta, RequestType, Result, ResultExt, UserId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::PermsSyncer;

/// A user picked by a scheduling pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledUser {
    /// Queue priority
    pub priority: Priority,
    /// The user
    pub user_id: UserId,
    /// Earliest time to sync; `None` for as soon as possible
    pub next_sync_at: Option<DateTime<Utc>>,
    /// The user has no stored permissions yet
    pub no_perms: bool,
}

/// A repository picked by a scheduling pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRepo {
    /// Queue priority
    pub priority: Priority,
    /// The repository
    pub repo_id: RepoId,
    /// Earliest time to sync; `None` for as soon as possible
    pub next_sync_at: Option<DateTime<Utc>>,
    /// The repository has no stored permissions yet
    pub no_perms: bool,
}

/// Result of a scheduling pass, in enqueue order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Users to sync
    pub users: Vec<ScheduledUser>,
    /// Repositories to sync
    pub repos: Vec<ScheduledRepo>,
}

impl Schedule {
    /// Number of scheduled entities
    pub fn len(&self) -> usize {
        self.users.len() + self.repos.len()
    }

    /// Whether nothing was scheduled
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.repos.is_empty()
    }
}

impl PermsSyncer {
    /// Compute the next scheduling pass.
    ///
    /// Order: users without permissions, private repositories without
    /// permissions, the oldest synced users, the oldest synced repositories.
    /// Entities without permissions are due immediately; oldest ones keep
    /// their last sync time. Everything is low priority so explicit requests
    /// go first.
    #[instrument(skip(self))]
    pub async fn schedule(&self) -> Result<Schedule> {
        let mut schedule = Schedule::default();

        let user_ids = self
            .perms_store
            .user_ids_with_no_perms()
            .await
            .context("load users with no permissions")?;
        self.observer.observe_no_perms(RequestType::User, user_ids.len());
        schedule.users.extend(user_ids.into_iter().map(|user_id| ScheduledUser {
            priority: Priority::Low,
            user_id,
            next_sync_at: None,
            no_perms: true,
        }));

        let repo_ids = self
            .perms_store
            .repo_ids_with_no_perms()
            .await
            .context("load repositories with no permissions")?;
        self.observer.observe_no_perms(RequestType::Repo, repo_ids.len());
        schedule.repos.extend(repo_ids.into_iter().map(|repo_id| ScheduledRepo {
            priority: Priority::Low,
            repo_id,
            next_sync_at: None,
            no_perms: true,
        }));

        let limit = self.options.oldest_perms_limit;

        let seen: HashSet<UserId> = schedule.users.iter().map(|u| u.user_id).collect();
        let oldest_users = self
            .perms_store
            .user_ids_with_oldest_perms(limit)
            .await
            .context("load users with oldest permissions")?;
        schedule.users.extend(
            oldest_users
                .into_iter()
                .filter(|(user_id, _)| !seen.contains(user_id))
                .map(|(user_id, synced_at)| ScheduledUser {
                    priority: Priority::Low,
                    user_id,
                    next_sync_at: Some(synced_at),
                    no_perms: false,
                }),
        );

        let seen: HashSet<RepoId> = schedule.repos.iter().map(|r| r.repo_id).collect();
        let oldest_repos = self
            .perms_store
            .repo_ids_with_oldest_perms(limit)
            .await
            .context("load repositories with oldest permissions")?;
        schedule.repos.extend(
            oldest_repos
                .into_iter()
                .filter(|(repo_id, _)| !seen.contains(repo_id))
                .map(|(repo_id, synced_at)| ScheduledRepo {
                    priority: Priority::Low,
                    repo_id,
                    next_sync_at: Some(synced_at),
                    no_perms: false,
                }),
        );

        debug!(users = schedule.users.len(), repos = schedule.repos.len(), "Computed schedule");
        Ok(schedule)
    }

    /// Enqueue a scheduling pass, users first.
    ///
    /// Stops early when `cancel` fires. Returns the number of entities
    /// enqueued.
    pub fn apply_schedule(&self, cancel: &CancellationToken, schedule: &Schedule) -> usize {
        let users = schedule.users.iter().map(|u| {
            RequestMeta::user(u.user_id, u.priority)
                .with_next_sync_at(u.next_sync_at)
                .with_no_perms(u.no_perms)
        });
        let repos = schedule.repos.iter().map(|r| {
            RequestMeta::repo(r.repo_id, r.priority)
                .with_next_sync_at(r.next_sync_at)
                .with_no_perms(r.no_perms)
        });

        let mut enqueued = 0;
        for meta in users.chain(repos) {
            if cancel.is_cancelled() {
                break;
            }
            self.queue.enqueue(meta);
            enqueued += 1;
        }
        enqueued
    }
}
