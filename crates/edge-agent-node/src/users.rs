//! User reconciliation.
//!
//! Keeps the proxy inbound's authorized users equal to the control plane's
//! list. Users are compared by `(id, uuid)`: a changed credential for the same
//! ID is a removal of the old identity followed by an addition of the new one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use edge_agent_control::{ControlError, ControlPlaneClient};
use edge_agent_core::{RegisterId, UserId, UserIdentity, UserRecord};

use crate::call::bounded;
use crate::error::Result;
use crate::runtime::{ProxyUser, UserManagedProxy};
use crate::task::TaskAction;

/// Users to remove from and add to the proxy runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDiff {
    /// Users in the working set but not in the fetched list.
    pub deleted: Vec<UserRecord>,
    /// Users in the fetched list but not in the working set.
    pub added: Vec<UserRecord>,
}

impl UserDiff {
    /// Whether there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.added.is_empty()
    }
}

/// Compute the users to delete and add to go from `working` to `fetched`.
///
/// Order follows the input lists; duplicate identities appear once.
#[must_use]
pub fn diff_users(working: &[UserRecord], fetched: &[UserRecord]) -> UserDiff {
    UserDiff {
        deleted: missing_from(working, fetched),
        added: missing_from(fetched, working),
    }
}

fn missing_from(source: &[UserRecord], other: &[UserRecord]) -> Vec<UserRecord> {
    let other: HashSet<(UserId, &str)> = other.iter().map(UserRecord::key).collect();
    let mut seen = HashSet::new();
    source
        .iter()
        .filter(|u| !other.contains(&u.key()) && seen.insert(u.key()))
        .cloned()
        .collect()
}

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The control plane reported no change since the last fetch.
    NotModified,
    /// The diff was applied.
    Applied {
        /// Users added to the proxy runtime.
        added: usize,
        /// Users removed from the proxy runtime.
        removed: usize,
        /// Adds or removals the proxy runtime rejected.
        failed: usize,
    },
}

/// Applies the control plane's user list to one proxy inbound.
///
/// The reconciler exclusively owns the working set; other components read it
/// through [`snapshot`](Self::snapshot).
pub struct UserReconciler {
    register_id: RegisterId,
    tag: String,
    timeout: Duration,
    client: Arc<dyn ControlPlaneClient>,
    proxy: Arc<dyn UserManagedProxy>,
    working: RwLock<Arc<[UserRecord]>>,
}

impl UserReconciler {
    /// Create a reconciler for the inbound `tag` with an empty working set.
    pub fn new(
        register_id: RegisterId,
        tag: impl Into<String>,
        timeout: Duration,
        client: Arc<dyn ControlPlaneClient>,
        proxy: Arc<dyn UserManagedProxy>,
    ) -> Self {
        Self {
            register_id,
            tag: tag.into(),
            timeout,
            client,
            proxy,
            working: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// The inbound tag users are applied to.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The current working set.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[UserRecord]> {
        Arc::clone(&self.working.read())
    }

    /// Initial full sync: add every fetched user and adopt the list as the
    /// working set.
    ///
    /// Returns the number of users added.
    ///
    /// # Errors
    ///
    /// Returns an error if the user list cannot be fetched, including a
    /// "not modified" answer, since there is no baseline to keep.
    pub async fn start(&self) -> Result<usize> {
        let fetched = bounded(self.timeout, self.client.fetch_users(&self.register_id)).await?;

        let diff = diff_users(&[], &fetched);
        let (added, failed) = self.add_all(&diff.added);
        *self.working.write() = Arc::from(fetched);

        info!(
            register_id = %self.register_id,
            tag = %self.tag,
            added,
            failed,
            "Initial user sync complete"
        );
        Ok(added)
    }

    /// One fetch-diff-apply pass.
    ///
    /// Removals are applied before additions. Individual failures are logged
    /// and the remaining users are still applied; the working set becomes the
    /// fetched list regardless.
    ///
    /// # Errors
    ///
    /// Returns an error if the user list cannot be fetched.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let fetched = match bounded(self.timeout, self.client.fetch_users(&self.register_id)).await
        {
            Ok(users) => users,
            Err(ControlError::NotModified) => {
                debug!(tag = %self.tag, "User list not modified");
                return Ok(CycleOutcome::NotModified);
            }
            Err(e) => return Err(e.into()),
        };

        let diff = diff_users(&self.snapshot(), &fetched);
        let (removed, remove_failed) = self.remove_all(&diff.deleted);
        let (added, add_failed) = self.add_all(&diff.added);
        *self.working.write() = Arc::from(fetched);

        let failed = remove_failed + add_failed;
        if diff.is_empty() {
            debug!(tag = %self.tag, "Users already in sync");
        } else {
            info!(tag = %self.tag, added, removed, failed, "Reconciled users");
        }
        Ok(CycleOutcome::Applied {
            added,
            removed,
            failed,
        })
    }

    fn remove_all(&self, users: &[UserRecord]) -> (usize, usize) {
        let mut failed = 0;
        for user in users {
            let identity = UserIdentity::derive(&self.tag, user);
            if let Err(e) = self.proxy.remove_user(&identity) {
                warn!(user_id = %user.id, tag = %self.tag, error = %e, "Failed to remove user");
                failed += 1;
            }
        }
        (users.len() - failed, failed)
    }

    fn add_all(&self, users: &[UserRecord]) -> (usize, usize) {
        let mut failed = 0;
        for user in users {
            let proxy_user = ProxyUser {
                identity: UserIdentity::derive(&self.tag, user),
                credential: user.uuid.clone(),
            };
            if let Err(e) = self.proxy.add_user(proxy_user) {
                warn!(user_id = %user.id, tag = %self.tag, error = %e, "Failed to add user");
                failed += 1;
            }
        }
        (users.len() - failed, failed)
    }
}

#[async_trait]
impl TaskAction for UserReconciler {
    async fn run(&self) -> Result<()> {
        self.run_cycle().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MemoryInbound, MemoryProxyRuntime};
    use edge_agent_control::{Failure, MockControlPlane, Op};

    const TAG: &str = "trojan_443";

    fn user(id: u64, uuid: &str) -> UserRecord {
        UserRecord::new(UserId::new(id), uuid)
    }

    fn identity(id: u64, uuid: &str) -> UserIdentity {
        UserIdentity::derive(TAG, &user(id, uuid))
    }

    struct Fixture {
        control: Arc<MockControlPlane>,
        inbound: Arc<MemoryInbound>,
        reconciler: UserReconciler,
    }

    fn fixture(users: Vec<UserRecord>) -> Fixture {
        let control = Arc::new(MockControlPlane::new());
        let register_id = RegisterId::new("reg-1").unwrap();
        control.accept(register_id.clone());
        control.set_users(users);

        let runtime = MemoryProxyRuntime::new();
        let inbound = runtime.add_inbound(TAG);
        let reconciler = UserReconciler::new(
            register_id,
            TAG,
            Duration::from_secs(15),
            control.clone(),
            inbound.clone(),
        );
        Fixture {
            control,
            inbound,
            reconciler,
        }
    }

    #[test]
    fn diff_example() {
        let working = [user(1, "a"), user(2, "b")];
        let fetched = [user(2, "b"), user(3, "c")];

        let diff = diff_users(&working, &fetched);

        assert_eq!(diff.deleted, vec![user(1, "a")]);
        assert_eq!(diff.added, vec![user(3, "c")]);
    }

    #[test]
    fn diff_treats_credential_change_as_replace() {
        let diff = diff_users(&[user(1, "old")], &[user(1, "new")]);
        assert_eq!(diff.deleted, vec![user(1, "old")]);
        assert_eq!(diff.added, vec![user(1, "new")]);
    }

    #[test]
    fn diff_ignores_limit_changes_and_duplicates() {
        let mut limited = user(1, "a");
        limited.speed_limit = Some(1_000);

        let diff = diff_users(&[user(1, "a")], &[limited, user(2, "b"), user(2, "b")]);

        assert!(diff.deleted.is_empty());
        assert_eq!(diff.added, vec![user(2, "b")]);
        assert!(diff_users(&[user(1, "a")], &[user(1, "a")]).is_empty());
    }

    #[tokio::test]
    async fn start_adds_every_user() {
        let f = fixture(vec![user(1, "a"), user(2, "b")]);

        assert_eq!(f.reconciler.start().await.unwrap(), 2);

        assert_eq!(f.inbound.identities(), vec![identity(1, "a"), identity(2, "b")]);
        assert_eq!(f.inbound.credential(&identity(1, "a")).as_deref(), Some("a"));
        assert_eq!(f.reconciler.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn start_fetch_failure_is_fatal() {
        let f = fixture(vec![user(1, "a")]);
        f.control.fail(Op::FetchUsers, Failure::Server);

        assert!(f.reconciler.start().await.is_err());
        assert_eq!(f.inbound.user_count(), 0);
    }

    #[tokio::test]
    async fn cycle_applies_diff() {
        let f = fixture(vec![user(1, "a"), user(2, "b")]);
        f.reconciler.start().await.unwrap();

        f.control.set_users(vec![user(2, "b"), user(3, "c")]);
        let outcome = f.reconciler.run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Applied {
                added: 1,
                removed: 1,
                failed: 0
            }
        );
        assert_eq!(f.inbound.identities(), vec![identity(2, "b"), identity(3, "c")]);
    }

    #[tokio::test]
    async fn unchanged_list_is_idempotent() {
        let f = fixture(vec![user(1, "a")]);
        f.reconciler.start().await.unwrap();

        f.control.set_users(vec![user(1, "a"), user(2, "b")]);
        f.reconciler.run_cycle().await.unwrap();
        let second = f.reconciler.run_cycle().await.unwrap();

        assert_eq!(
            second,
            CycleOutcome::Applied {
                added: 0,
                removed: 0,
                failed: 0
            }
        );
        assert_eq!(f.inbound.user_count(), 2);
    }

    #[tokio::test]
    async fn credential_rotation_removes_old_identity() {
        let f = fixture(vec![user(1, "old")]);
        f.reconciler.start().await.unwrap();

        f.control.set_users(vec![user(1, "new")]);
        f.reconciler.run_cycle().await.unwrap();

        assert_eq!(f.inbound.identities(), vec![identity(1, "new")]);
    }

    #[tokio::test]
    async fn not_modified_is_a_no_op() {
        let f = fixture(vec![user(1, "a")]);
        f.reconciler.start().await.unwrap();

        f.control.set_users(Vec::new());
        f.control.set_users_not_modified(true);

        assert_eq!(
            f.reconciler.run_cycle().await.unwrap(),
            CycleOutcome::NotModified
        );
        assert_eq!(f.inbound.user_count(), 1);
        assert_eq!(f.reconciler.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_working_set() {
        let f = fixture(vec![user(1, "a")]);
        f.reconciler.start().await.unwrap();
        f.control.fail(Op::FetchUsers, Failure::Timeout);

        let err = f.reconciler.run_cycle().await.unwrap_err();

        assert!(err.is_server_error());
        assert_eq!(f.reconciler.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn partial_failure_applies_the_rest() {
        let f = fixture(vec![user(1, "a"), user(2, "b")]);
        f.reconciler.start().await.unwrap();
        f.inbound.reject(identity(1, "a"));
        f.inbound.reject(identity(4, "d"));

        f.control
            .set_users(vec![user(2, "b"), user(3, "c"), user(4, "d"), user(5, "e")]);
        let outcome = f.reconciler.run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Applied {
                added: 2,
                removed: 0,
                failed: 2
            }
        );
        assert!(f.inbound.contains(&identity(3, "c")));
        assert!(f.inbound.contains(&identity(5, "e")));
        assert!(!f.inbound.contains(&identity(4, "d")));
        assert_eq!(f.reconciler.snapshot().len(), 4);
    }
}
