//! Traffic reporting.
//!
//! Each cycle reads and resets the per-user counters of every user in the
//! reconciler's working set and submits the non-zero usage as one batch.
//! Counters are reset as they are read, before submission. A failed
//! submission is not retried and the counters are not restored, so usage is
//! never counted twice and at most one interval is lost.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use edge_agent_control::{ControlPlaneClient, TrafficReport};
use edge_agent_core::{CounterKind, RegisterId, TrafficSample, UserIdentity, UserRecord};

use crate::call::bounded;
use crate::error::Result;
use crate::runtime::CounterStore;
use crate::task::TaskAction;
use crate::users::UserReconciler;

/// Periodically submits per-user usage to the control plane.
pub struct TrafficReporter {
    register_id: RegisterId,
    timeout: Duration,
    client: Arc<dyn ControlPlaneClient>,
    counters: Arc<dyn CounterStore>,
    users: Arc<UserReconciler>,
}

impl TrafficReporter {
    /// Create a reporter for the users of `users`.
    pub fn new(
        register_id: RegisterId,
        timeout: Duration,
        client: Arc<dyn ControlPlaneClient>,
        counters: Arc<dyn CounterStore>,
        users: Arc<UserReconciler>,
    ) -> Self {
        Self {
            register_id,
            timeout,
            client,
            counters,
            users,
        }
    }

    /// Read and reset the counters of every user in the working set.
    ///
    /// Users whose counters are all zero or missing produce no sample.
    #[must_use]
    pub fn collect(&self) -> Vec<TrafficSample> {
        let tag = self.users.tag();
        self.users
            .snapshot()
            .iter()
            .map(|user| self.take_sample(tag, user))
            .filter(|sample| !sample.is_empty())
            .collect()
    }

    fn take_sample(&self, tag: &str, user: &UserRecord) -> TrafficSample {
        let identity = UserIdentity::derive(tag, user);
        let [upload, download, request_count] = CounterKind::ALL.map(|kind| {
            self.counters
                .take_counter(&identity.counter_name(kind))
                .unwrap_or(0)
        });
        TrafficSample {
            user_id: user.id,
            upload,
            download,
            request_count,
        }
    }

    /// Collect usage and submit it in one batch.
    ///
    /// Returns the number of samples submitted. Nothing is sent when no user
    /// has usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the submission fails. The counters stay reset.
    pub async fn run_cycle(&self) -> Result<usize> {
        let samples = self.collect();
        if samples.is_empty() {
            debug!(register_id = %self.register_id, "No traffic to report");
            return Ok(0);
        }

        let report = TrafficReport::new(samples);
        let count = report.samples.len();
        bounded(
            self.timeout,
            self.client.submit_traffic(&self.register_id, &report),
        )
        .await?;

        if let Some(stats) = report.stats {
            info!(
                register_id = %self.register_id,
                users = stats.user_count,
                upload = stats.upload_total,
                download = stats.download_total,
                "Reported traffic"
            );
        }
        Ok(count)
    }
}

#[async_trait]
impl TaskAction for TrafficReporter {
    async fn run(&self) -> Result<()> {
        self.run_cycle().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MemoryProxyRuntime, ProxyRuntime};
    use edge_agent_control::{Failure, MockControlPlane, Op};
    use edge_agent_core::{NodeStats, UserId};

    const TAG: &str = "trojan_443";

    struct Fixture {
        control: Arc<MockControlPlane>,
        runtime: MemoryProxyRuntime,
        reporter: TrafficReporter,
    }

    fn user(id: u64) -> UserRecord {
        UserRecord::new(UserId::new(id), format!("uuid-{id}"))
    }

    fn identity(id: u64) -> UserIdentity {
        UserIdentity::derive(TAG, &user(id))
    }

    async fn fixture(users: Vec<UserRecord>) -> Fixture {
        let control = Arc::new(MockControlPlane::new());
        let register_id = RegisterId::new("reg-1").unwrap();
        control.accept(register_id.clone());
        control.set_users(users);

        let runtime = MemoryProxyRuntime::new();
        let inbound = runtime.add_inbound(TAG);
        let timeout = Duration::from_secs(15);
        let reconciler = Arc::new(UserReconciler::new(
            register_id.clone(),
            TAG,
            timeout,
            control.clone(),
            inbound,
        ));
        reconciler.start().await.unwrap();

        let reporter = TrafficReporter::new(
            register_id,
            timeout,
            control.clone(),
            runtime.counters(),
            reconciler,
        );
        Fixture {
            control,
            runtime,
            reporter,
        }
    }

    #[tokio::test]
    async fn counters_reset_on_read() {
        let f = fixture(vec![user(1)]).await;
        f.runtime.record_traffic(&identity(1), 100, 40, 3);

        assert_eq!(f.reporter.run_cycle().await.unwrap(), 1);

        let counters = f.runtime.counters();
        let upload = identity(1).counter_name(CounterKind::Uplink);
        assert_eq!(counters.get_counter(&upload), Some(0));
        assert!(f.reporter.collect().is_empty());
    }

    #[tokio::test]
    async fn report_contents_and_stats() {
        let f = fixture(vec![user(1), user(2)]).await;
        f.runtime.record_traffic(&identity(1), 100, 40, 3);
        f.runtime.record_traffic(&identity(2), 5, 0, 0);

        f.reporter.run_cycle().await.unwrap();

        let reports = f.control.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].samples,
            vec![
                TrafficSample {
                    user_id: UserId::new(1),
                    upload: 100,
                    download: 40,
                    request_count: 3,
                },
                TrafficSample {
                    user_id: UserId::new(2),
                    upload: 5,
                    download: 0,
                    request_count: 0,
                },
            ]
        );
        assert_eq!(
            reports[0].stats,
            Some(NodeStats {
                user_count: 2,
                upload_total: 105,
                download_total: 40,
            })
        );
    }

    #[tokio::test]
    async fn idle_users_are_not_reported() {
        let f = fixture(vec![user(1), user(2), user(3)]).await;
        f.runtime.record_traffic(&identity(2), 0, 7, 0);
        // Present but zero.
        f.runtime
            .memory_counters()
            .add(&identity(3).counter_name(CounterKind::Uplink), 0);

        f.reporter.run_cycle().await.unwrap();

        let samples = &f.control.reports()[0].samples;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].user_id, UserId::new(2));
    }

    #[tokio::test]
    async fn nothing_submitted_without_usage() {
        let f = fixture(vec![user(1)]).await;

        assert_eq!(f.reporter.run_cycle().await.unwrap(), 0);
        assert_eq!(f.control.call_count(Op::SubmitTraffic), 0);
    }

    #[tokio::test]
    async fn failed_submission_does_not_restore_counters() {
        let f = fixture(vec![user(1)]).await;
        f.runtime.record_traffic(&identity(1), 100, 0, 0);
        f.control.fail(Op::SubmitTraffic, Failure::Server);

        assert!(f.reporter.run_cycle().await.is_err());

        f.control.recover(Op::SubmitTraffic);
        f.runtime.record_traffic(&identity(1), 1, 0, 0);
        f.reporter.run_cycle().await.unwrap();

        let reports = f.control.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].samples[0].upload, 1);
    }

    #[tokio::test]
    async fn users_outside_working_set_are_ignored() {
        let f = fixture(vec![user(1)]).await;
        f.runtime.record_traffic(&identity(9), 50, 50, 1);

        assert!(f.reporter.collect().is_empty());
    }
}
