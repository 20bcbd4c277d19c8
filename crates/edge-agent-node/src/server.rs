//! Node server orchestration.
//!
//! Startup: registration, node configuration, user-manager lookup, initial
//! user sync, then the periodic tasks. Any startup failure is returned after
//! undoing whatever the failed start already did.
//!
//! Shutdown: close every periodic task (waiting for in-flight cycles), then
//! unregister. `start` and `close` never run concurrently.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use edge_agent_control::ControlPlaneClient;
use edge_agent_core::{NodeConfig, NodeIdentity, NodeType, UserRecord};
use edge_agent_store::IdentityStore;

use crate::call::bounded;
use crate::config::AgentConfig;
use crate::error::{NodeError, Result};
use crate::heartbeat::Heartbeat;
use crate::registration::{Registration, RegistrationState};
use crate::runtime::ProxyRuntime;
use crate::task::PeriodicTask;
use crate::traffic::TrafficReporter;
use crate::users::UserReconciler;

const NODE_TYPE: NodeType = NodeType::Trojan;

struct Inner {
    registration: Registration,
    tasks: Vec<PeriodicTask>,
    users: Option<Arc<UserReconciler>>,
    node_config: Option<NodeConfig>,
    running: bool,
}

/// Keeps one proxy runtime in sync with the control plane.
pub struct NodeServer {
    config: AgentConfig,
    client: Arc<dyn ControlPlaneClient>,
    runtime: Arc<dyn ProxyRuntime>,
    inner: Mutex<Inner>,
}

impl NodeServer {
    /// Create a stopped server.
    pub fn new(
        config: AgentConfig,
        client: Arc<dyn ControlPlaneClient>,
        store: Arc<dyn IdentityStore>,
        runtime: Arc<dyn ProxyRuntime>,
    ) -> Self {
        let registration = Registration::new(
            config.node_id,
            config.resolve_hostname(),
            config.server_port,
            config.request_timeout(),
            Arc::clone(&client),
            store,
        );
        Self {
            config,
            client,
            runtime,
            inner: Mutex::new(Inner {
                registration,
                tasks: Vec::new(),
                users: None,
                node_config: None,
                running: false,
            }),
        }
    }

    /// The agent configuration.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Start the server.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::AlreadyRunning`] if the server is running, or the
    /// first fatal startup failure: registration, node configuration fetch,
    /// missing user manager, or initial user fetch.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.running {
            return Err(NodeError::AlreadyRunning);
        }

        info!(node_id = %self.config.node_id, "Starting node server");
        match self.start_locked(&mut inner).await {
            Ok(()) => {
                inner.running = true;
                info!(
                    node_id = %self.config.node_id,
                    tasks = inner.tasks.len(),
                    "Node server started"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    node_id = %self.config.node_id,
                    error = %e,
                    error_kind = e.kind(),
                    "Node server failed to start"
                );
                self.close_locked(&mut inner).await;
                Err(e)
            }
        }
    }

    async fn start_locked(&self, inner: &mut Inner) -> Result<()> {
        let identity = inner.registration.start().await?;
        let register_id = identity.register_id;
        let timeout = self.config.request_timeout();

        let node_config = bounded(timeout, self.client.fetch_config(&register_id)).await?;
        let tag = node_config.inbound_tag(NODE_TYPE);
        info!(
            register_id = %register_id,
            tag = %tag,
            server_name = %node_config.server_name,
            "Fetched node configuration"
        );

        let proxy = self
            .runtime
            .user_manager(&tag)
            .ok_or_else(|| NodeError::MissingUserManager(tag.clone()))?;

        let users = Arc::new(UserReconciler::new(
            register_id.clone(),
            tag,
            timeout,
            Arc::clone(&self.client),
            proxy,
        ));
        users.start().await?;

        let traffic = Arc::new(TrafficReporter::new(
            register_id.clone(),
            timeout,
            Arc::clone(&self.client),
            self.runtime.counters(),
            Arc::clone(&users),
        ));

        inner.tasks.push(PeriodicTask::spawn(
            "fetch_users",
            self.config.fetch_users_interval(),
            users.clone(),
        ));
        inner.tasks.push(PeriodicTask::spawn(
            "report_traffic",
            self.config.report_traffic_interval(),
            traffic,
        ));
        if let Some(interval) = self.config.heartbeat_interval() {
            let heartbeat = Heartbeat::new(register_id, timeout, Arc::clone(&self.client));
            inner
                .tasks
                .push(PeriodicTask::spawn("heartbeat", interval, Arc::new(heartbeat)));
        }

        inner.users = Some(users);
        inner.node_config = Some(node_config);
        Ok(())
    }

    /// Stop the periodic tasks, then unregister.
    ///
    /// An unregister failure is logged; the persisted identity is kept for
    /// the next start. Calling `close` again does nothing.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        self.close_locked(&mut inner).await;
    }

    async fn close_locked(&self, inner: &mut Inner) {
        if !inner.tasks.is_empty() {
            join_all(inner.tasks.iter().map(|task| task.close())).await;
            inner.tasks.clear();
        }

        let was_registered = inner.registration.state() == RegistrationState::Registered;
        if let Err(e) = inner.registration.close().await {
            warn!(
                node_id = %self.config.node_id,
                error = %e,
                error_kind = e.kind(),
                "Failed to unregister node, keeping identity for next start"
            );
        }

        inner.users = None;
        inner.node_config = None;
        if inner.running || was_registered {
            info!(node_id = %self.config.node_id, "Node server closed");
        }
        inner.running = false;
    }

    /// Whether the server started and has not been closed.
    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }

    /// The active identity, if registered.
    pub async fn identity(&self) -> Option<NodeIdentity> {
        self.inner.lock().await.registration.identity().cloned()
    }

    /// The node configuration fetched at startup, while running.
    pub async fn node_config(&self) -> Option<NodeConfig> {
        self.inner.lock().await.node_config.clone()
    }

    /// The reconciler's current working set, while running.
    pub async fn users(&self) -> Option<Arc<[UserRecord]>> {
        self.inner
            .lock()
            .await
            .users
            .as_ref()
            .map(|users| users.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MemoryProxyRuntime;
    use edge_agent_control::{Failure, MockControlPlane, Op};
    use edge_agent_core::{NodeId, UserId};
    use edge_agent_store::MemoryIdentityStore;

    fn server(
        control: &Arc<MockControlPlane>,
        store: &Arc<MemoryIdentityStore>,
        runtime: &Arc<MemoryProxyRuntime>,
    ) -> NodeServer {
        let mut config = AgentConfig::new(NodeId::new(1));
        config.hostname = Some("edge-1".to_string());
        NodeServer::new(config, control.clone(), store.clone(), runtime.clone())
    }

    #[tokio::test]
    async fn start_and_close() {
        let control = Arc::new(MockControlPlane::new());
        control.set_users(vec![UserRecord::new(UserId::new(1), "a")]);
        let store = Arc::new(MemoryIdentityStore::new());
        let runtime = Arc::new(MemoryProxyRuntime::new());
        let inbound = runtime.add_inbound("trojan_443");
        let server = server(&control, &store, &runtime);

        server.start().await.unwrap();
        assert!(server.is_running().await);
        assert_eq!(inbound.user_count(), 1);
        assert_eq!(server.users().await.map(|u| u.len()), Some(1));
        assert_eq!(
            server.node_config().await.map(|c| c.server_port),
            Some(443)
        );

        server.close().await;
        assert!(!server.is_running().await);
        assert!(server.identity().await.is_none());
        assert_eq!(store.current(), None);
        assert_eq!(control.call_count(Op::Unregister), 1);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let control = Arc::new(MockControlPlane::new());
        let store = Arc::new(MemoryIdentityStore::new());
        let runtime = Arc::new(MemoryProxyRuntime::new());
        runtime.add_inbound("trojan_443");
        let server = server(&control, &store, &runtime);

        server.start().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(NodeError::AlreadyRunning)
        ));
        assert_eq!(control.call_count(Op::Register), 1);
        server.close().await;
    }

    #[tokio::test]
    async fn missing_user_manager_undoes_registration() {
        let control = Arc::new(MockControlPlane::new());
        let store = Arc::new(MemoryIdentityStore::new());
        let runtime = Arc::new(MemoryProxyRuntime::new());
        runtime.add_static_inbound("trojan_443");
        let server = server(&control, &store, &runtime);

        let err = server.start().await.unwrap_err();

        assert!(matches!(err, NodeError::MissingUserManager(ref tag) if tag == "trojan_443"));
        assert_eq!(err.kind(), "config");
        assert_eq!(control.call_count(Op::Unregister), 1);
        assert!(!server.is_running().await);
    }

    #[tokio::test]
    async fn initial_fetch_failure_is_fatal() {
        let control = Arc::new(MockControlPlane::new());
        control.fail(Op::FetchUsers, Failure::Client);
        let store = Arc::new(MemoryIdentityStore::new());
        let runtime = Arc::new(MemoryProxyRuntime::new());
        runtime.add_inbound("trojan_443");
        let server = server(&control, &store, &runtime);

        assert!(server.start().await.is_err());
        assert!(!server.is_running().await);
        assert_eq!(control.call_count(Op::Unregister), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let control = Arc::new(MockControlPlane::new());
        let store = Arc::new(MemoryIdentityStore::new());
        let runtime = Arc::new(MemoryProxyRuntime::new());
        runtime.add_inbound("trojan_443");
        let server = server(&control, &store, &runtime);

        server.start().await.unwrap();
        server.close().await;
        server.close().await;

        assert_eq!(control.call_count(Op::Unregister), 1);
    }
}
