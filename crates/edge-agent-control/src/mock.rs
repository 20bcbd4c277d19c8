//! In-memory control plane for testing without a real server.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use edge_agent_core::{NodeConfig, NodeId, RegisterId, UserRecord};

use crate::client::ControlPlaneClient;
use crate::error::{ControlError, Result};
use crate::types::TrafficReport;

/// A failure the mock can be told to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// A 5xx response.
    Server,
    /// A 4xx response.
    Client,
    /// A timed-out call.
    Timeout,
}

impl Failure {
    fn to_error(self) -> ControlError {
        match self {
            Self::Server => ControlError::Server {
                status: 500,
                message: "injected server error".to_string(),
            },
            Self::Client => ControlError::Client {
                status: 400,
                message: "injected client error".to_string(),
            },
            Self::Timeout => ControlError::Timeout,
        }
    }
}

/// A control-plane operation, used to target failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `register`
    Register,
    /// `verify`
    Verify,
    /// `unregister`
    Unregister,
    /// `fetch_config`
    FetchConfig,
    /// `fetch_users`
    FetchUsers,
    /// `submit_traffic`
    SubmitTraffic,
    /// `heartbeat`
    Heartbeat,
}

#[derive(Debug, Default)]
struct MockState {
    next_register: u32,
    valid_registrations: HashSet<RegisterId>,
    users: Vec<UserRecord>,
    users_not_modified: bool,
    failures: Vec<(Op, Failure)>,
    calls: Vec<Op>,
    reports: Vec<TrafficReport>,
    registered_hosts: Vec<(NodeId, String, u16)>,
}

/// A control plane that keeps its state in memory.
///
/// Registrations are numbered `reg-1`, `reg-2`, ...; only registrations
/// issued by this mock (or added with [`MockControlPlane::accept`]) verify.
#[derive(Debug)]
pub struct MockControlPlane {
    state: Mutex<MockState>,
    config: NodeConfig,
    delay: Mutex<Option<Duration>>,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControlPlane {
    /// Create a mock serving an empty user list on port 443.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            config: NodeConfig {
                server_port: 443,
                server_name: "edge.test".to_string(),
                allow_insecure: false,
            },
            delay: Mutex::new(None),
        }
    }

    /// Replace the authoritative user list.
    pub fn set_users(&self, users: Vec<UserRecord>) {
        self.state.lock().users = users;
    }

    /// Make `fetch_users` report "not modified".
    pub fn set_users_not_modified(&self, not_modified: bool) {
        self.state.lock().users_not_modified = not_modified;
    }

    /// Make every future call of `op` fail with `failure`.
    pub fn fail(&self, op: Op, failure: Failure) {
        let mut state = self.state.lock();
        state.failures.retain(|(o, _)| *o != op);
        state.failures.push((op, failure));
    }

    /// Stop failing calls of `op`.
    pub fn recover(&self, op: Op) {
        self.state.lock().failures.retain(|(o, _)| *o != op);
    }

    /// Delay every call by `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Treat `register_id` as a live registration.
    pub fn accept(&self, register_id: RegisterId) {
        self.state.lock().valid_registrations.insert(register_id);
    }

    /// Whether `register_id` is a live registration.
    #[must_use]
    pub fn is_registered(&self, register_id: &RegisterId) -> bool {
        self.state.lock().valid_registrations.contains(register_id)
    }

    /// Number of calls made to `op`.
    #[must_use]
    pub fn call_count(&self, op: Op) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// Every call in the order it was made.
    #[must_use]
    pub fn calls(&self) -> Vec<Op> {
        self.state.lock().calls.clone()
    }

    /// Reports accepted by `submit_traffic`.
    #[must_use]
    pub fn reports(&self) -> Vec<TrafficReport> {
        self.state.lock().reports.clone()
    }

    /// Arguments of every successful registration.
    #[must_use]
    pub fn registrations(&self) -> Vec<(NodeId, String, u16)> {
        self.state.lock().registered_hosts.clone()
    }

    async fn enter(&self, op: Op) -> Result<()> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.calls.push(op);
        match state.failures.iter().find(|(o, _)| *o == op) {
            Some((_, failure)) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    fn check_registration(&self, register_id: &RegisterId) -> Result<()> {
        if self.is_registered(register_id) {
            Ok(())
        } else {
            Err(ControlError::Client {
                status: 404,
                message: format!("unknown registration {register_id}"),
            })
        }
    }
}

#[async_trait]
impl ControlPlaneClient for MockControlPlane {
    async fn register(&self, node_id: NodeId, hostname: &str, port: u16) -> Result<RegisterId> {
        self.enter(Op::Register).await?;
        let mut state = self.state.lock();
        state.next_register += 1;
        let register_id = RegisterId::new(format!("reg-{}", state.next_register))
            .map_err(|e| ControlError::InvalidResponse(e.to_string()))?;
        state.valid_registrations.insert(register_id.clone());
        state
            .registered_hosts
            .push((node_id, hostname.to_string(), port));
        Ok(register_id)
    }

    async fn verify(&self, register_id: &RegisterId) -> Result<()> {
        self.enter(Op::Verify).await?;
        self.check_registration(register_id)
    }

    async fn unregister(&self, register_id: &RegisterId) -> Result<()> {
        self.enter(Op::Unregister).await?;
        self.check_registration(register_id)?;
        self.state.lock().valid_registrations.remove(register_id);
        Ok(())
    }

    async fn fetch_config(&self, register_id: &RegisterId) -> Result<NodeConfig> {
        self.enter(Op::FetchConfig).await?;
        self.check_registration(register_id)?;
        Ok(self.config.clone())
    }

    async fn fetch_users(&self, register_id: &RegisterId) -> Result<Vec<UserRecord>> {
        self.enter(Op::FetchUsers).await?;
        self.check_registration(register_id)?;
        let state = self.state.lock();
        if state.users_not_modified {
            return Err(ControlError::NotModified);
        }
        Ok(state.users.clone())
    }

    async fn submit_traffic(&self, register_id: &RegisterId, report: &TrafficReport) -> Result<()> {
        self.enter(Op::SubmitTraffic).await?;
        self.check_registration(register_id)?;
        self.state.lock().reports.push(report.clone());
        Ok(())
    }

    async fn heartbeat(&self, register_id: &RegisterId) -> Result<()> {
        self.enter(Op::Heartbeat).await?;
        self.check_registration(register_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_agent_core::UserId;

    #[tokio::test]
    async fn register_then_verify() {
        let mock = MockControlPlane::new();
        let rid = mock.register(NodeId::new(1), "h", 443).await.unwrap();
        assert_eq!(rid.as_str(), "reg-1");
        mock.verify(&rid).await.unwrap();

        mock.unregister(&rid).await.unwrap();
        assert!(mock.verify(&rid).await.is_err());
        assert_eq!(mock.call_count(Op::Verify), 2);
    }

    #[tokio::test]
    async fn injected_failures() {
        let mock = MockControlPlane::new();
        let rid = RegisterId::new("reg-x").unwrap();
        mock.accept(rid.clone());
        mock.set_users(vec![UserRecord::new(UserId::new(1), "a")]);

        mock.fail(Op::FetchUsers, Failure::Server);
        assert!(mock.fetch_users(&rid).await.unwrap_err().is_server_error());

        mock.recover(Op::FetchUsers);
        assert_eq!(mock.fetch_users(&rid).await.unwrap().len(), 1);

        mock.set_users_not_modified(true);
        assert!(mock.fetch_users(&rid).await.unwrap_err().is_not_modified());
    }
}
