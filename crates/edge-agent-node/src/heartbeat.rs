//! Liveness heartbeat.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use edge_agent_control::ControlPlaneClient;
use edge_agent_core::RegisterId;

use crate::call::bounded;
use crate::error::Result;
use crate::task::TaskAction;

/// Sends a heartbeat for the active registration on every tick.
pub struct Heartbeat {
    register_id: RegisterId,
    timeout: Duration,
    client: Arc<dyn ControlPlaneClient>,
}

impl Heartbeat {
    /// Create a heartbeat for `register_id`.
    pub fn new(
        register_id: RegisterId,
        timeout: Duration,
        client: Arc<dyn ControlPlaneClient>,
    ) -> Self {
        Self {
            register_id,
            timeout,
            client,
        }
    }
}

#[async_trait]
impl TaskAction for Heartbeat {
    async fn run(&self) -> Result<()> {
        bounded(self.timeout, self.client.heartbeat(&self.register_id)).await?;
        debug!(register_id = %self.register_id, "Heartbeat sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_agent_control::{Failure, MockControlPlane, Op};

    fn heartbeat(control: &Arc<MockControlPlane>, timeout: Duration) -> Heartbeat {
        let register_id = RegisterId::new("reg-1").unwrap();
        control.accept(register_id.clone());
        Heartbeat::new(register_id, timeout, control.clone())
    }

    #[tokio::test]
    async fn sends_heartbeat() {
        let control = Arc::new(MockControlPlane::new());
        let hb = heartbeat(&control, Duration::from_secs(15));

        hb.run().await.unwrap();
        assert_eq!(control.call_count(Op::Heartbeat), 1);
    }

    #[tokio::test]
    async fn failure_is_returned_to_runner() {
        let control = Arc::new(MockControlPlane::new());
        control.fail(Op::Heartbeat, Failure::Server);
        let hb = heartbeat(&control, Duration::from_secs(15));

        assert!(hb.run().await.unwrap_err().is_server_error());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_control_plane_times_out() {
        let control = Arc::new(MockControlPlane::new());
        control.set_delay(Some(Duration::from_secs(60)));
        let hb = heartbeat(&control, Duration::from_secs(15));

        let err = hb.run().await.unwrap_err();
        assert_eq!(err.kind(), "server");
        assert_eq!(control.call_count(Op::Heartbeat), 0);
    }
}
