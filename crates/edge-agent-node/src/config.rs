//! Agent configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use edge_agent_core::NodeId;
use edge_agent_store::DEFAULT_DATA_DIR;

use crate::error::{NodeError, Result};

/// Configuration for the node agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Control-plane assigned ID of this node.
    pub node_id: NodeId,

    /// Port reported at registration.
    #[serde(default = "AgentConfig::default_server_port")]
    pub server_port: u16,

    /// Hostname reported at registration. Resolved from the system when unset.
    #[serde(default)]
    pub hostname: Option<String>,

    /// Directory holding the persisted node identity.
    #[serde(default = "AgentConfig::default_data_dir")]
    pub data_dir: PathBuf,

    /// Control-plane base URL.
    #[serde(default)]
    pub control_plane_url: String,

    /// Bearer token for the control plane.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Interval between user reconciliation cycles, in seconds.
    #[serde(default = "AgentConfig::default_fetch_users_interval")]
    pub fetch_users_interval_seconds: u64,

    /// Interval between traffic reports, in seconds.
    #[serde(default = "AgentConfig::default_report_traffic_interval")]
    pub report_traffic_interval_seconds: u64,

    /// Interval between heartbeats, in seconds. Zero disables the heartbeat.
    #[serde(default = "AgentConfig::default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,

    /// Timeout of every control-plane call, in seconds.
    #[serde(default = "AgentConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl AgentConfig {
    const fn default_server_port() -> u16 {
        443
    }

    fn default_data_dir() -> PathBuf {
        PathBuf::from(DEFAULT_DATA_DIR)
    }

    const fn default_fetch_users_interval() -> u64 {
        60
    }

    const fn default_report_traffic_interval() -> u64 {
        80
    }

    const fn default_heartbeat_interval() -> u64 {
        60
    }

    const fn default_request_timeout() -> u64 {
        15
    }

    /// Create a configuration for `node_id` with every other value defaulted.
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            server_port: Self::default_server_port(),
            hostname: None,
            data_dir: Self::default_data_dir(),
            control_plane_url: String::new(),
            api_token: None,
            fetch_users_interval_seconds: Self::default_fetch_users_interval(),
            report_traffic_interval_seconds: Self::default_report_traffic_interval(),
            heartbeat_interval_seconds: Self::default_heartbeat_interval(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }

    /// Check the configuration for values the agent cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Config`] naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.get() == 0 {
            return Err(NodeError::Config("node_id must be non-zero".into()));
        }
        if self.fetch_users_interval_seconds == 0 {
            return Err(NodeError::Config(
                "fetch_users_interval must be non-zero".into(),
            ));
        }
        if self.report_traffic_interval_seconds == 0 {
            return Err(NodeError::Config(
                "report_traffic_interval must be non-zero".into(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(NodeError::Config("request_timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Get the user reconciliation interval as a `Duration`.
    #[must_use]
    pub const fn fetch_users_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_users_interval_seconds)
    }

    /// Get the traffic report interval as a `Duration`.
    #[must_use]
    pub const fn report_traffic_interval(&self) -> Duration {
        Duration::from_secs(self.report_traffic_interval_seconds)
    }

    /// Get the heartbeat interval, `None` when the heartbeat is disabled.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Option<Duration> {
        if self.heartbeat_interval_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.heartbeat_interval_seconds))
        }
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// The hostname to register with: the configured one, else the system's.
    #[must_use]
    pub fn resolve_hostname(&self) -> String {
        self.hostname
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map_or_else(system_hostname, str::to_string)
    }
}

/// The system hostname from `HOSTNAME`, then `/etc/hostname`, then
/// `"localhost"`.
#[must_use]
pub fn system_hostname() -> String {
    hostname_from(std::env::var("HOSTNAME").ok(), Path::new("/etc/hostname"))
}

fn hostname_from(env: Option<String>, file: &Path) -> String {
    env.map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string(file)
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AgentConfig::new(NodeId::new(3));
        assert_eq!(config.server_port, 443);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/edge-agent-node"));
        assert_eq!(config.fetch_users_interval(), Duration::from_secs(60));
        assert_eq!(config.report_traffic_interval(), Duration::from_secs(80));
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        config.validate().unwrap();
    }

    #[test]
    fn deserialize_applies_defaults() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"node_id": 5, "heartbeat_interval_seconds": 0}"#).unwrap();
        assert_eq!(config.node_id, NodeId::new(5));
        assert_eq!(config.report_traffic_interval_seconds, 80);
        assert_eq!(config.heartbeat_interval(), None);
    }

    #[test]
    fn validate_rejects_zero_values() {
        assert!(AgentConfig::new(NodeId::new(0)).validate().is_err());

        let mut config = AgentConfig::new(NodeId::new(1));
        config.fetch_users_interval_seconds = 0;
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));

        let mut config = AgentConfig::new(NodeId::new(1));
        config.report_traffic_interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::new(NodeId::new(1));
        config.request_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn configured_hostname_wins() {
        let mut config = AgentConfig::new(NodeId::new(1));
        config.hostname = Some(" edge-1 ".to_string());
        assert_eq!(config.resolve_hostname(), "edge-1");
    }

    #[test]
    fn hostname_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hostname");
        std::fs::write(&file, "from-file\n").unwrap();

        assert_eq!(hostname_from(Some("from-env".into()), &file), "from-env");
        assert_eq!(hostname_from(Some("  ".into()), &file), "from-file");
        assert_eq!(hostname_from(None, &file), "from-file");
        assert_eq!(hostname_from(None, &dir.path().join("missing")), "localhost");
    }
}
