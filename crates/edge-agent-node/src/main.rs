//! Edge Agent - node reconciliation agent.
//!
//! Registers this node with the control plane, keeps the proxy runtime's
//! users in sync, reports traffic and sends heartbeats until interrupted.
//! Every flag can also be set through its `EDGE_AGENT_*` environment
//! variable.
//!
//! This binary drives the in-process [`MemoryProxyRuntime`] with one inbound
//! for the configured server port.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edge_agent_control::{HttpClientConfig, HttpControlPlaneClient};
use edge_agent_core::{NodeId, NodeType};
use edge_agent_node::{AgentConfig, MemoryProxyRuntime, NodeServer};
use edge_agent_store::{FileIdentityStore, DEFAULT_DATA_DIR};

#[derive(Parser, Debug)]
#[command(name = "edge-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Node ID assigned by the control plane.
    #[arg(long, env = "EDGE_AGENT_NODE_ID")]
    node_id: NodeId,

    /// Control-plane base URL.
    #[arg(long, env = "EDGE_AGENT_CONTROL_PLANE_URL")]
    control_plane_url: String,

    /// Bearer token for the control plane.
    #[arg(long, env = "EDGE_AGENT_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Port reported at registration.
    #[arg(long, env = "EDGE_AGENT_SERVER_PORT", default_value_t = 443)]
    server_port: u16,

    /// Hostname reported at registration (defaults to the system hostname).
    #[arg(long, env = "EDGE_AGENT_HOSTNAME")]
    hostname: Option<String>,

    /// Directory holding the persisted node identity.
    #[arg(long, env = "EDGE_AGENT_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Seconds between user reconciliation cycles.
    #[arg(long, env = "EDGE_AGENT_FETCH_USERS_INTERVAL", default_value_t = 60)]
    fetch_users_interval: u64,

    /// Seconds between traffic reports.
    #[arg(long, env = "EDGE_AGENT_REPORT_TRAFFIC_INTERVAL", default_value_t = 80)]
    report_traffic_interval: u64,

    /// Seconds between heartbeats (0 disables the heartbeat).
    #[arg(long, env = "EDGE_AGENT_HEARTBEAT_INTERVAL", default_value_t = 60)]
    heartbeat_interval: u64,

    /// Timeout of every control-plane call, in seconds.
    #[arg(long, env = "EDGE_AGENT_REQUEST_TIMEOUT", default_value_t = 15)]
    request_timeout: u64,
}

impl From<Args> for AgentConfig {
    fn from(args: Args) -> Self {
        Self {
            node_id: args.node_id,
            server_port: args.server_port,
            hostname: args.hostname,
            data_dir: args.data_dir,
            control_plane_url: args.control_plane_url,
            api_token: args.api_token,
            fetch_users_interval_seconds: args.fetch_users_interval,
            report_traffic_interval_seconds: args.report_traffic_interval,
            heartbeat_interval_seconds: args.heartbeat_interval,
            request_timeout_seconds: args.request_timeout,
        }
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Received Ctrl+C, initiating shutdown");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating shutdown");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,edge_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from(Args::parse());
    config.validate()?;

    tracing::info!(
        node_id = %config.node_id,
        control_plane_url = %config.control_plane_url,
        data_dir = %config.data_dir.display(),
        "Starting Edge Agent"
    );

    let mut client_config = HttpClientConfig::new(config.control_plane_url.clone());
    client_config.api_token.clone_from(&config.api_token);
    client_config.timeout = config.request_timeout();
    let client = Arc::new(HttpControlPlaneClient::new(client_config)?);

    let store = Arc::new(FileIdentityStore::new(&config.data_dir));

    let runtime = Arc::new(MemoryProxyRuntime::new());
    runtime.add_inbound(NodeType::Trojan.inbound_tag(config.server_port));

    let server = NodeServer::new(config, client, store, runtime);
    server.start().await?;

    let signal = shutdown_signal().await;
    server.close().await;
    signal?;

    tracing::info!("Edge Agent stopped");
    Ok(())
}
