//! Edge node reconciliation agent.
//!
//! Keeps a locally running proxy runtime's authorized users and usage
//! counters in sync with a remote control plane:
//!
//! - [`Registration`] reuses the persisted node identity after the control
//!   plane verifies it, or registers fresh, and unregisters on shutdown.
//! - [`UserReconciler`] applies the control plane's user list to the proxy
//!   runtime, removals first.
//! - [`TrafficReporter`] reads and resets per-user counters and submits the
//!   usage in one batch.
//! - [`Heartbeat`] pings the control plane.
//! - [`PeriodicTask`] runs the last three on independent, non-overlapping
//!   schedules and logs their failures.
//!
//! [`NodeServer`] wires them together.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use edge_agent_control::{HttpClientConfig, HttpControlPlaneClient};
//! use edge_agent_core::NodeId;
//! use edge_agent_node::{AgentConfig, MemoryProxyRuntime, NodeServer};
//! use edge_agent_store::FileIdentityStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentConfig::new(NodeId::new(7));
//! let client = Arc::new(HttpControlPlaneClient::new(HttpClientConfig::new(
//!     "https://panel.example.com",
//! ))?);
//! let store = Arc::new(FileIdentityStore::new(&config.data_dir));
//! let runtime = Arc::new(MemoryProxyRuntime::new());
//! runtime.add_inbound("trojan_443");
//!
//! let server = NodeServer::new(config, client, store, runtime);
//! server.start().await?;
//! // ... serve traffic ...
//! server.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod call;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod registration;
pub mod runtime;
pub mod server;
pub mod task;
pub mod traffic;
pub mod users;

pub use config::{system_hostname, AgentConfig};
pub use error::{NodeError, Result};
pub use heartbeat::Heartbeat;
pub use registration::{Registration, RegistrationState};
pub use runtime::{
    CounterStore, MemoryCounters, MemoryInbound, MemoryProxyRuntime, ProxyRuntime, ProxyUser,
    RuntimeError, UserManagedProxy,
};
pub use server::NodeServer;
pub use task::{PeriodicTask, TaskAction};
pub use traffic::TrafficReporter;
pub use users::{diff_users, CycleOutcome, UserDiff, UserReconciler};
