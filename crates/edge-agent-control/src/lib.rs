//! Control-plane client boundary for the edge node agent.
//!
//! The control plane owns the authoritative user list and the usage ledger.
//! This crate defines the [`ControlPlaneClient`] trait the agent depends on,
//! an HTTP implementation, and the classified [`ControlError`] every call
//! returns.
//!
//! # Example
//!
//! ```no_run
//! use edge_agent_control::{ControlPlaneClient, HttpClientConfig, HttpControlPlaneClient};
//! use edge_agent_core::NodeId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpControlPlaneClient::new(HttpClientConfig::new("https://panel.example.com"))?;
//! let register_id = client.register(NodeId::new(7), "edge-7", 443).await?;
//! let users = client.fetch_users(&register_id).await?;
//! println!("{} users", users.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature for [`MockControlPlane`], an in-memory
//! control plane with injectable failures.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod types;

pub use client::{
    ControlPlaneClient, HttpClientConfig, HttpControlPlaneClient, DEFAULT_REQUEST_TIMEOUT,
};
pub use error::{ControlError, Result};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{Failure, MockControlPlane, Op};
pub use types::TrafficReport;
