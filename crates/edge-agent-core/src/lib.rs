//! Core types and identifiers for the edge node agent.
//!
//! This crate provides the foundational types shared by every other crate in
//! the workspace:
//!
//! - **Identifiers**: strongly-typed node, register and user IDs
//! - **Domain records**: node identity, user records, traffic samples
//! - **Derived names**: user identities and per-user counter names used to
//!   address the proxy runtime
//!
//! # Example
//!
//! ```
//! use edge_agent_core::{UserId, UserIdentity, UserRecord};
//!
//! let user = UserRecord::new(UserId::new(7), "5f2c0d");
//! let identity = UserIdentity::derive("trojan_443", &user);
//! assert_eq!(identity.as_str(), "trojan_443|7|5f2c0d");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;
pub mod types;

pub use ids::{IdError, NodeId, RegisterId, UserId};
pub use types::{
    CounterKind, NodeConfig, NodeIdentity, NodeStats, NodeType, TrafficSample, UserIdentity,
    UserRecord,
};
