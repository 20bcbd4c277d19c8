//! Error types for the node agent.
//!
//! Only failures during startup ever reach the caller of
//! [`NodeServer::start`](crate::NodeServer::start); every other error is
//! logged where the periodic task runner or the shutdown sequence observes it.

use thiserror::Error;

use edge_agent_control::ControlError;

/// A result type using `NodeError`.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Errors that can occur in the node agent.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A control-plane call failed.
    #[error("control plane error: {0}")]
    Control(#[from] ControlError),

    /// The proxy runtime has no user-managed inbound with this tag.
    #[error("inbound {0} does not support user management")]
    MissingUserManager(String),

    /// Invalid agent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// `start` was called on a running server.
    #[error("server is already running")]
    AlreadyRunning,
}

impl NodeError {
    /// Short label for the error class, used as a log field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Control(e) => e.kind(),
            Self::MissingUserManager(_) | Self::Config(_) => "config",
            Self::AlreadyRunning => "state",
        }
    }

    /// Returns true for control-plane failures on the server side.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        match self {
            Self::Control(e) => e.is_server_error(),
            _ => false,
        }
    }
}
