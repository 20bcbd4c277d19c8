//! Error types for control-plane calls.
//!
//! Every call made to the control plane fails with a classified
//! [`ControlError`]: callers only need to know whether the failure was on the
//! server side (retry next interval), a client-side rejection, or the
//! control plane reporting that nothing changed.

use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors returned by the control-plane client.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The resource has not changed since the last successful fetch.
    #[error("not modified")]
    NotModified,

    /// The control plane failed to handle the request (5xx).
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message returned by the control plane.
        message: String,
    },

    /// The control plane rejected the request (4xx).
    #[error("client error ({status}): {message}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Error message returned by the control plane.
        message: String,
    },

    /// The call did not complete within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The request could not be delivered.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ControlError {
    /// Returns true for failures on the control-plane side of the call,
    /// including timeouts and transport failures.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Server { .. } | Self::Timeout | Self::Transport(_)
        )
    }

    /// Returns true when the control plane reported no change.
    #[must_use]
    pub const fn is_not_modified(&self) -> bool {
        matches!(self, Self::NotModified)
    }

    /// Returns true if this error might be resolved by retrying later.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        self.is_server_error()
    }

    /// Short label for the error class, used as a log field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotModified => "not_modified",
            Self::Server { .. } | Self::Timeout | Self::Transport(_) => "server",
            Self::Client { .. } => "client",
            Self::InvalidResponse(_) => "unknown",
        }
    }

    /// Classify a non-success HTTP status.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            304 => Self::NotModified,
            500..=599 => Self::Server { status, message },
            _ => Self::Client { status, message },
        }
    }
}

impl From<reqwest::Error> for ControlError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}
