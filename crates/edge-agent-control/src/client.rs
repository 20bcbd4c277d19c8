//! Control-plane client trait and its HTTP implementation.
//!
//! The agent talks to the control plane only through [`ControlPlaneClient`],
//! which keeps the transport swappable and lets tests substitute an
//! in-memory control plane.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use edge_agent_core::{NodeConfig, NodeId, NodeType, RegisterId, UserRecord};

use crate::error::{ControlError, Result};
use crate::types::{
    ErrorResponse, HeartbeatRequest, RegisterRequest, RegisterResponse, TrafficReport,
};

/// Default bound on every control-plane call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Operations the agent needs from the control plane.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Register this node and obtain a register ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the control plane rejects or fails the registration.
    async fn register(&self, node_id: NodeId, hostname: &str, port: u16) -> Result<RegisterId>;

    /// Check that a previously obtained register ID is still valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration is unknown or the call fails.
    async fn verify(&self, register_id: &RegisterId) -> Result<()>;

    /// Release a registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn unregister(&self, register_id: &RegisterId) -> Result<()>;

    /// Fetch the node configuration for a registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn fetch_config(&self, register_id: &RegisterId) -> Result<NodeConfig>;

    /// Fetch the authoritative user list.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotModified`] if the list is unchanged since
    /// the previous successful fetch, or another error if the call fails.
    /// The first fetch after a successful `register`, `verify` or
    /// `unregister` is always unconditional.
    async fn fetch_users(&self, register_id: &RegisterId) -> Result<Vec<UserRecord>>;

    /// Submit one batch of traffic.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn submit_traffic(&self, register_id: &RegisterId, report: &TrafficReport) -> Result<()>;

    /// Send a liveness signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn heartbeat(&self, register_id: &RegisterId) -> Result<()>;
}

/// Configuration for [`HttpControlPlaneClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL of the control plane (e.g. `https://panel.example.com`).
    pub base_url: String,
    /// Bearer token sent with every request.
    pub api_token: Option<String>,
    /// Protocol served by this node.
    pub node_type: NodeType,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpClientConfig {
    /// Create a config with the default timeout and no token.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            node_type: NodeType::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// HTTP client for the control plane's REST API.
#[derive(Debug)]
pub struct HttpControlPlaneClient {
    client: reqwest::Client,
    config: HttpClientConfig,
    users_etag: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    users: Vec<UserRecord>,
}

impl HttpControlPlaneClient {
    /// Create a new control-plane client.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ControlError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, config))
    }

    /// Create a client around a pre-built reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: HttpClientConfig) -> Self {
        let mut config = config;
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            client,
            config,
            users_etag: Mutex::new(None),
        }
    }

    /// Base URL of the control plane.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn node_url(&self, register_id: &RegisterId, path: &str) -> String {
        format!(
            "{}/v1/nodes/{}/{path}",
            self.config.base_url,
            register_id.as_str()
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.query(&[("node_type", self.config.node_type.as_str())]);
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Turn a non-success response into a classified error.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_MODIFIED {
            return Err(ControlError::NotModified);
        }

        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.message)
            .unwrap_or_else(|_| format!("control plane returned status {status}"));

        Err(ControlError::from_status(status.as_u16(), message))
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| ControlError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ControlPlaneClient for HttpControlPlaneClient {
    async fn register(&self, node_id: NodeId, hostname: &str, port: u16) -> Result<RegisterId> {
        let url = format!("{}/v1/nodes/register", self.config.base_url);
        let request = RegisterRequest {
            node_id,
            node_type: self.config.node_type,
            hostname,
            port,
        };

        let response = self
            .authorize(self.client.post(&url))
            .json(&request)
            .send()
            .await?;
        let body: RegisterResponse = Self::decode(Self::check(response).await?).await?;
        *self.users_etag.lock() = None;

        tracing::debug!(node_id = %node_id, register_id = %body.register_id, "Registered node");
        Ok(body.register_id)
    }

    async fn verify(&self, register_id: &RegisterId) -> Result<()> {
        let url = self.node_url(register_id, "verify");
        let response = self.authorize(self.client.get(&url)).send().await?;
        Self::check(response).await?;
        // A (re)activated identity starts with an unconditional user fetch.
        *self.users_etag.lock() = None;
        Ok(())
    }

    async fn unregister(&self, register_id: &RegisterId) -> Result<()> {
        let url = self.node_url(register_id, "unregister");
        let response = self.authorize(self.client.post(&url)).send().await?;
        Self::check(response).await?;
        *self.users_etag.lock() = None;
        Ok(())
    }

    async fn fetch_config(&self, register_id: &RegisterId) -> Result<NodeConfig> {
        let url = self.node_url(register_id, "config");
        let response = self.authorize(self.client.get(&url)).send().await?;
        Self::decode(Self::check(response).await?).await
    }

    async fn fetch_users(&self, register_id: &RegisterId) -> Result<Vec<UserRecord>> {
        let url = self.node_url(register_id, "users");
        let mut request = self.authorize(self.client.get(&url));
        let etag = self.users_etag.lock().clone();
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = Self::check(request.send().await?).await?;
        let new_etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body: UsersResponse = Self::decode(response).await?;
        *self.users_etag.lock() = new_etag;
        Ok(body.users)
    }

    async fn submit_traffic(&self, register_id: &RegisterId, report: &TrafficReport) -> Result<()> {
        let url = self.node_url(register_id, "traffic");
        let response = self
            .authorize(self.client.post(&url))
            .json(report)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn heartbeat(&self, register_id: &RegisterId) -> Result<()> {
        let url = self.node_url(register_id, "heartbeat");
        let body = HeartbeatRequest {
            node_type: self.config.node_type,
            sent_at: chrono::Utc::now(),
        };
        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
