//! Registration state machine.
//!
//! Decides at startup whether the persisted identity can be reused or a fresh
//! registration is needed, and undoes the registration at shutdown.
//!
//! # State Machine
//!
//! ```text
//!   ┌──────────────┐  identity found  ┌───────────┐  verify ok
//!   │ Unregistered │─────────────────▶│ Verifying │────────────────┐
//!   └──────┬───────┘                  └─────┬─────┘                │
//!          │ no identity                    │ verify failed        │
//!          │                                │ (identity cleared)   ▼
//!          │                          ┌─────▼───────┐  ok   ┌────────────┐
//!          └─────────────────────────▶│ Registering │──────▶│ Registered │
//!                                     └─────┬───────┘       └─────┬──────┘
//!                                           │ failed              │ close
//!                                           ▼                     ▼
//!                                     Unregistered           ┌────────┐
//!                                                            │ Closed │
//!                                                            └────────┘
//! ```
//!
//! A stored identity belonging to a different node ID is cleared without
//! being verified. `close` unregisters only from `Registered`; any later call
//! does nothing. A `start` whose future was dropped leaves a transient state
//! behind; the next `start` runs from scratch and `close` ends in `Closed`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use edge_agent_control::ControlPlaneClient;
use edge_agent_core::{NodeId, NodeIdentity, RegisterId};
use edge_agent_store::IdentityStore;

use crate::call::bounded;
use crate::error::Result;

/// Registration lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationState {
    /// No registration is active.
    Unregistered,
    /// A stored identity is being verified with the control plane.
    Verifying,
    /// A new registration is being requested.
    Registering,
    /// A registration is active.
    Registered,
    /// The registration was closed.
    Closed,
}

impl RegistrationState {
    /// Returns the string representation of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Verifying => "verifying",
            Self::Registering => "registering",
            Self::Registered => "registered",
            Self::Closed => "closed",
        }
    }

    /// Whether a `start` is (or was, if its future was dropped) in flight.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Verifying | Self::Registering)
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of this node's registration and its persisted identity.
pub struct Registration {
    node_id: NodeId,
    hostname: String,
    port: u16,
    timeout: Duration,
    client: Arc<dyn ControlPlaneClient>,
    store: Arc<dyn IdentityStore>,
    state: RegistrationState,
    identity: Option<NodeIdentity>,
}

impl Registration {
    /// Create a registration in the `Unregistered` state.
    pub fn new(
        node_id: NodeId,
        hostname: impl Into<String>,
        port: u16,
        timeout: Duration,
        client: Arc<dyn ControlPlaneClient>,
        store: Arc<dyn IdentityStore>,
    ) -> Self {
        Self {
            node_id,
            hostname: hostname.into(),
            port,
            timeout,
            client,
            store,
            state: RegistrationState::Unregistered,
            identity: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RegistrationState {
        self.state
    }

    /// The active identity, if registered.
    #[must_use]
    pub const fn identity(&self) -> Option<&NodeIdentity> {
        self.identity.as_ref()
    }

    /// The active register ID, if registered.
    #[must_use]
    pub fn register_id(&self) -> Option<&RegisterId> {
        self.identity.as_ref().map(|i| &i.register_id)
    }

    /// Reuse the stored identity if the control plane still accepts it,
    /// otherwise register fresh.
    ///
    /// Returns the active identity. Calling `start` while registered returns
    /// the current identity without contacting the control plane.
    ///
    /// # Errors
    ///
    /// Returns an error if a fresh registration is needed and fails. Store
    /// failures are logged and never fail the start.
    pub async fn start(&mut self) -> Result<NodeIdentity> {
        if self.state == RegistrationState::Registered {
            if let Some(identity) = &self.identity {
                return Ok(identity.clone());
            }
        }
        if self.state.is_transient() {
            warn!(state = %self.state, "Previous start was interrupted, starting over");
        }

        if let Some(identity) = self.load_stored() {
            if identity.node_id == self.node_id {
                self.state = RegistrationState::Verifying;
                if self.verify(&identity).await {
                    self.activate(identity.clone());
                    return Ok(identity);
                }
            } else {
                info!(
                    stored_node_id = %identity.node_id,
                    node_id = %self.node_id,
                    "Stored identity belongs to another node, discarding"
                );
            }
            self.clear_stored();
        }

        self.state = RegistrationState::Registering;
        let register_id = match bounded(
            self.timeout,
            self.client.register(self.node_id, &self.hostname, self.port),
        )
        .await
        {
            Ok(id) => id,
            Err(e) => {
                self.state = RegistrationState::Unregistered;
                return Err(e.into());
            }
        };

        let identity = NodeIdentity {
            register_id,
            node_id: self.node_id,
            hostname: self.hostname.clone(),
        };
        if let Err(e) = self.store.save(&identity) {
            warn!(
                register_id = %identity.register_id,
                error = %e,
                "Failed to persist node identity"
            );
        }

        info!(
            register_id = %identity.register_id,
            node_id = %self.node_id,
            hostname = %self.hostname,
            port = self.port,
            "Registered node"
        );
        self.activate(identity.clone());
        Ok(identity)
    }

    /// Unregister from the control plane.
    ///
    /// On success the persisted identity is cleared. On failure it is left in
    /// place so the next start can verify and reuse it. The state becomes
    /// `Closed` either way; later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns the unregister failure for the caller to log.
    pub async fn close(&mut self) -> Result<()> {
        let previous = std::mem::replace(&mut self.state, RegistrationState::Closed);
        let identity = self.identity.take();
        let (RegistrationState::Registered, Some(identity)) = (previous, identity) else {
            debug!(state = %previous, "Registration close without active registration");
            return Ok(());
        };

        bounded(self.timeout, self.client.unregister(&identity.register_id)).await?;

        if let Err(e) = self.store.clear() {
            warn!(
                register_id = %identity.register_id,
                error = %e,
                "Failed to clear persisted identity"
            );
        }
        info!(register_id = %identity.register_id, "Unregistered node");
        Ok(())
    }

    fn load_stored(&self) -> Option<NodeIdentity> {
        match self.store.load() {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "Failed to load node identity, registering fresh");
                None
            }
        }
    }

    async fn verify(&self, identity: &NodeIdentity) -> bool {
        match bounded(self.timeout, self.client.verify(&identity.register_id)).await {
            Ok(()) => {
                info!(
                    register_id = %identity.register_id,
                    "Reusing verified node identity"
                );
                true
            }
            Err(e) => {
                warn!(
                    register_id = %identity.register_id,
                    error = %e,
                    error_kind = e.kind(),
                    "Stored identity rejected, registering fresh"
                );
                false
            }
        }
    }

    fn clear_stored(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stale node identity");
        }
    }

    fn activate(&mut self, identity: NodeIdentity) {
        self.identity = Some(identity);
        self.state = RegistrationState::Registered;
    }
}
