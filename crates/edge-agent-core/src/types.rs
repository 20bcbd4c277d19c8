//! Domain records exchanged between the agent, the control plane and the
//! proxy runtime.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, RegisterId, UserId};

/// Separator used inside a [`UserIdentity`].
const IDENTITY_SEPARATOR: char = '|';

/// Separator used inside proxy runtime counter names.
const COUNTER_SEPARATOR: &str = ">>>";

/// The proxy protocol served by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Trojan over TLS.
    #[default]
    Trojan,
}

impl NodeType {
    /// The wire name of the protocol.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trojan => "trojan",
        }
    }

    /// The proxy runtime tag of this protocol's inbound on `port`.
    #[must_use]
    pub fn inbound_tag(self, port: u16) -> String {
        format!("{}_{port}", self.as_str())
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted identity of this node's registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Handle of the live registration.
    pub register_id: RegisterId,
    /// Node this registration belongs to.
    pub node_id: NodeId,
    /// Hostname reported at registration time.
    pub hostname: String,
}

/// Node configuration served by the control plane after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Port the proxy inbound listens on.
    pub server_port: u16,
    /// TLS server name.
    #[serde(default)]
    pub server_name: String,
    /// Whether clients may skip certificate verification.
    #[serde(default)]
    pub allow_insecure: bool,
}

impl NodeConfig {
    /// The proxy runtime tag of the inbound serving this node.
    #[must_use]
    pub fn inbound_tag(&self, node_type: NodeType) -> String {
        node_type.inbound_tag(self.server_port)
    }
}

/// One authorized client identity.
///
/// Two records are the same identity when `(id, uuid)` match; the remaining
/// fields are informational and never cause a user to be re-applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Control-plane user ID.
    pub id: UserId,
    /// Credential presented by the client.
    pub uuid: String,
    /// Bandwidth limit in bytes per second, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_limit: Option<u64>,
    /// Maximum concurrent devices, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_limit: Option<u32>,
}

impl UserRecord {
    /// Create a record with no limits.
    #[must_use]
    pub fn new(id: UserId, uuid: impl Into<String>) -> Self {
        Self {
            id,
            uuid: uuid.into(),
            speed_limit: None,
            device_limit: None,
        }
    }

    /// The identity key used to diff user lists.
    #[must_use]
    pub fn key(&self) -> (UserId, &str) {
        (self.id, self.uuid.as_str())
    }
}

/// The kind of per-user counter kept by the proxy runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    /// Bytes sent by the client.
    Uplink,
    /// Bytes received by the client.
    Downlink,
    /// Number of proxied requests.
    RequestCount,
}

impl CounterKind {
    /// Every counter kind, in reporting order.
    pub const ALL: [Self; 3] = [Self::Uplink, Self::Downlink, Self::RequestCount];

    const fn suffix(self) -> &'static str {
        match self {
            Self::Uplink => "traffic>>>uplink",
            Self::Downlink => "traffic>>>downlink",
            Self::RequestCount => "request>>>count",
        }
    }
}

/// Stable key identifying one user inside the proxy runtime.
///
/// Formatted as `{tag}|{id}|{uuid}`; used both to add the user and to address
/// its counters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserIdentity(String);

impl UserIdentity {
    /// Derive the identity of `user` within the inbound `tag`.
    #[must_use]
    pub fn derive(tag: &str, user: &UserRecord) -> Self {
        Self(format!(
            "{tag}{IDENTITY_SEPARATOR}{}{IDENTITY_SEPARATOR}{}",
            user.id, user.uuid
        ))
    }

    /// Borrow the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of this user's counter of the given kind.
    #[must_use]
    pub fn counter_name(&self, kind: CounterKind) -> String {
        format!(
            "user{COUNTER_SEPARATOR}{}{COUNTER_SEPARATOR}{}",
            self.0,
            kind.suffix()
        )
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Usage of one user over one reporting interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSample {
    /// The user the usage belongs to.
    pub user_id: UserId,
    /// Uploaded bytes.
    pub upload: u64,
    /// Downloaded bytes.
    pub download: u64,
    /// Proxied requests.
    pub request_count: u64,
}

impl TrafficSample {
    /// Whether every value is zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.upload == 0 && self.download == 0 && self.request_count == 0
    }
}

/// Aggregate statistics sent alongside a traffic batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeStats {
    /// Number of users with usage in the batch.
    pub user_count: u64,
    /// Sum of uploaded bytes.
    pub upload_total: u64,
    /// Sum of downloaded bytes.
    pub download_total: u64,
}

impl NodeStats {
    /// Aggregate a batch of samples.
    #[must_use]
    pub fn from_samples(samples: &[TrafficSample]) -> Self {
        samples.iter().fold(Self::default(), |acc, s| Self {
            user_count: acc.user_count + 1,
            upload_total: acc.upload_total.saturating_add(s.upload),
            download_total: acc.download_total.saturating_add(s.download),
        })
    }
}
