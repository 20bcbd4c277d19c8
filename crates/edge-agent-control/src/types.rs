//! Request and response types for control-plane calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use edge_agent_core::{NodeId, NodeStats, NodeType, RegisterId, TrafficSample};

/// Registration request.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    /// Node being registered.
    pub node_id: NodeId,
    /// Protocol served by the node.
    pub node_type: NodeType,
    /// Hostname of the machine running the agent.
    pub hostname: &'a str,
    /// Port the proxy listens on.
    pub port: u16,
}

/// Registration response.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    /// Handle of the new registration.
    pub register_id: RegisterId,
}

/// One batch of traffic submitted at the end of a reporting cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficReport {
    /// Per-user usage, only users with non-zero usage.
    pub samples: Vec<TrafficSample>,
    /// Aggregate statistics for the batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<NodeStats>,
    /// When the counters were read.
    pub reported_at: DateTime<Utc>,
}

impl TrafficReport {
    /// Build a report from samples, computing the aggregate stats.
    #[must_use]
    pub fn new(samples: Vec<TrafficSample>) -> Self {
        let stats = Some(NodeStats::from_samples(&samples));
        Self {
            samples,
            stats,
            reported_at: Utc::now(),
        }
    }
}

/// Heartbeat request body.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatRequest {
    /// Protocol served by the node.
    pub node_type: NodeType,
    /// When the heartbeat was sent.
    pub sent_at: DateTime<Utc>,
}

/// Error body returned by the control plane.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(alias = "error")]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_agent_core::UserId;

    #[test]
    fn report_computes_stats() {
        let report = TrafficReport::new(vec![TrafficSample {
            user_id: UserId::new(1),
            upload: 3,
            download: 4,
            request_count: 1,
        }]);
        let stats = report.stats.unwrap();
        assert_eq!(stats.user_count, 1);
        assert_eq!(stats.upload_total, 3);
        assert_eq!(stats.download_total, 4);
    }

    #[test]
    fn register_request_serializes() {
        let req = RegisterRequest {
            node_id: NodeId::new(3),
            node_type: NodeType::Trojan,
            hostname: "edge-3",
            port: 443,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["node_id"], 3);
        assert_eq!(json["node_type"], "trojan");
        assert_eq!(json["hostname"], "edge-3");
        assert_eq!(json["port"], 443);
    }

    #[test]
    fn error_response_accepts_either_field() {
        let a: ErrorResponse = serde_json::from_str(r#"{"message":"m"}"#).unwrap();
        let b: ErrorResponse = serde_json::from_str(r#"{"error":"e"}"#).unwrap();
        assert_eq!(a.message, "m");
        assert_eq!(b.message, "e");
    }
}
