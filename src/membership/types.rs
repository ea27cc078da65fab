use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reachability descriptor of one cluster node.
///
/// `server_name` is the node's identity and the registry key; it must be unique per
/// live process. The two address pairs point at the client-facing endpoint and the
/// raw TCP endpoint. A descriptor never changes for the lifetime of a process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub server_name: String,
    pub host: String,
    pub port: u16,
    pub tcp_host: String,
    pub tcp_port: u16,
}

impl ServerConfig {
    pub fn new(
        server_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        tcp_host: impl Into<String>,
        tcp_port: u16,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            host: host.into(),
            port,
            tcp_host: tcp_host.into(),
            tcp_port,
        }
    }
}

/// Payload of a `discovery-request`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequest {
    pub server_name: String,
}

/// The part of a `departure-announce` payload a receiver needs.
///
/// Senders publish a full [`ServerConfig`]; any extra fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DepartureNotice {
    pub server_name: String,
}

/// Heartbeat timing of the membership protocol.
///
/// `heartbeat_in` must be larger than `heartbeat_out`, otherwise healthy peers get
/// evicted between two of their own heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterSettings {
    /// Period at which this node re-announces its own liveness.
    pub heartbeat_out: Duration,
    /// Silence after which a peer is evicted.
    pub heartbeat_in: Duration,
}

impl ClusterSettings {
    pub fn new(heartbeat_out: Duration, heartbeat_in: Duration) -> Self {
        Self {
            heartbeat_out,
            heartbeat_in,
        }
    }

    pub fn is_consistent(&self) -> bool {
        !self.heartbeat_out.is_zero() && self.heartbeat_in > self.heartbeat_out
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            heartbeat_out: Duration::from_secs(1),
            heartbeat_in: Duration::from_secs(5),
        }
    }
}
