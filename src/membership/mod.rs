//! Cluster Membership Module
//!
//! Gossip-lite membership over a pub/sub transport. Every node keeps its own view
//! of the cluster; there is no coordinator and nothing is persisted.
//!
//! ## Core Mechanisms
//! - **Discovery**: A starting node publishes a `discovery-request`; every node that
//!   sees it answers with an immediate liveness announcement.
//! - **Heartbeat**: Each node re-announces itself every `heartbeat_out`.
//! - **Failure Detection**: Each announcement (re)arms a per-peer eviction timer of
//!   `heartbeat_in`. A peer that stays silent that long is dropped.
//! - **Graceful Departure**: A closing node publishes a `departure-announce` so peers
//!   drop it immediately.
//!
//! Announcements carry no version: the last one processed for a name wins.

pub mod protocol;
pub mod registry;
pub mod service;
pub mod types;

pub use service::ClusterMembership;
pub use types::{ClusterSettings, ServerConfig};
