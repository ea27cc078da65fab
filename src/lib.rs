//! Relay Cluster Membership Library
//!
//! The membership layer of a distributed real-time messaging server. Every running
//! instance discovers its peers, tracks which of them are alive and notices when
//! they leave, without a coordinator and without persisting the member list.
//!
//! ## Modules
//! - **`membership`**: The membership protocol. Discovery requests, periodic
//!   liveness announcements, departure announcements and per-peer eviction timers
//!   maintain a node-local registry of `ServerConfig`s.
//! - **`transport`**: The named-channel pub/sub the protocol runs on, with an
//!   in-process bus and a UDP fan-out implementation.
//! - **`introspection`**: HTTP endpoint listing the servers currently known.
//! - **`config`**: Command-line and environment configuration of a node.

pub mod config;
pub mod introspection;
pub mod membership;
pub mod transport;
