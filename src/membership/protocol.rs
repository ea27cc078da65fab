//! Membership Wire Protocol
//!
//! Channel names and payload codecs shared by every node of the cluster. Channel
//! names and the camelCase payload fields are the interoperability contract between
//! nodes and must not change.

use super::types::{DepartureNotice, DiscoveryRequest, ServerConfig};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

// --- Channels ---

/// Asks every node to announce itself right away.
pub const CHANNEL_DISCOVERY_REQUEST: &str = "discovery-request";
/// Carries a full `ServerConfig`; sent on start, periodically and on discovery.
pub const CHANNEL_LIVENESS_ANNOUNCE: &str = "liveness-announce";
/// Carries the departing node's `ServerConfig`; sent once on graceful close.
pub const CHANNEL_DEPARTURE_ANNOUNCE: &str = "departure-announce";

// --- Codecs ---

pub fn encode<T: Serialize>(message: &T) -> Result<Value> {
    Ok(serde_json::to_value(message)?)
}

pub fn decode_discovery(payload: Value) -> Result<DiscoveryRequest> {
    let request: DiscoveryRequest =
        serde_json::from_value(payload).context("Malformed discovery request")?;
    ensure_identity(&request.server_name)?;
    Ok(request)
}

pub fn decode_liveness(payload: Value) -> Result<ServerConfig> {
    let config: ServerConfig =
        serde_json::from_value(payload).context("Malformed liveness announcement")?;
    ensure_identity(&config.server_name)?;
    Ok(config)
}

pub fn decode_departure(payload: Value) -> Result<DepartureNotice> {
    let notice: DepartureNotice =
        serde_json::from_value(payload).context("Malformed departure announcement")?;
    ensure_identity(&notice.server_name)?;
    Ok(notice)
}

fn ensure_identity(server_name: &str) -> Result<()> {
    if server_name.trim().is_empty() {
        anyhow::bail!("Announcement carries an empty serverName");
    }
    Ok(())
}
