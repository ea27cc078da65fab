use crate::membership::{ClusterMembership, ServerConfig};

use axum::{Json, extract::Extension, http::StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;

pub async fn handle_available_servers(
    Extension(membership): Extension<Arc<ClusterMembership>>,
) -> (StatusCode, Json<BTreeMap<String, ServerConfig>>) {
    let servers = membership.snapshot();
    tracing::debug!("Serving {} available server(s)", servers.len());

    (StatusCode::OK, Json(servers))
}
