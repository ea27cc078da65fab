//! Introspection Module
//!
//! Read-only HTTP view of the membership registry, for operators and load
//! balancers that need to know which servers are currently part of the cluster.

pub mod handlers;

use crate::membership::ClusterMembership;

use axum::{Router, extract::Extension, routing::get};
use std::sync::Arc;

/// Lists every server in the local view as `serverName -> ServerConfig`.
pub const ENDPOINT_AVAILABLE_SERVERS: &str = "/available-servers";

pub fn router(membership: Arc<ClusterMembership>) -> Router {
    Router::new()
        .route(
            ENDPOINT_AVAILABLE_SERVERS,
            get(handlers::handle_available_servers),
        )
        .layer(Extension(membership))
}
