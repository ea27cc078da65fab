use clap::Parser;
use relay_cluster::config::NodeArgs;
use relay_cluster::introspection;
use relay_cluster::membership::ClusterMembership;
use relay_cluster::transport::UdpTransport;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Time given to the departure datagrams to leave the socket before shutdown.
const DEPARTURE_FLUSH: Duration = Duration::from_millis(200);
/// Interval of the cluster summary log line.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = NodeArgs::parse();
    let settings = args.cluster_settings()?;
    let server_config = args.server_config();

    tracing::info!(
        "Starting node '{}' (client {}:{}, tcp {}:{})",
        server_config.server_name,
        server_config.host,
        server_config.port,
        server_config.tcp_host,
        server_config.tcp_port
    );

    // 1. Cluster transport (UDP fan-out):
    let transport = UdpTransport::bind(args.gossip_bind).await?;
    for peer in &args.peers {
        transport.add_peer(*peer);
    }
    if args.peers.is_empty() {
        tracing::info!("No peers configured, waiting for others to find us");
    }

    // 2. Membership:
    let membership = ClusterMembership::start(server_config, settings, transport.clone())?;

    // 3. Stats reporter:
    let stats_membership = membership.clone();
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);

        loop {
            interval.tick().await;
            let servers = stats_membership.snapshot();
            tracing::info!("Cluster stats: {} known servers", servers.len());
            for server in servers.values() {
                tracing::info!(
                    "  - {} client={}:{} tcp={}:{}",
                    server.server_name,
                    server.host,
                    server.port,
                    server.tcp_host,
                    server.tcp_port
                );
            }
        }
    });

    // 4. Introspection HTTP server:
    let app = introspection::router(membership.clone());
    let listener = tokio::net::TcpListener::bind(args.http_bind).await?;
    tracing::info!(
        "Introspection listening on http://{}{}",
        args.http_bind,
        introspection::ENDPOINT_AVAILABLE_SERVERS
    );
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    // 5. Graceful departure:
    stats_handle.abort();
    if let Err(e) = membership.close() {
        tracing::warn!("Leaving the cluster without a departure notice: {:#}", e);
    }
    tokio::time::sleep(DEPARTURE_FLUSH).await;
    transport.shutdown();

    Ok(())
}
