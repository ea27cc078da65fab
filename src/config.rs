//! Node Configuration
//!
//! Command-line flags of the `relay-node` binary. Every flag can also be supplied
//! through the environment variable named next to it.

use crate::membership::{ClusterSettings, ServerConfig};

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "relay-node", about = "Runs one member of a relay cluster")]
pub struct NodeArgs {
    /// Unique name of this server in the cluster. Random when omitted.
    #[arg(long, env = "RELAY_SERVER_NAME")]
    pub server_name: Option<String>,

    /// Host clients use to reach this server.
    #[arg(long, env = "RELAY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port clients use to reach this server.
    #[arg(long, env = "RELAY_PORT", default_value_t = 6020)]
    pub port: u16,

    /// Host of the raw TCP endpoint.
    #[arg(long, env = "RELAY_TCP_HOST", default_value = "127.0.0.1")]
    pub tcp_host: String,

    /// Port of the raw TCP endpoint.
    #[arg(long, env = "RELAY_TCP_PORT", default_value_t = 6021)]
    pub tcp_port: u16,

    /// Local address of the cluster transport.
    #[arg(long, env = "RELAY_GOSSIP_BIND", default_value = "127.0.0.1:7000")]
    pub gossip_bind: SocketAddr,

    /// Cluster transport address of another node. Repeatable.
    #[arg(long = "peer", env = "RELAY_PEERS", value_delimiter = ',')]
    pub peers: Vec<SocketAddr>,

    /// Address of the introspection HTTP endpoint.
    #[arg(long, env = "RELAY_HTTP_BIND", default_value = "127.0.0.1:8080")]
    pub http_bind: SocketAddr,

    /// Interval between two liveness announcements of this node, in milliseconds.
    #[arg(long, env = "RELAY_HEARTBEAT_OUT_MS", default_value_t = 1_000)]
    pub heartbeat_out_ms: u64,

    /// Silence after which a peer is dropped, in milliseconds.
    #[arg(long, env = "RELAY_HEARTBEAT_IN_MS", default_value_t = 5_000)]
    pub heartbeat_in_ms: u64,
}

impl NodeArgs {
    pub fn server_config(&self) -> ServerConfig {
        let server_name = self
            .server_name
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        ServerConfig::new(
            server_name,
            self.host.clone(),
            self.port,
            self.tcp_host.clone(),
            self.tcp_port,
        )
    }

    /// Heartbeat timing, rejected unless `heartbeat_in` exceeds `heartbeat_out`.
    pub fn cluster_settings(&self) -> Result<ClusterSettings> {
        if self.heartbeat_out_ms == 0 {
            anyhow::bail!("--heartbeat-out-ms must be greater than zero");
        }
        if self.heartbeat_in_ms <= self.heartbeat_out_ms {
            anyhow::bail!(
                "--heartbeat-in-ms ({}) must be greater than --heartbeat-out-ms ({})",
                self.heartbeat_in_ms,
                self.heartbeat_out_ms
            );
        }

        Ok(ClusterSettings::new(
            Duration::from_millis(self.heartbeat_out_ms),
            Duration::from_millis(self.heartbeat_in_ms),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> NodeArgs {
        let mut argv = vec!["relay-node"];
        argv.extend_from_slice(args);
        NodeArgs::try_parse_from(argv).expect("Failed to parse args")
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);

        assert_eq!(args.port, 6020);
        assert_eq!(args.tcp_port, 6021);
        assert!(args.peers.is_empty());

        let settings = args.cluster_settings().unwrap();
        assert_eq!(settings, ClusterSettings::default());
    }

    #[test]
    fn test_server_config_from_flags() {
        let args = parse(&[
            "--server-name",
            "relay-1",
            "--host",
            "10.0.0.5",
            "--port",
            "7020",
            "--tcp-host",
            "10.0.0.6",
            "--tcp-port",
            "7021",
        ]);

        let config = args.server_config();
        assert_eq!(config, ServerConfig::new("relay-1", "10.0.0.5", 7020, "10.0.0.6", 7021));
    }

    #[test]
    fn test_random_server_name_when_omitted() {
        let args = parse(&[]);

        let first = args.server_config();
        let second = args.server_config();
        assert!(!first.server_name.is_empty());
        assert_ne!(first.server_name, second.server_name);
    }

    #[test]
    fn test_multiple_peers() {
        let args = parse(&["--peer", "127.0.0.1:7001", "--peer", "127.0.0.1:7002"]);
        assert_eq!(args.peers.len(), 2);

        let args = parse(&["--peer", "127.0.0.1:7001,127.0.0.1:7002"]);
        assert_eq!(args.peers.len(), 2);
    }

    #[test]
    fn test_heartbeat_in_must_exceed_heartbeat_out() {
        let args = parse(&["--heartbeat-out-ms", "500", "--heartbeat-in-ms", "500"]);
        assert!(args.cluster_settings().is_err());

        let args = parse(&["--heartbeat-out-ms", "0", "--heartbeat-in-ms", "500"]);
        assert!(args.cluster_settings().is_err());

        let args = parse(&["--heartbeat-out-ms", "50", "--heartbeat-in-ms", "200"]);
        let settings = args.cluster_settings().unwrap();
        assert_eq!(settings.heartbeat_out, Duration::from_millis(50));
        assert_eq!(settings.heartbeat_in, Duration::from_millis(200));
    }

    #[test]
    fn test_rejects_invalid_address() {
        let result = NodeArgs::try_parse_from(["relay-node", "--gossip-bind", "not-an-addr"]);
        assert!(result.is_err());
    }
}
