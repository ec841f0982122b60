//! # config
//!
//! why: turn command-line flags into a validated node configuration
//! relations: NodeConfig is consumed by node.rs; NodeArgs is parsed by main.rs
//! what: NodeArgs (clap), NodeConfig

use clap::Parser;
use raft_core::{NodeId, RaftConfig};
use std::net::{Ipv4Addr, SocketAddr};

/// Run a single raft node
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct NodeArgs {
    /// Node identity. Defaults to 127.0.0.1:<port>.
    #[arg(long)]
    pub id: Option<String>,

    /// Port the peer gateway listens on.
    #[arg(long, default_value_t = 7000)]
    pub port: u16,

    /// Peer address (host:port). Repeat the flag or separate with commas.
    #[arg(long = "peer", value_delimiter = ',')]
    pub peers: Vec<String>,

    #[arg(long, default_value_t = 50)]
    pub heartbeat_ms: u64,

    #[arg(long, default_value_t = 500)]
    pub election_min_ms: u64,

    #[arg(long, default_value_t = 1000)]
    pub election_max_ms: u64,

    /// Upper bound on a single peer rpc.
    #[arg(long, default_value_t = 200)]
    pub rpc_timeout_ms: u64,

    /// Seed for election timeouts, for reproducible runs.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub id: NodeId,
    pub port: u16,
    /// Every other member, in configured order
    pub peers: Vec<NodeId>,
    pub raft: RaftConfig,
}

impl NodeConfig {
    pub fn new(id: impl Into<NodeId>, peers: Vec<NodeId>) -> Self {
        Self {
            id: id.into(),
            port: 0,
            peers,
            raft: RaftConfig::default(),
        }
    }

    pub fn with_raft(mut self, raft: RaftConfig) -> Self {
        self.raft = raft;
        self
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

impl From<NodeArgs> for NodeConfig {
    fn from(args: NodeArgs) -> Self {
        let id = args
            .id
            .unwrap_or_else(|| format!("127.0.0.1:{}", args.port));
        Self {
            id,
            port: args.port,
            peers: args.peers,
            raft: RaftConfig {
                election_timeout_min: args.election_min_ms,
                election_timeout_max: args.election_max_ms,
                heartbeat_interval: args.heartbeat_ms,
                rpc_timeout: args.rpc_timeout_ms,
                seed: args.seed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_raft_defaults() {
        let args = NodeArgs::try_parse_from(["raft-node"]).unwrap();
        let config = NodeConfig::from(args);

        assert_eq!(config.id, "127.0.0.1:7000");
        assert!(config.peers.is_empty());
        assert_eq!(config.raft, RaftConfig::default());
    }

    #[test]
    fn peers_repeat_and_split_on_commas() {
        let args = NodeArgs::try_parse_from([
            "raft-node",
            "--port",
            "7001",
            "--peer",
            "127.0.0.1:7002,127.0.0.1:7003",
            "--peer",
            "127.0.0.1:7004",
        ])
        .unwrap();
        let config = NodeConfig::from(args);

        assert_eq!(config.id, "127.0.0.1:7001");
        assert_eq!(
            config.peers,
            vec!["127.0.0.1:7002", "127.0.0.1:7003", "127.0.0.1:7004"]
        );
        assert_eq!(config.listen_addr().port(), 7001);
    }

    #[test]
    fn timing_flags_reach_raft_config() {
        let args = NodeArgs::try_parse_from([
            "raft-node",
            "--id",
            "n1",
            "--heartbeat-ms",
            "20",
            "--election-min-ms",
            "150",
            "--election-max-ms",
            "300",
            "--rpc-timeout-ms",
            "40",
            "--seed",
            "9",
        ])
        .unwrap();
        let raft = NodeConfig::from(args).raft;

        assert_eq!(raft.heartbeat_interval, 20);
        assert_eq!(raft.election_timeout_min, 150);
        assert_eq!(raft.election_timeout_max, 300);
        assert_eq!(raft.rpc_timeout, 40);
        assert_eq!(raft.seed, Some(9));
        assert!(raft.validate().is_ok());
    }
}
