//! Overlay CLI entry point.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::Result;
use overlay_net_peer::PeerAddress;
use overlay_observability::{LogArgs, MetricsArgs, initialize_logging, initialize_metrics};

use crate::node;

/// Overlay - peer-to-peer order overlay node
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct OverlayCli {
    /// Logging configuration (applies to all subcommands).
    #[command(flatten)]
    pub(crate) logs: LogArgs,

    /// Metrics configuration (applies to all subcommands).
    #[command(flatten)]
    pub(crate) metrics: MetricsArgs,

    #[command(subcommand)]
    pub(crate) command: OverlayCommands,
}

#[derive(Debug, Subcommand)]
pub(crate) enum OverlayCommands {
    /// Run an overlay node.
    Node(NodeArgs),
}

#[derive(Debug, clap::Args)]
#[command(next_help_heading = "Network")]
pub(crate) struct NodeArgs {
    /// Address to accept inbound peers on.
    #[arg(long, value_name = "ADDR")]
    pub(crate) listen: Option<SocketAddr>,

    /// Peer to dial on startup. May be repeated.
    #[arg(long = "connect", value_name = "HOST:PORT")]
    pub(crate) connect: Vec<PeerAddress>,

    /// Peer configuration file (TOML).
    #[arg(long, value_name = "FILE")]
    pub(crate) config: Option<PathBuf>,

    /// Identity announced to peers. Random when omitted.
    #[arg(long = "node-key", value_name = "KEY")]
    pub(crate) node_key: Option<String>,
}

pub(crate) async fn run() -> Result<()> {
    let cli = OverlayCli::parse();
    initialize_logging(&cli.logs)?;
    initialize_metrics(&cli.metrics)?;

    match cli.command {
        OverlayCommands::Node(args) => node::run(args).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        OverlayCli::command().debug_assert();
    }

    #[test]
    fn test_parse_node_args() {
        let cli = OverlayCli::try_parse_from([
            "overlay",
            "-v",
            "--metrics",
            "127.0.0.1:9100",
            "node",
            "--listen",
            "0.0.0.0:8885",
            "--connect",
            "10.0.0.1:8885",
            "--connect",
            "[::1]:8885",
            "--node-key",
            "alice",
        ])
        .unwrap();

        assert_eq!(cli.logs.verbosity, 1);
        assert_eq!(cli.metrics.listen, Some("127.0.0.1:9100".parse().unwrap()));
        let OverlayCommands::Node(args) = cli.command;
        assert_eq!(args.listen, Some("0.0.0.0:8885".parse().unwrap()));
        assert_eq!(args.connect.len(), 2);
        assert_eq!(args.connect.last().unwrap().to_string(), "[::1]:8885");
        assert_eq!(args.node_key.as_deref(), Some("alice"));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_rejects_bad_peer_address() {
        assert!(OverlayCli::try_parse_from(["overlay", "node", "--connect", "nohost"]).is_err());
    }
}
