//! Clap CLI definitions for metanode.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
Examples:
  metanode directory               Run a directory peer
  metanode node                    Run a node
  metanode node --register         Run a node and register with its directory

Configuration is read from ~/.metanode/config.toml unless --config is given.";

#[derive(Parser)]
#[command(
    name = "metanode",
    version,
    about = "Peer-to-peer metadata node",
    after_help = AFTER_HELP,
)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a node serving the ping, id, query and data protocols.
    Node {
        /// Register with the configured directory and keep the registration alive.
        #[arg(long)]
        register: bool,
    },
    /// Run a directory peer that other nodes register with.
    Directory,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_node_register() {
        let cli = Cli::parse_from(["metanode", "--config", "/tmp/n.toml", "node", "--register"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/n.toml")));
        assert!(matches!(cli.command, Commands::Node { register: true }));
    }

    #[test]
    fn test_parse_directory() {
        let cli = Cli::parse_from(["metanode", "directory"]);
        assert!(cli.config.is_none());
        assert!(matches!(cli.command, Commands::Directory));
    }
}
