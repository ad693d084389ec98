//! metanode CLI: runs a node or a directory over TCP.

mod cli;

use crate::cli::{Cli, Commands};
use clap::Parser;
use metanode_types::config::{load_config, NodeConfig};
use metanode_types::{parse_multiaddr, Multiaddr, NodeIdentity};
use metanode_wire::{DirectoryServer, MemoryStore, Node, TcpTransport, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn fail(msg: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("  {msg}: {err}");
    std::process::exit(1);
}

fn identity(config: &NodeConfig) -> NodeIdentity {
    let identity = config
        .identity()
        .unwrap_or_else(|e| fail("Invalid identity_secret", e));
    if config.identity_secret.is_none() {
        warn!(
            peer = %identity.peer_id(),
            "No identity_secret configured, using a temporary identity"
        );
    }
    identity
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
    }
}

async fn cmd_node(config_path: Option<PathBuf>, register: bool) {
    let config = load_config(config_path.as_deref());
    let identity = identity(&config);
    let transport = Arc::new(TcpTransport::new(identity.peer_id()));
    let node = Node::new(&config, transport, Some(Arc::new(MemoryStore::new())))
        .unwrap_or_else(|e| fail("Invalid configuration", e));

    if let Err(e) = node.start().await {
        fail("Failed to start node", e);
    }
    for addr in node.peer_info().full_addresses() {
        println!("  Listening on {addr}");
    }

    let heartbeat = if register {
        match node.register().await {
            Ok(handle) => Some(handle),
            Err(e) => fail("Registration failed", e),
        }
    } else {
        None
    };

    println!("  Press Ctrl+C to stop");
    wait_for_ctrl_c().await;

    if let Some(handle) = heartbeat {
        handle.abort();
        let outcome = handle.finished().await;
        info!(outcome = %outcome, "Heartbeat stopped");
    }
    node.stop().await;
}

async fn cmd_directory(config_path: Option<PathBuf>) {
    let config = load_config(config_path.as_deref());
    let identity = identity(&config);
    let listen: Vec<Multiaddr> = config
        .listen_addrs
        .iter()
        .map(|a| parse_multiaddr(a))
        .collect::<Result<_, _>>()
        .unwrap_or_else(|e| fail("Invalid listen address", e));

    let transport = TcpTransport::new(identity.peer_id());
    transport.listen(listen);
    let server = DirectoryServer::new();
    server.install(&transport);
    if let Err(e) = transport.start().await {
        fail("Failed to start directory", e);
    }
    for addr in transport.local_peer().full_addresses() {
        println!("  Directory at {addr}");
    }

    println!("  Press Ctrl+C to stop");
    wait_for_ctrl_c().await;

    info!(
        registered = server.registry().total_count(),
        connected = server.registry().connected_count(),
        "Directory shutting down"
    );
    transport.stop().await;
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let rt = tokio::runtime::Runtime::new()
        .unwrap_or_else(|e| fail("Failed to start async runtime", e));
    rt.block_on(async {
        match cli.command {
            Commands::Node { register } => cmd_node(cli.config, register).await,
            Commands::Directory => cmd_directory(cli.config).await,
        }
    });
}
