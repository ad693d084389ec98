//! Node configuration loaded from `~/.metanode/config.toml` with defaults.

use crate::error::ParseError;
use crate::identity::NodeIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default interval between directory registration heartbeats (seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 300;

/// Default number of concurrent data fetches during query expansion.
pub const DEFAULT_EXPANSION_CONCURRENCY: usize = 16;

/// Default human-readable info string served on the identity protocol.
pub const DEFAULT_INFO_MESSAGE: &str = "metanode";

/// Configuration for a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Addresses to listen on, e.g. `/ip4/0.0.0.0/tcp/9002`.
    pub listen_addrs: Vec<String>,
    /// Full address of the directory peer (`<addr>/p2p/<id>`).
    pub directory: Option<String>,
    /// Info string returned to identity requests.
    pub info_message: String,
    /// Seconds between registration heartbeats.
    pub heartbeat_interval_secs: u64,
    /// Maximum concurrent data fetches while expanding query results.
    pub expansion_concurrency: usize,
    /// Hex-encoded Ed25519 secret key. A fresh identity is generated when absent.
    pub identity_secret: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec!["/ip4/127.0.0.1/tcp/9002".to_string()],
            directory: None,
            info_message: DEFAULT_INFO_MESSAGE.to_string(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            expansion_concurrency: DEFAULT_EXPANSION_CONCURRENCY,
            identity_secret: None,
        }
    }
}

impl NodeConfig {
    /// The configured identity, or a freshly generated one when no secret is set.
    pub fn identity(&self) -> Result<NodeIdentity, ParseError> {
        match &self.identity_secret {
            Some(secret) => NodeIdentity::from_secret_hex(secret),
            None => Ok(NodeIdentity::generate()),
        }
    }
}

/// Default config location: `~/.metanode/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".metanode")
        .join("config.toml")
}

/// Load node configuration from a TOML file, with defaults.
///
/// Missing, unreadable or malformed files fall back to [`NodeConfig::default`].
pub fn load_config(path: Option<&Path>) -> NodeConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return NodeConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<NodeConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                NodeConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            NodeConfig::default()
        }
    }
}
