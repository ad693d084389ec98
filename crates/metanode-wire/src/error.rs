//! Error types for framing and node operations.

use metanode_types::ParseError;
use thiserror::Error;

/// Errors from the stream codec.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("Frame truncated: expected {expected} bytes")]
    Truncated { expected: u32 },
}

/// Errors surfaced by node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Malformed peer id or address; raised before any network I/O.
    #[error(transparent)]
    InvalidInput(#[from] ParseError),

    /// Registration or lookup attempted without a directory binding.
    #[error("No directory peer configured")]
    NoDirectoryConfigured,

    /// The peer is unknown to the peer book, address decoding and the directory.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Dial or stream I/O failure.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Malformed or undecodable frame.
    #[error("Protocol error: {0}")]
    Protocol(WireError),

    /// The remote peer answered with an error frame.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Data fetch failed while expanding one query result.
    #[error("Failed to fetch objects {ids:?}: {source}")]
    ExpansionFetch {
        ids: Vec<String>,
        #[source]
        source: Box<NodeError>,
    },

    /// The local statement store failed.
    #[error("Store error: {0}")]
    Store(String),
}

impl NodeError {
    /// True for errors detected from the input alone.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

impl From<WireError> for NodeError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Io(io) => Self::Connectivity(io.to_string()),
            other => Self::Protocol(other),
        }
    }
}

/// Alias for node results.
pub type NodeResult<T> = Result<T, NodeError>;
