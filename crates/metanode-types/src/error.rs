//! Input validation errors.

use thiserror::Error;

/// Malformed input detected before any network I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A peer id is not a base58 sha2-256 multihash.
    #[error("Invalid peer id '{id}': {reason}")]
    InvalidPeerId {
        /// The rejected input.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An address string could not be decoded.
    #[error("Invalid address '{addr}': {reason}")]
    InvalidAddress {
        /// The rejected input.
        addr: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A node secret key could not be decoded.
    #[error("Invalid identity key: {0}")]
    InvalidKey(String),
}

impl ParseError {
    pub(crate) fn peer_id(id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPeerId {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn address(addr: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            addr: addr.to_string(),
            reason: reason.into(),
        }
    }
}
