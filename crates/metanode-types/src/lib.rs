//! Core types for metanode peers.
//!
//! This crate defines the shared data model used by the wire protocol layer:
//! peer identities and addresses, the statement/query value model, and node
//! configuration. It performs no I/O beyond reading a config file.

pub mod config;
pub mod error;
pub mod identity;
pub mod peer;
pub mod statement;

pub use error::ParseError;
pub use identity::NodeIdentity;
pub use multiaddr::{Multiaddr, Protocol};
pub use peer::{
    parse_multiaddr, parse_peer_address, socket_multiaddr, tcp_target, PeerId, PeerInfo, PeerRef,
};
