//! metanode protocol layer.
//!
//! Each protocol runs on its own stream, selected by a protocol id:
//!
//! - `node.ping`, `node.id`: one request, one response
//! - `node.query`, `node.data`: one request, a stream of responses ending
//!   in an `end` or `error` frame
//! - `dir.register`: one-way heartbeats from a node to its directory
//! - `dir.lookup`, `dir.list`: one request, one response
//!
//! Frames are length-prefixed JSON (see [`codec`]). A [`Node`] serves the
//! node protocols, registers with and queries a directory, and calls other
//! nodes; [`DirectoryServer`] serves the directory protocols.

pub mod codec;
pub mod directory;
pub mod error;
pub mod expand;
pub mod handlers;
pub mod message;
pub mod node;
pub mod remote;
pub mod store;
pub mod transport;

pub use directory::{DirectoryClient, DirectoryServer, HeartbeatHandle, HeartbeatOutcome};
pub use error::{NodeError, NodeResult, WireError};
pub use node::Node;
pub use remote::{DataStream, QueryStream, RemoteNode};
pub use store::{MemoryStore, StatementStore};
pub use transport::{MemoryNetwork, MemoryTransport, TcpTransport, Transport};
