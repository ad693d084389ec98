//! Wire protocol message types.
//!
//! Every protocol runs on its own stream. Messages are JSON frames prefixed
//! with a 4-byte big-endian length (see [`crate::codec`]). Streaming
//! responses end with an explicit `end` frame, or an `error` frame that
//! terminates the stream.

use metanode_types::statement::{DataObject, QueryValue};
use metanode_types::{PeerId, PeerInfo};
use serde::{Deserialize, Serialize};

/// Protocol identifiers.
pub mod protocol {
    pub const PING: &str = "/metanode/node/ping";
    pub const ID: &str = "/metanode/node/id";
    pub const QUERY: &str = "/metanode/node/query";
    pub const DATA: &str = "/metanode/node/data";
    pub const DIR_REGISTER: &str = "/metanode/dir/register";
    pub const DIR_LOOKUP: &str = "/metanode/dir/lookup";
    pub const DIR_LIST: &str = "/metanode/dir/list";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfoRequest {}

/// Response to an identity request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub peer: PeerId,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

/// One frame of a query response stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum QueryResult {
    Value { value: QueryValue },
    End,
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    pub keys: Vec<String>,
}

/// One frame of a data response stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DataResult {
    Data { data: DataObject },
    End,
    Error { error: String },
}

/// Heartbeat frame on the register protocol. One-way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPeer {
    pub info: PeerInfo,
}

/// The id travels as a plain string so the directory can answer malformed
/// ids with an absent result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupPeerRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupPeerResponse {
    pub peer: Option<PeerInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPeersRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPeersResponse {
    pub peers: Vec<PeerId>,
}

/// First frame on a TCP session: which protocol the dialer wants to speak.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSelect {
    pub protocol: String,
}

/// Listener's answer to [`ProtocolSelect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolAck {
    pub accepted: bool,
}
