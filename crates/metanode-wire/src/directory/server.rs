//! Directory server: the registry other nodes register with and query.
//!
//! A registration lives as long as at least one of its `dir.register`
//! streams is open. When the last stream ends the entry is kept but marked
//! disconnected, and lookups stop returning it until the peer registers
//! again. Disconnected entries older than [`DISCONNECTED_RETENTION_SECS`]
//! are pruned whenever a register stream closes.

use crate::codec::{read_frame, write_frame};
use crate::error::{NodeResult, WireError};
use crate::message::{
    protocol, ListPeersRequest, ListPeersResponse, LookupPeerRequest, LookupPeerResponse,
    RegisterPeer,
};
use crate::transport::{BoxedStream, StreamHandler, Transport};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metanode_types::{PeerId, PeerInfo};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// How long a disconnected entry is kept after its last heartbeat.
pub const DISCONNECTED_RETENTION_SECS: i64 = 3600;

/// Registration state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// At least one register stream open.
    Connected,
    /// All register streams ended; kept until the peer registers again.
    Disconnected,
}

/// A single registered peer.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Latest address info the peer announced.
    pub info: PeerInfo,
    pub state: EntryState,
    /// First registration.
    pub registered_at: DateTime<Utc>,
    /// Most recent heartbeat.
    pub last_heartbeat: DateTime<Utc>,
    /// Heartbeats received since the first registration.
    pub heartbeats: u64,
    /// Register streams currently open for this peer.
    pub open_streams: usize,
}

/// Thread-safe table of registered peers.
#[derive(Debug, Clone, Default)]
pub struct DirectoryRegistry {
    peers: Arc<RwLock<HashMap<PeerId, DirectoryEntry>>>,
}

impl DirectoryRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat, creating the entry on first registration.
    pub fn record_heartbeat(&self, info: PeerInfo) {
        let now = Utc::now();
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        match peers.get_mut(&info.id) {
            Some(entry) => {
                if entry.state == EntryState::Disconnected {
                    info!(peer = %info.id, "Peer re-registered");
                }
                entry.info = info;
                entry.state = EntryState::Connected;
                entry.last_heartbeat = now;
                entry.heartbeats += 1;
            }
            None => {
                info!(peer = %info.id, addrs = info.addrs.len(), "Peer registered");
                peers.insert(
                    info.id.clone(),
                    DirectoryEntry {
                        info,
                        state: EntryState::Connected,
                        registered_at: now,
                        last_heartbeat: now,
                        heartbeats: 1,
                        open_streams: 0,
                    },
                );
            }
        }
    }

    /// Record the first heartbeat of a new register stream.
    pub fn open_stream(&self, info: PeerInfo) {
        let id = info.id.clone();
        self.record_heartbeat(info);
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(&id) {
            entry.open_streams += 1;
        }
    }

    /// A register stream for `id` ended. The entry turns disconnected once
    /// no stream is left.
    pub fn close_stream(&self, id: &PeerId) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(id) {
            entry.open_streams = entry.open_streams.saturating_sub(1);
            if entry.open_streams == 0 {
                entry.state = EntryState::Disconnected;
                info!(peer = %id, "Peer disconnected from directory");
            } else {
                debug!(peer = %id, open = entry.open_streams, "Register stream closed");
            }
        }
    }

    /// Drop disconnected entries whose last heartbeat is at least `max_age`
    /// old. Returns how many were removed.
    pub fn prune_disconnected(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        let before = peers.len();
        peers.retain(|_, e| e.state == EntryState::Connected || now - e.last_heartbeat < max_age);
        let removed = before - peers.len();
        if removed > 0 {
            info!(removed, remaining = peers.len(), "Pruned disconnected peers");
        }
        removed
    }

    /// Address info of a connected peer. Malformed ids are simply absent.
    pub fn lookup(&self, id: &str) -> Option<PeerInfo> {
        let id = PeerId::parse(id).ok()?;
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .get(&id)
            .filter(|e| e.state == EntryState::Connected)
            .map(|e| e.info.clone())
    }

    /// Snapshot of a single entry, whatever its state.
    pub fn get(&self, id: &PeerId) -> Option<DirectoryEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(id).cloned()
    }

    /// Ids of connected peers, sorted.
    pub fn connected_ids(&self) -> Vec<PeerId> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<PeerId> = peers
            .values()
            .filter(|e| e.state == EntryState::Connected)
            .map(|e| e.info.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn connected_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|e| e.state == EntryState::Connected)
            .count()
    }

    /// Total known peers, connected or not.
    pub fn total_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.len()
    }
}

/// Serves `dir.register`, `dir.lookup` and `dir.list` from a [`DirectoryRegistry`].
#[derive(Debug, Clone, Default)]
pub struct DirectoryServer {
    registry: DirectoryRegistry,
}

impl DirectoryServer {
    /// Create a server with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry backing this server.
    pub fn registry(&self) -> &DirectoryRegistry {
        &self.registry
    }

    /// Register the directory protocol handlers on `transport`.
    pub fn install(&self, transport: &dyn Transport) {
        let registry = self.registry.clone();
        transport.handle(
            protocol::DIR_REGISTER,
            Arc::new(RegisterHandler {
                registry: registry.clone(),
            }),
        );
        transport.handle(
            protocol::DIR_LOOKUP,
            Arc::new(LookupHandler {
                registry: registry.clone(),
            }),
        );
        transport.handle(protocol::DIR_LIST, Arc::new(ListHandler { registry }));
    }
}

struct RegisterHandler {
    registry: DirectoryRegistry,
}

#[async_trait]
impl StreamHandler for RegisterHandler {
    async fn handle(&self, mut stream: BoxedStream) -> NodeResult<()> {
        let mut seen: Vec<PeerId> = Vec::new();
        let result = loop {
            match read_frame::<_, RegisterPeer>(&mut stream).await {
                Ok(msg) => {
                    debug!(peer = %msg.info.id, "Heartbeat received");
                    if seen.contains(&msg.info.id) {
                        self.registry.record_heartbeat(msg.info);
                    } else {
                        seen.push(msg.info.id.clone());
                        self.registry.open_stream(msg.info);
                    }
                }
                Err(WireError::ConnectionClosed) => break Ok(()),
                Err(e) => break Err(e.into()),
            }
        };
        for id in &seen {
            self.registry.close_stream(id);
        }
        self.registry.prune_disconnected(Duration::seconds(DISCONNECTED_RETENTION_SECS));
        result
    }
}

struct LookupHandler {
    registry: DirectoryRegistry,
}

#[async_trait]
impl StreamHandler for LookupHandler {
    async fn handle(&self, mut stream: BoxedStream) -> NodeResult<()> {
        let request: LookupPeerRequest = read_frame(&mut stream).await?;
        let peer = self.registry.lookup(&request.id);
        debug!(peer = %request.id, found = peer.is_some(), "Lookup");
        write_frame(&mut stream, &LookupPeerResponse { peer }).await?;
        Ok(())
    }
}

struct ListHandler {
    registry: DirectoryRegistry,
}

#[async_trait]
impl StreamHandler for ListHandler {
    async fn handle(&self, mut stream: BoxedStream) -> NodeResult<()> {
        let _: ListPeersRequest = read_frame(&mut stream).await?;
        let peers = self.registry.connected_ids();
        write_frame(&mut stream, &ListPeersResponse { peers }).await?;
        Ok(())
    }
}
