//! In-process transport.
//!
//! A [`MemoryNetwork`] is a hub of started [`MemoryTransport`]s keyed by peer
//! id. Dialing a peer opens a `tokio::io::duplex` pipe and runs the remote
//! handler on the far end. Dial attempts are counted per protocol.

use super::{BoxedStream, PeerBook, ProtocolMux, StreamHandler, TrackedStream, Transport};
use crate::error::{NodeError, NodeResult};
use async_trait::async_trait;
use dashmap::DashMap;
use metanode_types::{Multiaddr, PeerId, PeerInfo, Protocol};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Buffer size of each in-memory pipe direction.
const DUPLEX_BUFFER: usize = 256 * 1024;

/// Shared registry of reachable in-memory peers.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<DashMap<PeerId, ProtocolMux>>,
    next_port: Arc<AtomicU64>,
}

impl MemoryNetwork {
    /// Create a network with no peers attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport for `id` attached to this network, listening on
    /// the next free `/memory/<port>` address.
    pub fn transport(&self, id: PeerId) -> MemoryTransport {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst) + 1;
        let addr = Multiaddr::empty().with(Protocol::Memory(port));
        MemoryTransport {
            network: self.clone(),
            local_id: id,
            addrs: RwLock::new(vec![addr]),
            mux: ProtocolMux::new(),
            peer_book: PeerBook::new(),
            dials: DashMap::new(),
        }
    }

    /// Number of started peers.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    local_id: PeerId,
    addrs: RwLock<Vec<Multiaddr>>,
    mux: ProtocolMux,
    peer_book: PeerBook,
    dials: DashMap<String, usize>,
}

impl MemoryTransport {
    /// Dial attempts made on `protocol`, successful or not.
    pub fn dial_count(&self, protocol: &str) -> usize {
        self.dials.get(protocol).map(|c| *c).unwrap_or(0)
    }

    /// Dial attempts across all protocols.
    pub fn total_dials(&self) -> usize {
        self.dials.iter().map(|c| *c.value()).sum()
    }

    pub fn peer_book(&self) -> &PeerBook {
        &self.peer_book
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer(&self) -> PeerInfo {
        let addrs = self.addrs.read().unwrap_or_else(|e| e.into_inner());
        PeerInfo::new(self.local_id.clone(), addrs.clone())
    }

    fn listen(&self, addrs: Vec<Multiaddr>) {
        let mut current = self.addrs.write().unwrap_or_else(|e| e.into_inner());
        for addr in addrs {
            if !current.contains(&addr) {
                current.push(addr);
            }
        }
    }

    async fn start(&self) -> NodeResult<()> {
        self.network
            .endpoints
            .insert(self.local_id.clone(), self.mux.clone());
        info!(peer = %self.local_id, "Memory transport started");
        Ok(())
    }

    async fn stop(&self) {
        self.network.endpoints.remove(&self.local_id);
        info!(peer = %self.local_id, "Memory transport stopped");
    }

    fn handle(&self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        self.mux.register(protocol, handler);
    }

    async fn dial(&self, peer: &PeerInfo, protocol: &str) -> NodeResult<BoxedStream> {
        *self.dials.entry(protocol.to_string()).or_insert(0) += 1;

        let remote_mux = self
            .network
            .endpoints
            .get(&peer.id)
            .map(|mux| mux.clone())
            .ok_or_else(|| NodeError::Connectivity(format!("peer {} is unreachable", peer.id)))?;
        let handler = remote_mux.get(protocol).ok_or_else(|| {
            NodeError::Connectivity(format!(
                "peer {} does not support protocol {protocol}",
                peer.id
            ))
        })?;

        let (local, remote) = tokio::io::duplex(DUPLEX_BUFFER);
        ProtocolMux::spawn(handler, protocol, Box::new(remote));
        debug!(peer = %peer.id, protocol = %protocol, "Dialed in-memory peer");

        let guard = self.peer_book.open_session(peer);
        Ok(Box::new(TrackedStream::new(local, guard)))
    }

    fn lookup_cached(&self, id: &PeerId) -> Option<PeerInfo> {
        self.peer_book.lookup(id)
    }
}
