//! Directory client and server.
//!
//! A node knows at most one directory peer. It registers with it over a
//! long-lived heartbeat stream and asks it to resolve peer ids it has no open
//! session with.

pub mod heartbeat;
pub mod server;

pub use heartbeat::{HeartbeatHandle, HeartbeatOutcome};
pub use server::{DirectoryEntry, DirectoryRegistry, DirectoryServer, EntryState};

use crate::codec::{read_frame, write_frame};
use crate::error::{NodeError, NodeResult};
use crate::message::{
    protocol, ListPeersRequest, ListPeersResponse, LookupPeerRequest, LookupPeerResponse,
};
use crate::transport::Transport;
use metanode_types::config::DEFAULT_HEARTBEAT_INTERVAL_SECS;
use metanode_types::{PeerId, PeerInfo};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client side of the `dir.*` protocols, bound to the node's directory peer.
#[derive(Clone)]
pub struct DirectoryClient {
    transport: Arc<dyn Transport>,
    binding: Arc<RwLock<Option<PeerInfo>>>,
    heartbeat_interval: Duration,
}

impl DirectoryClient {
    /// A zero `heartbeat_interval` falls back to the default interval.
    pub fn new(transport: Arc<dyn Transport>, heartbeat_interval: Duration) -> Self {
        let heartbeat_interval = if heartbeat_interval.is_zero() {
            warn!(
                default_secs = DEFAULT_HEARTBEAT_INTERVAL_SECS,
                "Heartbeat interval of zero, using default"
            );
            Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS)
        } else {
            heartbeat_interval
        };
        Self {
            transport,
            binding: Arc::new(RwLock::new(None)),
            heartbeat_interval,
        }
    }

    /// Replace the directory binding. Calls already in flight keep the
    /// binding they started with.
    pub fn set_directory(&self, directory: Option<PeerInfo>) {
        let mut binding = self.binding.write().unwrap_or_else(|e| e.into_inner());
        match &directory {
            Some(peer) => info!(directory = %peer, "Directory configured"),
            None => info!("Directory binding cleared"),
        }
        *binding = directory;
    }

    /// The current directory binding.
    pub fn directory(&self) -> Option<PeerInfo> {
        self.binding
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    fn require_directory(&self) -> NodeResult<PeerInfo> {
        self.directory().ok_or(NodeError::NoDirectoryConfigured)
    }

    /// Register with the directory and keep the registration alive.
    ///
    /// Resolves once the register stream is open and the first heartbeat has
    /// been sent; the loop then runs in the background until aborted through
    /// the returned handle or until the directory closes the stream.
    pub async fn register(&self) -> NodeResult<HeartbeatHandle> {
        let directory = self.require_directory()?;
        let mut stream = self
            .transport
            .dial(&directory, protocol::DIR_REGISTER)
            .await?;
        heartbeat::emit(&mut stream, self.transport.as_ref()).await?;
        info!(
            directory = %directory.id,
            interval_secs = self.heartbeat_interval.as_secs_f64(),
            "Registered with directory"
        );
        Ok(heartbeat::spawn(
            stream,
            Arc::clone(&self.transport),
            self.heartbeat_interval,
        ))
    }

    /// Resolve a peer id to its address info.
    ///
    /// A peer with an open session is answered from the transport's peer
    /// book without touching the network. `Ok(None)` means the directory has
    /// no record of the peer.
    pub async fn lookup(&self, id: &str) -> NodeResult<Option<PeerInfo>> {
        let peer_id = PeerId::parse(id)?;

        if let Some(cached) = self.transport.lookup_cached(&peer_id) {
            debug!(peer = %peer_id, "Peer book hit");
            return Ok(Some(cached));
        }

        let directory = self.require_directory()?;
        let mut stream = self
            .transport
            .dial(&directory, protocol::DIR_LOOKUP)
            .await?;
        write_frame(
            &mut stream,
            &LookupPeerRequest {
                id: peer_id.to_string(),
            },
        )
        .await?;
        let response: LookupPeerResponse = read_frame(&mut stream).await?;

        match response.peer {
            Some(info) if info.id != peer_id => {
                warn!(
                    requested = %peer_id,
                    answered = %info.id,
                    "Directory answered for a different peer"
                );
                Err(NodeError::Remote(format!(
                    "directory answered lookup for {} with {}",
                    peer_id, info.id
                )))
            }
            Some(info) => {
                debug!(peer = %peer_id, "Resolved through directory");
                Ok(Some(info))
            }
            None => {
                debug!(peer = %peer_id, "Directory has no record");
                Ok(None)
            }
        }
    }

    /// Ids of the peers currently registered with the directory.
    pub async fn list_peers(&self) -> NodeResult<Vec<PeerId>> {
        let directory = self.require_directory()?;
        let mut stream = self.transport.dial(&directory, protocol::DIR_LIST).await?;
        write_frame(&mut stream, &ListPeersRequest {}).await?;
        let response: ListPeersResponse = read_frame(&mut stream).await?;
        Ok(response.peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryNetwork, MemoryTransport};
    use metanode_types::NodeIdentity;

    fn client_on(network: &MemoryNetwork) -> (Arc<MemoryTransport>, DirectoryClient) {
        let transport = Arc::new(network.transport(NodeIdentity::generate().peer_id()));
        let client = DirectoryClient::new(transport.clone(), Duration::from_secs(300));
        (transport, client)
    }

    #[tokio::test]
    async fn test_lookup_rejects_malformed_id_without_dialing() {
        let network = MemoryNetwork::new();
        let (transport, client) = client_on(&network);
        client.set_directory(Some(PeerInfo::new(
            NodeIdentity::generate().peer_id(),
            vec![],
        )));

        let err = client.lookup("not-a-peer-id").await.unwrap_err();
        assert!(err.is_invalid_input());
        assert_eq!(transport.total_dials(), 0);
    }

    #[tokio::test]
    async fn test_no_directory_configured() {
        let network = MemoryNetwork::new();
        let (transport, client) = client_on(&network);
        let id = NodeIdentity::generate().peer_id();

        assert!(matches!(
            client.lookup(id.as_str()).await,
            Err(NodeError::NoDirectoryConfigured)
        ));
        assert!(matches!(
            client.register().await,
            Err(NodeError::NoDirectoryConfigured)
        ));
        assert!(matches!(
            client.list_peers().await,
            Err(NodeError::NoDirectoryConfigured)
        ));
        assert_eq!(transport.total_dials(), 0);
    }

    #[test]
    fn test_binding_last_write_wins() {
        let network = MemoryNetwork::new();
        let (_transport, client) = client_on(&network);
        let first = PeerInfo::new(NodeIdentity::generate().peer_id(), vec![]);
        let second = PeerInfo::new(NodeIdentity::generate().peer_id(), vec![]);

        client.set_directory(Some(first));
        client.set_directory(Some(second.clone()));
        assert_eq!(client.directory(), Some(second));

        client.set_directory(None);
        assert!(client.directory().is_none());
    }

    #[tokio::test]
    async fn test_zero_heartbeat_interval_uses_default() {
        let network = MemoryNetwork::new();
        let directory = network.transport(NodeIdentity::generate().peer_id());
        let server = DirectoryServer::new();
        server.install(&directory);
        directory.start().await.unwrap();

        let transport = Arc::new(network.transport(NodeIdentity::generate().peer_id()));
        let client = DirectoryClient::new(transport.clone(), Duration::ZERO);
        assert_eq!(
            client.heartbeat_interval(),
            Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS)
        );

        client.set_directory(Some(directory.local_peer()));
        let handle = client.register().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        handle.abort();
        assert!(matches!(handle.finished().await, HeartbeatOutcome::Aborted));
    }
}
