//! The node: local protocol handlers, directory membership and remote calls.
//!
//! A [`Node`] owns a transport, an optional statement store and its directory
//! binding. Every remote operation takes anything convertible into a
//! [`PeerRef`] and resolves it first: peer info is used as-is, address
//! strings are decoded locally and bare ids go through the peer book and
//! then the directory.

use crate::directory::{DirectoryClient, HeartbeatHandle};
use crate::error::{NodeError, NodeResult};
use crate::handlers;
use crate::message::NodeInfo;
use crate::remote::{self, DataStream, QueryStream, RemoteNode};
use crate::store::StatementStore;
use crate::transport::Transport;
use metanode_types::config::NodeConfig;
use metanode_types::{parse_multiaddr, parse_peer_address, PeerId, PeerInfo, PeerRef};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct Node {
    transport: Arc<dyn Transport>,
    directory: DirectoryClient,
    info: Arc<RwLock<String>>,
    store: Option<Arc<dyn StatementStore>>,
    expansion_concurrency: usize,
}

impl Node {
    /// Build a node from `config`. Listen addresses are handed to the
    /// transport and the configured directory, if any, becomes the binding.
    pub fn new(
        config: &NodeConfig,
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn StatementStore>>,
    ) -> NodeResult<Self> {
        let listen_addrs = config
            .listen_addrs
            .iter()
            .map(|a| parse_multiaddr(a))
            .collect::<Result<Vec<_>, _>>()?;
        transport.listen(listen_addrs);

        let directory = DirectoryClient::new(
            Arc::clone(&transport),
            Duration::from_secs(config.heartbeat_interval_secs),
        );
        if let Some(addr) = &config.directory {
            directory.set_directory(Some(parse_peer_address(addr)?));
        }

        Ok(Self {
            transport,
            directory,
            info: Arc::new(RwLock::new(config.info_message.clone())),
            store,
            expansion_concurrency: config.expansion_concurrency,
        })
    }

    /// Install the protocol handlers and start the transport.
    pub async fn start(&self) -> NodeResult<()> {
        handlers::install(
            self.transport.as_ref(),
            Arc::clone(&self.info),
            self.store.clone(),
        );
        self.transport.start().await?;
        let local = self.transport.local_peer();
        info!(peer = %local.id, addrs = ?local.full_addresses(), "Node started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.transport.stop().await;
        info!(peer = %self.peer_id(), "Node stopped");
    }

    /// The transport this node listens and dials on.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// This node's id and currently bound addresses.
    pub fn peer_info(&self) -> PeerInfo {
        self.transport.local_peer()
    }

    pub fn peer_id(&self) -> PeerId {
        self.transport.local_peer().id
    }

    pub fn expansion_concurrency(&self) -> usize {
        self.expansion_concurrency
    }

    /// Bind the directory peer. Bare ids are resolved first.
    pub async fn set_directory(&self, peer: impl Into<PeerRef>) -> NodeResult<()> {
        let directory = self.resolve_required(peer.into()).await?;
        self.directory.set_directory(Some(directory));
        Ok(())
    }

    pub fn clear_directory(&self) {
        self.directory.set_directory(None);
    }

    /// The directory this node is bound to, if any.
    pub fn directory(&self) -> Option<PeerInfo> {
        self.directory.directory()
    }

    /// Change the info string served on the identity protocol. Applies to the
    /// next request.
    pub fn set_info(&self, info: impl Into<String>) {
        let mut current = self.info.write().unwrap_or_else(|e| e.into_inner());
        *current = info.into();
    }

    pub fn info(&self) -> String {
        self.info.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// See [`DirectoryClient::register`].
    pub async fn register(&self) -> NodeResult<HeartbeatHandle> {
        self.directory.register().await
    }

    /// See [`DirectoryClient::lookup`].
    pub async fn lookup(&self, id: &str) -> NodeResult<Option<PeerInfo>> {
        self.directory.lookup(id).await
    }

    pub async fn list_peers(&self) -> NodeResult<Vec<PeerId>> {
        self.directory.list_peers().await
    }

    /// Resolve a peer reference to dialable peer info. `Ok(None)` means the
    /// directory has no record of the id.
    pub async fn resolve(&self, peer: impl Into<PeerRef>) -> NodeResult<Option<PeerInfo>> {
        self.resolve_ref(peer.into()).await
    }

    async fn resolve_ref(&self, peer: PeerRef) -> NodeResult<Option<PeerInfo>> {
        match peer {
            PeerRef::Info(info) => Ok(Some(info)),
            PeerRef::Addr(addr) => Ok(Some(parse_peer_address(&addr)?)),
            PeerRef::Id(id) => self.directory.lookup(&id).await,
        }
    }

    async fn resolve_required(&self, peer: PeerRef) -> NodeResult<PeerInfo> {
        let label = match &peer {
            PeerRef::Info(info) => info.id.to_string(),
            PeerRef::Id(id) | PeerRef::Addr(id) => id.clone(),
        };
        self.resolve_ref(peer)
            .await?
            .ok_or(NodeError::PeerNotFound(label))
    }

    /// Resolve once and bind the result.
    pub async fn remote_node(&self, peer: impl Into<PeerRef>) -> NodeResult<RemoteNode> {
        let peer = self.resolve_required(peer.into()).await?;
        Ok(RemoteNode::new(self.clone(), peer))
    }

    pub async fn remote_ping(&self, peer: impl Into<PeerRef>) -> NodeResult<bool> {
        let peer = self.resolve_required(peer.into()).await?;
        remote::ping(self.transport.as_ref(), &peer).await
    }

    pub async fn remote_id(&self, peer: impl Into<PeerRef>) -> NodeResult<NodeInfo> {
        let peer = self.resolve_required(peer.into()).await?;
        remote::id(self.transport.as_ref(), &peer).await
    }

    pub async fn remote_query(
        &self,
        peer: impl Into<PeerRef>,
        query: &str,
    ) -> NodeResult<QueryStream> {
        let peer = self.resolve_required(peer.into()).await?;
        remote::query(self.transport.as_ref(), &peer, query).await
    }

    pub async fn remote_data(
        &self,
        peer: impl Into<PeerRef>,
        keys: Vec<String>,
    ) -> NodeResult<DataStream> {
        let peer = self.resolve_required(peer.into()).await?;
        remote::data(self.transport.as_ref(), &peer, keys).await
    }

    /// Query a peer and expand object references in its results with data
    /// fetched from the same peer.
    pub async fn remote_query_with_data(
        &self,
        peer: impl Into<PeerRef>,
        query: &str,
    ) -> NodeResult<QueryStream> {
        let peer = self.resolve_required(peer.into()).await?;
        remote::query_with_data(
            Arc::clone(&self.transport),
            peer,
            query,
            self.expansion_concurrency,
        )
        .await
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("peer", &self.peer_id())
            .field("directory", &self.directory())
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;
    use metanode_types::NodeIdentity;

    fn memory_node(network: &MemoryNetwork, config: &NodeConfig) -> NodeResult<Node> {
        let transport = Arc::new(network.transport(NodeIdentity::generate().peer_id()));
        Node::new(config, transport, None)
    }

    fn memory_config() -> NodeConfig {
        NodeConfig {
            listen_addrs: vec![],
            ..Default::default()
        }
    }

    #[test]
    fn test_bad_directory_address_is_invalid_input() {
        let network = MemoryNetwork::new();
        let config = NodeConfig {
            directory: Some("/ip4/127.0.0.1/tcp/9002".into()),
            ..memory_config()
        };
        let err = memory_node(&network, &config).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_bad_listen_address_is_invalid_input() {
        let network = MemoryNetwork::new();
        let config = NodeConfig {
            listen_addrs: vec!["tcp://nope".into()],
            ..memory_config()
        };
        assert!(memory_node(&network, &config).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_configured_directory_is_bound() {
        let network = MemoryNetwork::new();
        let dir_id = NodeIdentity::generate().peer_id();
        let config = NodeConfig {
            directory: Some(format!("/memory/1/p2p/{dir_id}")),
            ..memory_config()
        };
        let node = memory_node(&network, &config).unwrap();
        assert_eq!(node.directory().map(|d| d.id), Some(dir_id));
    }

    #[tokio::test]
    async fn test_resolve_shapes_without_network() {
        let network = MemoryNetwork::new();
        let node = memory_node(&network, &memory_config()).unwrap();
        let other = NodeIdentity::generate().peer_id();
        let info = PeerInfo::new(other.clone(), vec!["/memory/9".parse().unwrap()]);

        assert_eq!(node.resolve(&info).await.unwrap(), Some(info.clone()));
        let from_addr = node
            .resolve(format!("/memory/9/p2p/{other}"))
            .await
            .unwrap();
        assert_eq!(from_addr, Some(info));

        let err = node.resolve("/memory/9/p2p/garbage").await.unwrap_err();
        assert!(err.is_invalid_input());
        assert!(matches!(
            node.resolve(&other).await,
            Err(NodeError::NoDirectoryConfigured)
        ));
    }

    #[test]
    fn test_info_is_mutable() {
        let network = MemoryNetwork::new();
        let node = memory_node(&network, &memory_config()).unwrap();
        assert_eq!(node.info(), metanode_types::config::DEFAULT_INFO_MESSAGE);
        node.set_info("changed");
        assert_eq!(node.info(), "changed");
    }
}
