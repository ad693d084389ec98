//! TCP transport.
//!
//! Each session is its own TCP connection. The dialer opens with a
//! [`ProtocolSelect`] frame; the listener answers with a [`ProtocolAck`] and,
//! when accepted, hands the connection to the handler registered for that
//! protocol.

use super::{BoxedStream, PeerBook, ProtocolMux, StreamHandler, TrackedStream, Transport};
use crate::codec::{read_frame, write_frame};
use crate::error::{NodeError, NodeResult};
use crate::message::{ProtocolAck, ProtocolSelect};
use async_trait::async_trait;
use metanode_types::{socket_multiaddr, tcp_target, Multiaddr, PeerId, PeerInfo};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

pub struct TcpTransport {
    local_id: PeerId,
    /// Configured listen addresses.
    listen_addrs: RwLock<Vec<Multiaddr>>,
    /// Actually bound addresses (differs from configured when binding port 0).
    bound_addrs: RwLock<Vec<Multiaddr>>,
    mux: ProtocolMux,
    peer_book: PeerBook,
    accept_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpTransport {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            listen_addrs: RwLock::new(Vec::new()),
            bound_addrs: RwLock::new(Vec::new()),
            mux: ProtocolMux::new(),
            peer_book: PeerBook::new(),
            accept_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn peer_book(&self) -> &PeerBook {
        &self.peer_book
    }

    async fn accept_loop(listener: TcpListener, mux: ProtocolMux) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(remote = %addr, "Accepted connection");
                    let mux = mux.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_inbound(stream, addr, &mux).await {
                            debug!(remote = %addr, error = %e, "Inbound connection ended");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    /// Read the protocol selection, acknowledge it and run the handler.
    async fn handle_inbound(
        mut stream: TcpStream,
        addr: SocketAddr,
        mux: &ProtocolMux,
    ) -> NodeResult<()> {
        let select: ProtocolSelect = read_frame(&mut stream).await?;
        match mux.get(&select.protocol) {
            Some(handler) => {
                write_frame(&mut stream, &ProtocolAck { accepted: true }).await?;
                debug!(remote = %addr, protocol = %select.protocol, "Dispatching stream");
                handler.handle(Box::new(stream)).await
            }
            None => {
                warn!(
                    remote = %addr,
                    protocol = %select.protocol,
                    "Rejected stream for unsupported protocol"
                );
                write_frame(&mut stream, &ProtocolAck { accepted: false }).await?;
                Ok(())
            }
        }
    }

    async fn connect_any(peer: &PeerInfo) -> NodeResult<TcpStream> {
        let mut last_error = None;
        for target in peer.addrs.iter().filter_map(tcp_target) {
            match TcpStream::connect(&target).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(peer = %peer.id, target = %target, error = %e, "Connect attempt failed");
                    last_error = Some(format!("{target}: {e}"));
                }
            }
        }
        Err(NodeError::Connectivity(last_error.unwrap_or_else(|| {
            format!("peer {} has no tcp address", peer.id)
        })))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_peer(&self) -> PeerInfo {
        let bound = self.bound_addrs.read().unwrap_or_else(|e| e.into_inner());
        let addrs = if bound.is_empty() {
            self.listen_addrs
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        } else {
            bound.clone()
        };
        PeerInfo::new(self.local_id.clone(), addrs)
    }

    fn listen(&self, addrs: Vec<Multiaddr>) {
        let mut current = self.listen_addrs.write().unwrap_or_else(|e| e.into_inner());
        for addr in addrs {
            if !current.contains(&addr) {
                current.push(addr);
            }
        }
    }

    async fn start(&self) -> NodeResult<()> {
        let targets: Vec<String> = {
            let addrs = self.listen_addrs.read().unwrap_or_else(|e| e.into_inner());
            addrs.iter().filter_map(tcp_target).collect()
        };

        // Bind every listener before spawning any accept loop.
        let mut listeners = Vec::with_capacity(targets.len());
        for target in targets {
            let listener = TcpListener::bind(&target)
                .await
                .map_err(|e| NodeError::Connectivity(format!("bind {target}: {e}")))?;
            let local_addr = listener
                .local_addr()
                .map_err(|e| NodeError::Connectivity(e.to_string()))?;
            listeners.push((listener, local_addr));
        }

        let mut bound = Vec::with_capacity(listeners.len());
        let mut tasks = Vec::with_capacity(listeners.len());
        for (listener, local_addr) in listeners {
            info!(addr = %local_addr, peer = %self.local_id, "Listening");
            bound.push(socket_multiaddr(local_addr));
            tasks.push(tokio::spawn(Self::accept_loop(listener, self.mux.clone())));
        }

        *self.bound_addrs.write().unwrap_or_else(|e| e.into_inner()) = bound;
        self.accept_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(tasks);
        Ok(())
    }

    async fn stop(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .accept_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        self.bound_addrs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!(peer = %self.local_id, "TCP transport stopped");
    }

    fn handle(&self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        self.mux.register(protocol, handler);
    }

    async fn dial(&self, peer: &PeerInfo, protocol: &str) -> NodeResult<BoxedStream> {
        let mut stream = Self::connect_any(peer).await?;
        write_frame(
            &mut stream,
            &ProtocolSelect {
                protocol: protocol.to_string(),
            },
        )
        .await?;
        let ack: ProtocolAck = read_frame(&mut stream).await?;
        if !ack.accepted {
            return Err(NodeError::Connectivity(format!(
                "peer {} does not support protocol {protocol}",
                peer.id
            )));
        }

        let guard = self.peer_book.open_session(peer);
        Ok(Box::new(TrackedStream::new(stream, guard)))
    }

    fn lookup_cached(&self, id: &PeerId) -> Option<PeerInfo> {
        self.peer_book.lookup(id)
    }
}
