//! Transport contract consumed by the node.
//!
//! A [`Transport`] owns the local peer identity, accepts inbound streams and
//! dispatches them by protocol id to registered [`StreamHandler`]s, dials
//! outbound streams, and keeps a [`PeerBook`] of peers with open sessions.
//!
//! Two implementations ship with the crate: [`MemoryTransport`] for
//! in-process networks and tests, and [`TcpTransport`].

pub mod memory;
pub mod peer_book;
pub mod tcp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use peer_book::{PeerBook, SessionGuard};
pub use tcp::TcpTransport;

use crate::error::NodeResult;
use async_trait::async_trait;
use metanode_types::{Multiaddr, PeerId, PeerInfo};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

/// A bidirectional byte stream.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> ByteStream for T {}

/// An owned, type-erased stream.
pub type BoxedStream = Box<dyn ByteStream>;

/// Server side of one protocol.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    /// Serve one inbound stream until the exchange completes.
    async fn handle(&self, stream: BoxedStream) -> NodeResult<()>;
}

/// The transport collaborator.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identity and current addresses of the local peer.
    fn local_peer(&self) -> PeerInfo;

    /// Add listen addresses. Takes effect on the next [`Transport::start`].
    fn listen(&self, addrs: Vec<Multiaddr>);

    async fn start(&self) -> NodeResult<()>;

    async fn stop(&self);

    /// Register the handler for inbound streams on `protocol`.
    fn handle(&self, protocol: &str, handler: Arc<dyn StreamHandler>);

    /// Open a stream to `peer` speaking `protocol`.
    async fn dial(&self, peer: &PeerInfo, protocol: &str) -> NodeResult<BoxedStream>;

    /// Cached info for a peer with a currently open session.
    fn lookup_cached(&self, id: &PeerId) -> Option<PeerInfo>;
}

/// Protocol id -> handler table shared by the transports.
#[derive(Clone, Default)]
pub struct ProtocolMux {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn StreamHandler>>>>,
}

impl ProtocolMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(protocol.to_string(), handler);
    }

    pub fn get(&self, protocol: &str) -> Option<Arc<dyn StreamHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(protocol).cloned()
    }

    /// Run `handler` on `stream` in its own task.
    pub fn spawn(handler: Arc<dyn StreamHandler>, protocol: &str, stream: BoxedStream) {
        let protocol = protocol.to_string();
        tokio::spawn(async move {
            if let Err(e) = handler.handle(stream).await {
                debug!(protocol = %protocol, error = %e, "Inbound stream ended with error");
            }
        });
    }
}

/// A dialed stream that keeps its peer's [`PeerBook`] entry alive.
pub struct TrackedStream<S> {
    inner: S,
    _guard: SessionGuard,
}

impl<S> TrackedStream<S> {
    pub fn new(inner: S, guard: SessionGuard) -> Self {
        Self {
            inner,
            _guard: guard,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TrackedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TrackedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
