//! Client side of the `node.*` protocols.
//!
//! One-shot calls send one request and read one response. Streaming calls
//! send one request and hand back a lazy stream: a frame is decoded only
//! when the consumer polls for the next item. Every call opens its own
//! session and the session closes when the call's stream or response is
//! dropped.

use crate::codec::{frame_stream, read_frame, write_frame};
use crate::error::{NodeError, NodeResult, WireError};
use crate::expand;
use crate::message::{
    protocol, DataRequest, DataResult, NodeInfo, NodeInfoRequest, Ping, Pong, QueryRequest,
    QueryResult,
};
use crate::node::Node;
use crate::transport::{BoxedStream, Transport};
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use metanode_types::statement::{DataObject, QueryValue};
use metanode_types::{PeerId, PeerInfo};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Stream of query result values from a remote peer.
pub type QueryStream = BoxStream<'static, NodeResult<QueryValue>>;

/// Stream of data objects from a remote peer.
pub type DataStream = BoxStream<'static, NodeResult<DataObject>>;

/// A decoded frame of a streaming response.
enum Frame<T> {
    Item(T),
    End,
    Error(String),
}

/// Response frames of the streaming protocols.
trait ResponseFrame: DeserializeOwned + Send + 'static {
    type Item: Send + 'static;

    fn into_frame(self) -> Frame<Self::Item>;
}

impl ResponseFrame for QueryResult {
    type Item = QueryValue;

    fn into_frame(self) -> Frame<QueryValue> {
        match self {
            Self::Value { value } => Frame::Item(value),
            Self::End => Frame::End,
            Self::Error { error } => Frame::Error(error),
        }
    }
}

impl ResponseFrame for DataResult {
    type Item = DataObject;

    fn into_frame(self) -> Frame<DataObject> {
        match self {
            Self::Data { data } if !data.is_content_addressed() => Frame::Error(format!(
                "object {} does not match its content address",
                data.key
            )),
            Self::Data { data } => Frame::Item(data),
            Self::End => Frame::End,
            Self::Error { error } => Frame::Error(error),
        }
    }
}

/// Lazily read response frames until `End`, an error frame or end of stream.
/// Errors are yielded once and end the stream.
fn response_stream<R: ResponseFrame>(
    stream: BoxedStream,
) -> BoxStream<'static, NodeResult<R::Item>> {
    frame_stream::<_, R>(stream)
        .scan(false, |failed, frame| {
            if *failed {
                return future::ready(None);
            }
            let item = match frame {
                Ok(frame) => match frame.into_frame() {
                    Frame::Item(item) => Some(Ok(item)),
                    Frame::End => None,
                    Frame::Error(error) => {
                        *failed = true;
                        Some(Err(NodeError::Remote(error)))
                    }
                },
                Err(e) => {
                    *failed = true;
                    Some(Err(e.into()))
                }
            };
            future::ready(item)
        })
        .boxed()
}

/// `true` once the peer answers. A peer that closes the stream without
/// answering yields `false`.
pub async fn ping(transport: &dyn Transport, peer: &PeerInfo) -> NodeResult<bool> {
    let mut stream = transport.dial(peer, protocol::PING).await?;
    write_frame(&mut stream, &Ping {}).await?;
    match read_frame::<_, Pong>(&mut stream).await {
        Ok(_) => Ok(true),
        Err(WireError::ConnectionClosed) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Fetch the peer's identity and info string.
pub async fn id(transport: &dyn Transport, peer: &PeerInfo) -> NodeResult<NodeInfo> {
    let mut stream = transport.dial(peer, protocol::ID).await?;
    write_frame(&mut stream, &NodeInfoRequest {}).await?;
    let info: NodeInfo = read_frame(&mut stream).await?;
    Ok(info)
}

/// Run a query on the peer.
pub async fn query(
    transport: &dyn Transport,
    peer: &PeerInfo,
    query: &str,
) -> NodeResult<QueryStream> {
    let mut stream = transport.dial(peer, protocol::QUERY).await?;
    write_frame(
        &mut stream,
        &QueryRequest {
            query: query.to_string(),
        },
    )
    .await?;
    debug!(peer = %peer.id, query = %query, "Query sent");
    Ok(response_stream::<QueryResult>(stream))
}

/// Request data objects from the peer.
pub async fn data(
    transport: &dyn Transport,
    peer: &PeerInfo,
    keys: Vec<String>,
) -> NodeResult<DataStream> {
    let mut stream = transport.dial(peer, protocol::DATA).await?;
    debug!(peer = %peer.id, keys = keys.len(), "Data request sent");
    write_frame(&mut stream, &DataRequest { keys }).await?;
    Ok(response_stream::<DataResult>(stream))
}

/// Request data objects and collect the whole response.
pub async fn fetch_data(
    transport: &dyn Transport,
    peer: &PeerInfo,
    keys: Vec<String>,
) -> NodeResult<Vec<DataObject>> {
    data(transport, peer, keys).await?.try_collect().await
}

/// Run a query on the peer and expand every result's object references
/// with data fetched from the same peer.
pub async fn query_with_data(
    transport: Arc<dyn Transport>,
    peer: PeerInfo,
    query_str: &str,
    concurrency: usize,
) -> NodeResult<QueryStream> {
    let results = query(transport.as_ref(), &peer, query_str).await?;
    let fetch = move |keys: Vec<String>| {
        let transport = Arc::clone(&transport);
        let peer = peer.clone();
        async move { fetch_data(transport.as_ref(), &peer, keys).await }
    };
    Ok(expand::expand_stream(results, concurrency, fetch))
}

/// A node's view of one fixed, already resolved peer.
#[derive(Clone)]
pub struct RemoteNode {
    node: Node,
    peer: PeerInfo,
}

impl RemoteNode {
    pub(crate) fn new(node: Node, peer: PeerInfo) -> Self {
        Self { node, peer }
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn id(&self) -> &PeerId {
        &self.peer.id
    }

    pub async fn ping(&self) -> NodeResult<bool> {
        ping(self.node.transport().as_ref(), &self.peer).await
    }

    pub async fn node_info(&self) -> NodeResult<NodeInfo> {
        id(self.node.transport().as_ref(), &self.peer).await
    }

    pub async fn query(&self, query_str: &str) -> NodeResult<QueryStream> {
        query(self.node.transport().as_ref(), &self.peer, query_str).await
    }

    pub async fn data(&self, keys: Vec<String>) -> NodeResult<DataStream> {
        data(self.node.transport().as_ref(), &self.peer, keys).await
    }

    pub async fn query_with_data(&self, query_str: &str) -> NodeResult<QueryStream> {
        query_with_data(
            Arc::clone(self.node.transport()),
            self.peer.clone(),
            query_str,
            self.node.expansion_concurrency(),
        )
        .await
    }
}

impl std::fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteNode")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn frames_then_close<T: serde::Serialize>(
        frames: Vec<T>,
        garbage: bool,
    ) -> BoxedStream {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        for frame in &frames {
            write_frame(&mut server, frame).await.unwrap();
        }
        if garbage {
            server.write_all(&3u32.to_be_bytes()).await.unwrap();
            server.write_all(b"???").await.unwrap();
        }
        drop(server);
        Box::new(client)
    }

    fn int(n: i64) -> QueryValue {
        QueryValue::Simple(metanode_types::statement::SimpleValue::Int(n))
    }

    #[tokio::test]
    async fn test_stream_ends_at_end_frame() {
        let stream = frames_then_close(
            vec![
                QueryResult::Value { value: int(1) },
                QueryResult::End,
                QueryResult::Value { value: int(2) },
            ],
            false,
        )
        .await;
        let items: Vec<_> = response_stream::<QueryResult>(stream).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), &int(1));
    }

    #[tokio::test]
    async fn test_error_frame_is_terminal() {
        let stream = frames_then_close(
            vec![
                QueryResult::Value { value: int(1) },
                QueryResult::Error {
                    error: "bad query".into(),
                },
                QueryResult::Value { value: int(2) },
            ],
            false,
        )
        .await;
        let items: Vec<_> = response_stream::<QueryResult>(stream).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(NodeError::Remote(e)) if e == "bad query"));
    }

    #[tokio::test]
    async fn test_clean_close_without_end() {
        let stream = frames_then_close(vec![QueryResult::Value { value: int(7) }], false).await;
        let items: Vec<_> = response_stream::<QueryResult>(stream).collect().await;
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_protocol_error() {
        let stream = frames_then_close(
            vec![DataResult::Data {
                data: DataObject::new(vec![1]),
            }],
            true,
        )
        .await;
        let items: Vec<_> = response_stream::<DataResult>(stream).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(NodeError::Protocol(WireError::Json(_)))));
    }

    #[tokio::test]
    async fn test_forged_object_is_rejected() {
        let genuine = DataObject::new(b"abc".to_vec());
        let forged = DataObject {
            key: genuine.key.clone(),
            data: b"abd".to_vec(),
        };
        let stream = frames_then_close(
            vec![
                DataResult::Data { data: genuine },
                DataResult::Data { data: forged },
                DataResult::End,
            ],
            false,
        )
        .await;
        let items: Vec<_> = response_stream::<DataResult>(stream).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(
            matches!(&items[1], Err(NodeError::Remote(e)) if e.contains("content address"))
        );
    }
}
