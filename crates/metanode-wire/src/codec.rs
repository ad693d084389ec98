//! Length-delimited JSON framing over byte streams.
//!
//! A frame is a 4-byte big-endian length followed by that many bytes of JSON.
//! The message type parameter is the schema; the codec keeps no other state,
//! so independent readers and writers can share one duplex stream as long as
//! each direction has a single user at a time.

use crate::error::WireError;
use futures::stream::{self, Stream};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum single frame body size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Encode a message to bytes (4-byte big-endian length + JSON).
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    let json = serde_json::to_vec(msg)?;
    let len = u32::try_from(json.len()).map_err(|_| WireError::MessageTooLarge {
        size: u32::MAX,
        max: MAX_FRAME_SIZE,
    })?;
    if len > MAX_FRAME_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON frame body.
pub fn decode_frame<T: DeserializeOwned>(body: &[u8]) -> Result<T, WireError> {
    Ok(serde_json::from_slice(body)?)
}

/// Write one framed message and flush.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let bytes = encode_frame(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
///
/// A clean end of stream before the header yields [`WireError::ConnectionClosed`];
/// an end of stream inside a frame is [`WireError::Truncated`].
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > MAX_FRAME_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    match reader.read_exact(&mut body).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::Truncated { expected: len });
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    decode_frame(&body)
}

/// Lazily decode frames from `reader`, one per poll, in arrival order.
///
/// The stream ends at a clean end of stream. Any other failure is yielded
/// once and ends the stream; bad frames are never skipped.
pub fn frame_stream<R, T>(reader: R) -> impl Stream<Item = Result<T, WireError>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        match read_frame::<R, T>(&mut reader).await {
            Ok(msg) => Some((Ok(msg), Some(reader))),
            Err(WireError::ConnectionClosed) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::*;
    use futures::StreamExt;
    use metanode_types::statement::{
        DataObject, KeyValue, QueryValue, SimpleStatement, SimpleValue, Statement, StatementBody,
    };
    use metanode_types::{NodeIdentity, PeerInfo};
    use serde::Deserialize;
    use std::fmt::Debug;

    async fn loopback<T>(msg: T)
    where
        T: Serialize + DeserializeOwned + PartialEq + Debug,
    {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        write_frame(&mut a, &msg).await.unwrap();
        let decoded: T = read_frame(&mut b).await.unwrap();
        assert_eq!(decoded, msg);
    }

    fn sample_peer() -> PeerInfo {
        PeerInfo::new(
            NodeIdentity::generate().peer_id(),
            vec!["/ip4/127.0.0.1/tcp/9002".parse().unwrap()],
        )
    }

    fn sample_statement() -> Statement {
        Statement {
            id: "stmt-1".into(),
            publisher: "pub".into(),
            namespace: "images".into(),
            timestamp: 1,
            body: StatementBody::Compound(vec![
                SimpleStatement::new("obj-a"),
                SimpleStatement {
                    object: metanode_types::statement::ObjectRef::Data(DataObject::new(
                        b"inline".to_vec(),
                    )),
                    refs: vec!["ref".into()],
                    tags: vec!["tag".into()],
                    deps: vec![],
                },
            ]),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let bytes = encode_frame(&QueryRequest {
            query: "SELECT * FROM images".into(),
        })
        .unwrap();
        let len = decode_length(&[bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(len as usize, bytes.len() - 4);
        let decoded: QueryRequest = decode_frame(&bytes[4..]).unwrap();
        assert_eq!(decoded.query, "SELECT * FROM images");
    }

    #[tokio::test]
    async fn test_loopback_all_protocol_shapes() {
        let peer = sample_peer();
        loopback(Ping {}).await;
        loopback(Pong {}).await;
        loopback(NodeInfoRequest {}).await;
        loopback(NodeInfo {
            peer: peer.id.clone(),
            info: "about me".into(),
        })
        .await;
        loopback(QueryRequest {
            query: "SELECT * FROM images".into(),
        })
        .await;
        loopback(QueryResult::Value {
            value: QueryValue::Simple(SimpleValue::Statement(sample_statement())),
        })
        .await;
        loopback(QueryResult::Value {
            value: QueryValue::Compound(vec![KeyValue {
                key: "count".into(),
                value: SimpleValue::Int(7),
            }]),
        })
        .await;
        loopback(QueryResult::End).await;
        loopback(QueryResult::Error {
            error: "boom".into(),
        })
        .await;
        loopback(DataRequest {
            keys: vec!["a".into(), "b".into()],
        })
        .await;
        loopback(DataResult::Data {
            data: DataObject::new(vec![1, 2, 3]),
        })
        .await;
        loopback(DataResult::End).await;
        loopback(RegisterPeer { info: peer.clone() }).await;
        loopback(LookupPeerRequest {
            id: peer.id.to_string(),
        })
        .await;
        loopback(LookupPeerResponse {
            peer: Some(peer.clone()),
        })
        .await;
        loopback(LookupPeerResponse { peer: None }).await;
        loopback(ListPeersResponse {
            peers: vec![peer.id.clone()],
        })
        .await;
    }

    #[tokio::test]
    async fn test_clean_eof_is_connection_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let err = read_frame::<_, Ping>(&mut b).await.unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_truncated() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"{}").await.unwrap();
        drop(a);
        let err = read_frame::<_, Ping>(&mut b).await.unwrap_err();
        assert!(matches!(err, WireError::Truncated { expected: 10 }));
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_SIZE + 1).to_be_bytes()).await.unwrap();
        let err = read_frame::<_, Ping>(&mut b).await.unwrap_err();
        assert!(matches!(err, WireError::MessageTooLarge { .. }));
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Numbered {
        n: u32,
    }

    #[tokio::test]
    async fn test_frame_stream_preserves_order() {
        let (mut a, b) = tokio::io::duplex(4096);
        for n in 0..5 {
            write_frame(&mut a, &Numbered { n }).await.unwrap();
        }
        drop(a);
        let got: Vec<u32> = frame_stream::<_, Numbered>(b)
            .map(|r| r.unwrap().n)
            .collect()
            .await;
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_frame_stream_stops_at_bad_frame() {
        let (mut a, b) = tokio::io::duplex(4096);
        write_frame(&mut a, &Numbered { n: 1 }).await.unwrap();
        let garbage = b"not json";
        a.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        a.write_all(garbage).await.unwrap();
        write_frame(&mut a, &Numbered { n: 2 }).await.unwrap();
        drop(a);

        let items: Vec<_> = frame_stream::<_, Numbered>(b).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().n, 1);
        assert!(matches!(items[1], Err(WireError::Json(_))));
    }
}
