//! Server side of the `node.*` protocols.

use crate::codec::{read_frame, write_frame};
use crate::error::NodeResult;
use crate::message::{
    protocol, DataRequest, DataResult, NodeInfo, NodeInfoRequest, Ping, Pong, QueryRequest,
    QueryResult,
};
use crate::store::StatementStore;
use crate::transport::{BoxedStream, StreamHandler, Transport};
use async_trait::async_trait;
use metanode_types::statement::DataObject;
use metanode_types::PeerId;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Error text sent when a node has no statement store.
pub const NO_STORE: &str = "node has no statement store";

/// Register every node protocol handler on `transport`.
pub fn install(
    transport: &dyn Transport,
    info: Arc<RwLock<String>>,
    store: Option<Arc<dyn StatementStore>>,
) {
    let peer_id = transport.local_peer().id;
    transport.handle(protocol::PING, Arc::new(PingHandler));
    transport.handle(protocol::ID, Arc::new(IdHandler { peer_id, info }));
    transport.handle(
        protocol::QUERY,
        Arc::new(QueryHandler {
            store: store.clone(),
        }),
    );
    transport.handle(protocol::DATA, Arc::new(DataHandler { store }));
}

pub struct PingHandler;

#[async_trait]
impl StreamHandler for PingHandler {
    async fn handle(&self, mut stream: BoxedStream) -> NodeResult<()> {
        let _: Ping = read_frame(&mut stream).await?;
        write_frame(&mut stream, &Pong {}).await?;
        Ok(())
    }
}

/// Answers identity requests. The info string is read per request.
pub struct IdHandler {
    pub peer_id: PeerId,
    pub info: Arc<RwLock<String>>,
}

#[async_trait]
impl StreamHandler for IdHandler {
    async fn handle(&self, mut stream: BoxedStream) -> NodeResult<()> {
        let _: NodeInfoRequest = read_frame(&mut stream).await?;
        let info = self
            .info
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let response = NodeInfo {
            peer: self.peer_id.clone(),
            info,
        };
        write_frame(&mut stream, &response).await?;
        Ok(())
    }
}

pub struct QueryHandler {
    pub store: Option<Arc<dyn StatementStore>>,
}

#[async_trait]
impl StreamHandler for QueryHandler {
    async fn handle(&self, mut stream: BoxedStream) -> NodeResult<()> {
        let request: QueryRequest = read_frame(&mut stream).await?;
        debug!(query = %request.query, "Query request");

        let Some(store) = &self.store else {
            let frame = QueryResult::Error {
                error: NO_STORE.to_string(),
            };
            write_frame(&mut stream, &frame).await?;
            return Ok(());
        };

        match store.query(&request.query).await {
            Ok(values) => {
                let count = values.len();
                for value in values {
                    write_frame(&mut stream, &QueryResult::Value { value }).await?;
                }
                write_frame(&mut stream, &QueryResult::End).await?;
                debug!(query = %request.query, results = count, "Query answered");
            }
            Err(e) => {
                debug!(query = %request.query, error = %e, "Query failed");
                let frame = QueryResult::Error {
                    error: e.to_string(),
                };
                write_frame(&mut stream, &frame).await?;
            }
        }
        Ok(())
    }
}

/// Streams the requested objects in request order. An unknown key ends the
/// stream with an error frame.
pub struct DataHandler {
    pub store: Option<Arc<dyn StatementStore>>,
}

#[async_trait]
impl StreamHandler for DataHandler {
    async fn handle(&self, mut stream: BoxedStream) -> NodeResult<()> {
        let request: DataRequest = read_frame(&mut stream).await?;

        let Some(store) = &self.store else {
            let frame = DataResult::Error {
                error: NO_STORE.to_string(),
            };
            write_frame(&mut stream, &frame).await?;
            return Ok(());
        };

        for key in request.keys {
            let frame = match store.get_data(&key).await {
                Ok(Some(data)) => DataResult::Data {
                    data: DataObject { key, data },
                },
                Ok(None) => DataResult::Error {
                    error: format!("object not found: {key}"),
                },
                Err(e) => DataResult::Error {
                    error: e.to_string(),
                },
            };
            let stop = matches!(frame, DataResult::Error { .. });
            write_frame(&mut stream, &frame).await?;
            if stop {
                return Ok(());
            }
        }
        write_frame(&mut stream, &DataResult::End).await?;
        Ok(())
    }
}
