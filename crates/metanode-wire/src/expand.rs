//! Query expansion: replace object ids in query results with fetched data.
//!
//! Each result that references objects gets one aggregated data fetch.
//! Up to `concurrency` fetches run at once and results are emitted as their
//! fetches complete, so emission order only matches input order when
//! `concurrency` is 1. The first failure is yielded in its position and ends
//! the stream; results emitted before it stay valid.

use crate::error::{NodeError, NodeResult};
use futures::future::{self, Future};
use futures::stream::{BoxStream, Stream, StreamExt};
use metanode_types::statement::{DataObject, QueryValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Expand one value. Values without object references are returned as-is
/// and never trigger a fetch.
pub async fn expand_value<F, Fut>(value: QueryValue, fetch: &F) -> NodeResult<QueryValue>
where
    F: Fn(Vec<String>) -> Fut,
    Fut: Future<Output = NodeResult<Vec<DataObject>>>,
{
    let ids = value.object_ids();
    if ids.is_empty() {
        return Ok(value);
    }

    let objects = fetch(ids.clone())
        .await
        .map_err(|e| NodeError::ExpansionFetch {
            ids: ids.clone(),
            source: Box::new(e),
        })?;
    let objects: HashMap<String, DataObject> =
        objects.into_iter().map(|o| (o.key.clone(), o)).collect();

    let missing: Vec<String> = ids
        .into_iter()
        .filter(|id| !objects.contains_key(id))
        .collect();
    if !missing.is_empty() {
        return Err(NodeError::ExpansionFetch {
            ids: missing,
            source: Box::new(NodeError::Remote(
                "data stream ended before every object was sent".to_string(),
            )),
        });
    }

    debug!(objects = objects.len(), "Expanded query result");
    Ok(value.with_objects(&objects))
}

/// Expand a stream of query results with bounded concurrency.
///
/// An upstream error is passed through in its position and, like a fetch
/// failure, ends the stream.
pub fn expand_stream<S, F, Fut>(
    results: S,
    concurrency: usize,
    fetch: F,
) -> BoxStream<'static, NodeResult<QueryValue>>
where
    S: Stream<Item = NodeResult<QueryValue>> + Send + 'static,
    F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = NodeResult<Vec<DataObject>>> + Send + 'static,
{
    let fetch = Arc::new(fetch);
    results
        .map(move |item| {
            let fetch = Arc::clone(&fetch);
            async move { expand_value(item?, fetch.as_ref()).await }
        })
        .buffer_unordered(concurrency.max(1))
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}
