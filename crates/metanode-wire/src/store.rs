//! Local statement store consulted by the query and data handlers.
//!
//! The node itself is storage-agnostic; anything implementing
//! [`StatementStore`] can back it. [`MemoryStore`] is a small in-process
//! implementation understanding two queries:
//!
//! ```text
//! SELECT * FROM <namespace>
//! SELECT COUNT(*) FROM <namespace>
//! ```
//!
//! `<namespace>` is an exact namespace, `*` for every namespace, or a prefix
//! pattern such as `images.*` matching `images` and anything below it.

use crate::error::{NodeError, NodeResult};
use async_trait::async_trait;
use metanode_types::statement::{DataObject, QueryValue, SimpleValue, Statement};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Backing storage for a node's statements and data objects.
#[async_trait]
pub trait StatementStore: Send + Sync + 'static {
    /// Run a query, returning its result values in order.
    async fn query(&self, query: &str) -> NodeResult<Vec<QueryValue>>;

    /// Payload stored under `key`, if any.
    async fn get_data(&self, key: &str) -> NodeResult<Option<Vec<u8>>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Selection {
    All,
    Count,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NamespaceFilter {
    Any,
    Prefix(String),
    Exact(String),
}

impl NamespaceFilter {
    fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            Self::Any
        } else if let Some(prefix) = pattern.strip_suffix(".*") {
            Self::Prefix(prefix.to_string())
        } else {
            Self::Exact(pattern.to_string())
        }
    }

    fn matches(&self, namespace: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(ns) => namespace == ns,
            Self::Prefix(prefix) => {
                namespace == prefix
                    || namespace
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedQuery {
    selection: Selection,
    namespace: NamespaceFilter,
}

fn parse_query(query: &str) -> NodeResult<ParsedQuery> {
    let unsupported = || NodeError::Store(format!("unsupported query: {query}"));
    let tokens: Vec<&str> = query.split_whitespace().collect();
    let [select, what, from, namespace] = tokens.as_slice() else {
        return Err(unsupported());
    };
    if !select.eq_ignore_ascii_case("select") || !from.eq_ignore_ascii_case("from") {
        return Err(unsupported());
    }
    let selection = if *what == "*" {
        Selection::All
    } else if what.eq_ignore_ascii_case("count(*)") {
        Selection::Count
    } else {
        return Err(unsupported());
    };
    Ok(ParsedQuery {
        selection,
        namespace: NamespaceFilter::parse(namespace),
    })
}

/// In-process store: statements in insertion order, data by content key.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    statements: Arc<RwLock<Vec<Statement>>>,
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_statement(&self, statement: Statement) {
        let mut statements = self.statements.write().unwrap_or_else(|e| e.into_inner());
        statements.push(statement);
    }

    /// Store a payload and return its content key.
    pub fn put_data(&self, data: Vec<u8>) -> String {
        let object = DataObject::new(data);
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(object.key.clone(), object.data);
        object.key
    }

    pub fn statement_count(&self) -> usize {
        let statements = self.statements.read().unwrap_or_else(|e| e.into_inner());
        statements.len()
    }
}

#[async_trait]
impl StatementStore for MemoryStore {
    async fn query(&self, query: &str) -> NodeResult<Vec<QueryValue>> {
        let parsed = parse_query(query)?;
        let statements = self.statements.read().unwrap_or_else(|e| e.into_inner());
        let matching = statements
            .iter()
            .filter(|s| parsed.namespace.matches(&s.namespace));

        let values = match parsed.selection {
            Selection::All => matching
                .map(|s| QueryValue::Simple(SimpleValue::Statement(s.clone())))
                .collect(),
            Selection::Count => {
                let count = matching.count() as i64;
                vec![QueryValue::Simple(SimpleValue::Int(count))]
            }
        };
        Ok(values)
    }

    async fn get_data(&self, key: &str) -> NodeResult<Option<Vec<u8>>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        Ok(objects.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metanode_types::statement::{SimpleStatement, StatementBody};

    fn stmt(id: &str, namespace: &str) -> Statement {
        Statement {
            id: id.into(),
            publisher: "publisher".into(),
            namespace: namespace.into(),
            timestamp: 0,
            body: StatementBody::Simple(SimpleStatement::new(format!("obj-{id}"))),
        }
    }

    fn ids(values: &[QueryValue]) -> Vec<String> {
        values
            .iter()
            .map(|v| match v {
                QueryValue::Simple(SimpleValue::Statement(s)) => s.id.clone(),
                other => panic!("unexpected value {other:?}"),
            })
            .collect()
    }

    fn populated() -> MemoryStore {
        let store = MemoryStore::new();
        store.put_statement(stmt("1", "images"));
        store.put_statement(stmt("2", "images.cats"));
        store.put_statement(stmt("3", "imagesx"));
        store.put_statement(stmt("4", "docs"));
        store
    }

    #[tokio::test]
    async fn test_select_exact_namespace() {
        let values = populated().query("SELECT * FROM images").await.unwrap();
        assert_eq!(ids(&values), vec!["1"]);
    }

    #[tokio::test]
    async fn test_select_prefix_namespace() {
        let values = populated().query("select * from images.*").await.unwrap();
        assert_eq!(ids(&values), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_select_everything_in_order() {
        let values = populated().query("SELECT * FROM *").await.unwrap();
        assert_eq!(ids(&values), vec!["1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_count() {
        let values = populated()
            .query("SELECT COUNT(*) FROM images.*")
            .await
            .unwrap();
        assert_eq!(values, vec![QueryValue::Simple(SimpleValue::Int(2))]);
    }

    #[tokio::test]
    async fn test_unsupported_query() {
        let store = populated();
        for query in ["", "DELETE FROM images", "SELECT id FROM images", "SELECT *"] {
            let err = store.query(query).await.unwrap_err();
            assert!(matches!(err, NodeError::Store(_)), "{query}");
        }
    }

    #[tokio::test]
    async fn test_data_is_content_addressed() {
        let store = MemoryStore::new();
        let key = store.put_data(b"payload".to_vec());
        assert_eq!(key, DataObject::new(b"payload".to_vec()).key);
        assert_eq!(
            store.get_data(&key).await.unwrap(),
            Some(b"payload".to_vec())
        );
        assert_eq!(store.get_data("missing").await.unwrap(), None);
    }
}
