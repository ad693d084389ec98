//! Statements, query result values and data objects.
//!
//! Statements reference external data objects by id. A query result value may
//! carry statements (directly, inside compound values, or wrapped in
//! envelopes); [`QueryValue::object_ids`] finds every referenced id and
//! [`QueryValue::with_objects`] swaps ids for fetched payloads.

use crate::peer::multihash_b58;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// An opaque, content-addressed data payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    /// Content address of `data`.
    pub key: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl DataObject {
    /// Wrap a payload, deriving its key from the content.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            key: multihash_b58(&data),
            data,
        }
    }

    /// Whether `key` is the content address of `data`.
    pub fn is_content_addressed(&self) -> bool {
        multihash_b58(&self.data) == self.key
    }
}

/// A statement's object reference: an id until expanded, then the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectRef {
    Id(String),
    Data(DataObject),
}

impl ObjectRef {
    /// The referenced key, whether or not it has been expanded.
    pub fn key(&self) -> &str {
        match self {
            Self::Id(key) => key,
            Self::Data(obj) => &obj.key,
        }
    }
}

/// The smallest statement body: one object plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleStatement {
    pub object: ObjectRef,
    #[serde(default)]
    pub refs: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deps: Vec<String>,
}

impl SimpleStatement {
    pub fn new(object_id: impl Into<String>) -> Self {
        Self {
            object: ObjectRef::Id(object_id.into()),
            refs: Vec::new(),
            tags: Vec::new(),
            deps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum StatementBody {
    Simple(SimpleStatement),
    Compound(Vec<SimpleStatement>),
    Envelope(Vec<Statement>),
}

/// A published statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub id: String,
    pub publisher: String,
    pub namespace: String,
    /// Unix timestamp (seconds).
    pub timestamp: i64,
    pub body: StatementBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SimpleValue {
    Int(i64),
    Text(String),
    Statement(Statement),
    StatementBody(StatementBody),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: SimpleValue,
}

/// One element of a query result stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QueryValue {
    Simple(SimpleValue),
    Compound(Vec<KeyValue>),
}

impl QueryValue {
    /// Unexpanded object ids referenced anywhere in this value, deduplicated
    /// in first-seen order.
    pub fn object_ids(&self) -> Vec<String> {
        let mut collector = IdCollector::default();
        match self {
            Self::Simple(value) => collector.simple_value(value),
            Self::Compound(pairs) => {
                for pair in pairs {
                    collector.simple_value(&pair.value);
                }
            }
        }
        collector.ids
    }

    /// Replace every `ObjectRef::Id` whose key is present in `objects`.
    pub fn with_objects(mut self, objects: &HashMap<String, DataObject>) -> Self {
        match &mut self {
            Self::Simple(value) => expand_simple_value(value, objects),
            Self::Compound(pairs) => {
                for pair in pairs.iter_mut() {
                    expand_simple_value(&mut pair.value, objects);
                }
            }
        }
        self
    }
}

impl Statement {
    /// Unexpanded object ids referenced by this statement.
    pub fn object_ids(&self) -> Vec<String> {
        let mut collector = IdCollector::default();
        collector.body(&self.body);
        collector.ids
    }
}

#[derive(Default)]
struct IdCollector {
    seen: HashSet<String>,
    ids: Vec<String>,
}

impl IdCollector {
    fn simple_value(&mut self, value: &SimpleValue) {
        match value {
            SimpleValue::Statement(stmt) => self.body(&stmt.body),
            SimpleValue::StatementBody(body) => self.body(body),
            SimpleValue::Int(_) | SimpleValue::Text(_) => {}
        }
    }

    fn body(&mut self, body: &StatementBody) {
        match body {
            StatementBody::Simple(simple) => self.simple(simple),
            StatementBody::Compound(bodies) => {
                for simple in bodies {
                    self.simple(simple);
                }
            }
            StatementBody::Envelope(stmts) => {
                for stmt in stmts {
                    self.body(&stmt.body);
                }
            }
        }
    }

    fn simple(&mut self, simple: &SimpleStatement) {
        if let ObjectRef::Id(id) = &simple.object {
            if self.seen.insert(id.clone()) {
                self.ids.push(id.clone());
            }
        }
    }
}

fn expand_simple_value(value: &mut SimpleValue, objects: &HashMap<String, DataObject>) {
    match value {
        SimpleValue::Statement(stmt) => expand_body(&mut stmt.body, objects),
        SimpleValue::StatementBody(body) => expand_body(body, objects),
        SimpleValue::Int(_) | SimpleValue::Text(_) => {}
    }
}

fn expand_body(body: &mut StatementBody, objects: &HashMap<String, DataObject>) {
    match body {
        StatementBody::Simple(simple) => expand_simple(simple, objects),
        StatementBody::Compound(bodies) => {
            for simple in bodies.iter_mut() {
                expand_simple(simple, objects);
            }
        }
        StatementBody::Envelope(stmts) => {
            for stmt in stmts.iter_mut() {
                expand_body(&mut stmt.body, objects);
            }
        }
    }
}

fn expand_simple(simple: &mut SimpleStatement, objects: &HashMap<String, DataObject>) {
    let replacement = match &simple.object {
        ObjectRef::Id(id) => objects.get(id).cloned(),
        ObjectRef::Data(_) => None,
    };
    if let Some(obj) = replacement {
        simple.object = ObjectRef::Data(obj);
    }
}

/// Serde adapter storing bytes as standard base64 strings.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(id: &str, body: StatementBody) -> Statement {
        Statement {
            id: id.to_string(),
            publisher: "publisher".to_string(),
            namespace: "images.dpla".to_string(),
            timestamp: 1_500_000_000,
            body,
        }
    }

    fn objects(items: &[DataObject]) -> HashMap<String, DataObject> {
        items.iter().map(|o| (o.key.clone(), o.clone())).collect()
    }

    #[test]
    fn test_data_object_key_is_content_address() {
        let a = DataObject::new(b"hello".to_vec());
        let b = DataObject::new(b"hello".to_vec());
        let c = DataObject::new(b"world".to_vec());
        assert_eq!(a.key, b.key);
        assert_ne!(a.key, c.key);
        assert!(a.key.starts_with("Qm"));
        assert!(a.is_content_addressed());

        let forged = DataObject {
            key: a.key.clone(),
            data: b"world".to_vec(),
        };
        assert!(!forged.is_content_addressed());
    }

    #[test]
    fn test_data_object_base64_json() {
        let obj = DataObject::new(vec![0, 1, 2, 255]);
        let json = serde_json::to_value(&obj).unwrap();
        assert_eq!(json["data"], "AAEC/w==");
        let back: DataObject = serde_json::from_value(json).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn test_scalar_values_have_no_ids() {
        assert!(QueryValue::Simple(SimpleValue::Int(3)).object_ids().is_empty());
        assert!(QueryValue::Simple(SimpleValue::Text("x".into()))
            .object_ids()
            .is_empty());
    }

    #[test]
    fn test_object_ids_recurse_and_dedup() {
        let inner = stmt(
            "inner",
            StatementBody::Compound(vec![SimpleStatement::new("b"), SimpleStatement::new("a")]),
        );
        let envelope = stmt(
            "outer",
            StatementBody::Envelope(vec![
                stmt("s1", StatementBody::Simple(SimpleStatement::new("a"))),
                inner,
            ]),
        );
        let value = QueryValue::Compound(vec![
            KeyValue {
                key: "first".into(),
                value: SimpleValue::Statement(envelope),
            },
            KeyValue {
                key: "second".into(),
                value: SimpleValue::StatementBody(StatementBody::Simple(SimpleStatement::new(
                    "c",
                ))),
            },
        ]);
        assert_eq!(value.object_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_with_objects_replaces_known_ids_only() {
        let known = DataObject::new(b"payload".to_vec());
        let value = QueryValue::Simple(SimpleValue::StatementBody(StatementBody::Compound(vec![
            SimpleStatement::new(known.key.clone()),
            SimpleStatement::new("missing"),
        ])));

        let expanded = value.with_objects(&objects(&[known.clone()]));
        match expanded {
            QueryValue::Simple(SimpleValue::StatementBody(StatementBody::Compound(bodies))) => {
                assert_eq!(bodies[0].object, ObjectRef::Data(known));
                assert_eq!(bodies[1].object, ObjectRef::Id("missing".into()));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn test_expanded_value_reports_only_remaining_ids() {
        let obj = DataObject::new(b"x".to_vec());
        let value = QueryValue::Simple(SimpleValue::Statement(stmt(
            "s",
            StatementBody::Simple(SimpleStatement::new(obj.key.clone())),
        )));
        let expanded = value.with_objects(&objects(&[obj]));
        assert!(expanded.object_ids().is_empty());
    }

    #[test]
    fn test_statement_object_ids() {
        let s = stmt(
            "s",
            StatementBody::Compound(vec![SimpleStatement::new("x"), SimpleStatement::new("y")]),
        );
        assert_eq!(s.object_ids(), vec!["x", "y"]);
    }

    #[test]
    fn test_query_value_json_shape() {
        let value = QueryValue::Simple(SimpleValue::Int(42));
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["kind"], "simple");
        assert_eq!(json["value"]["type"], "int");
        assert_eq!(json["value"]["value"], 42);
    }
}
