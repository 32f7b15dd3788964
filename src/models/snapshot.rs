//! Snapshot tree
//!
//! On-chain governance state arrives as an untyped nested document. It is kept
//! as a tagged tree (`Scalar`, `List`, `Map`) so diffing and classification can
//! be written once, generically, instead of poking at loose JSON values.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Snapshot conversion errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot root must be an object, found {0}")]
    InvalidRoot(&'static str),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKey {
    Index(u64),
    Name(String),
}

/// Map key inside a snapshot.
///
/// Chain ids serialize as either `12` or `"12"`. Both normalize to `Index(12)`,
/// so a proposal never shows up as removed-and-re-added because an upstream
/// encoder changed its mind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged, from = "RawKey")]
pub enum Key {
    Index(u64),
    Name(String),
}

impl Key {
    /// Parse a raw map key, normalizing canonical decimal integers to `Index`
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<u64>() {
            Ok(n) if n.to_string() == raw => Key::Index(n),
            _ => Key::Name(raw.to_string()),
        }
    }

    pub fn as_index(&self) -> Option<u64> {
        match self {
            Key::Index(n) => Some(*n),
            Key::Name(_) => None,
        }
    }
}

impl From<RawKey> for Key {
    fn from(raw: RawKey) -> Self {
        match raw {
            RawKey::Index(n) => Key::Index(n),
            RawKey::Name(s) => Key::parse(&s),
        }
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key::Index(n)
    }
}

impl From<&str> for Key {
    fn from(raw: &str) -> Self {
        Key::parse(raw)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(n) => write!(f, "{}", n),
            Key::Name(s) => write!(f, "{}", s),
        }
    }
}

/// Leaf value.
///
/// Ordering is total (floats use `total_cmp`) so lists can be sorted into a
/// canonical form and compared as multisets.
#[derive(Debug, Clone)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i128),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn rank(&self) -> u8 {
        match self {
            Scalar::Null => 0,
            Scalar::Bool(_) => 1,
            Scalar::Int(_) => 2,
            Scalar::Float(_) => 3,
            Scalar::Text(_) => 4,
        }
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => Ordering::Equal,
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
            (Scalar::Float(a), Scalar::Float(b)) => a.total_cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scalar {}

/// Node of a snapshot tree
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Node {
    Scalar(Scalar),
    List(Vec<Node>),
    Map(BTreeMap<Key, Node>),
}

impl Node {
    pub fn text(value: impl Into<String>) -> Self {
        Node::Scalar(Scalar::Text(value.into()))
    }

    pub fn int(value: i128) -> Self {
        Node::Scalar(Scalar::Int(value))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Scalar(_) => "scalar",
            Node::List(_) => "list",
            Node::Map(_) => "map",
        }
    }

    pub fn get(&self, key: &Key) -> Option<&Node> {
        match self {
            Node::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Recursively sort every list so that order-insensitive comparison
    /// becomes plain equality.
    pub fn canonical(self) -> Node {
        match self {
            Node::Scalar(s) => Node::Scalar(s),
            Node::List(items) => {
                let mut items: Vec<Node> = items.into_iter().map(Node::canonical).collect();
                items.sort();
                Node::List(items)
            }
            Node::Map(map) => Node::Map(
                map.into_iter()
                    .map(|(k, v)| (k, v.canonical()))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Node {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Node::Scalar(Scalar::Null),
            Value::Bool(b) => Node::Scalar(Scalar::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Node::Scalar(Scalar::Int(i as i128))
                } else if let Some(u) = n.as_u64() {
                    Node::Scalar(Scalar::Int(u as i128))
                } else {
                    Node::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            Value::String(s) => Node::Scalar(Scalar::Text(s)),
            Value::Array(items) => Node::List(items.into_iter().map(Node::from).collect()),
            Value::Object(map) => Node::Map(
                map.into_iter()
                    .map(|(k, v)| (Key::parse(&k), Node::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Node> for serde_json::Value {
    fn from(node: Node) -> Self {
        use serde_json::Value;

        match node {
            Node::Scalar(Scalar::Null) => Value::Null,
            Node::Scalar(Scalar::Bool(b)) => Value::Bool(b),
            Node::Scalar(Scalar::Int(i)) => {
                if let Ok(v) = i64::try_from(i) {
                    Value::from(v)
                } else if let Ok(v) = u64::try_from(i) {
                    Value::from(v)
                } else {
                    Value::String(i.to_string())
                }
            }
            Node::Scalar(Scalar::Float(f)) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Node::Scalar(Scalar::Text(s)) => Value::String(s),
            Node::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Node::Map(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k.to_string(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;

    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Full point-in-time copy of on-chain governance state, keyed by proposal id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub struct Snapshot {
    entries: BTreeMap<Key, Node>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<Key, Node>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &Key) -> Option<&Node> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<Key>, node: Node) -> Option<Node> {
        self.entries.insert(key.into(), node)
    }

    pub fn remove(&mut self, key: &Key) -> Option<Node> {
        self.entries.remove(key)
    }

    pub fn entries(&self) -> &BTreeMap<Key, Node> {
        &self.entries
    }

    /// The snapshot as a single map node, with every list in canonical order
    pub fn canonical_root(&self) -> Node {
        Node::Map(self.entries.clone()).canonical()
    }

    /// Proposal ids currently in their `Ongoing` phase
    pub fn ongoing_ids(&self) -> BTreeSet<u64> {
        let ongoing = Key::Name("Ongoing".to_string());
        self.entries
            .iter()
            .filter(|(_, node)| node.get(&ongoing).is_some())
            .filter_map(|(key, _)| key.as_index())
            .collect()
    }

    /// SHA-256 of the canonical JSON rendering, hex encoded
    pub fn digest(&self) -> String {
        let value = serde_json::Value::from(self.canonical_root());
        let bytes = value.to_string().into_bytes();
        format!("{:x}", Sha256::digest(&bytes))
    }
}

impl TryFrom<serde_json::Value> for Snapshot {
    type Error = SnapshotError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Object(map) => Ok(Self {
                entries: map
                    .into_iter()
                    .map(|(k, v)| (Key::parse(&k), Node::from(v)))
                    .collect(),
            }),
            other => Err(SnapshotError::InvalidRoot(json_kind(&other))),
        }
    }
}

impl From<Snapshot> for serde_json::Value {
    fn from(snapshot: Snapshot) -> Self {
        serde_json::Value::from(Node::Map(snapshot.entries))
    }
}
