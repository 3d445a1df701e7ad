//! Abstract transactional key-value store.
//!
//! The inventory core never talks to a concrete database. It sees records as
//! `(kind, key) -> JSON document` with a handful of indexed properties per
//! record, and relies on the store for atomic, optimistically-checked commits:
//!
//! - every read inside a [`Transaction`] remembers the version it observed,
//!   including the version of each index predicate it queried;
//! - writes are buffered in the transaction and applied only at commit;
//! - commit fails with [`FleetError::TransientConflict`] if any record the
//!   transaction read was changed by someone else in the meantime.
//!
//! [`MemoryStore`] is the bundled engine. It keeps everything in memory and can
//! save/load a JSON snapshot.
//!
//! [`FleetError::TransientConflict`]: crate::error::FleetError::TransientConflict

pub mod memory;
pub mod transaction;

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use memory::MemoryStore;
pub use transaction::{run_in_transaction, Transaction};

/// A typed record persisted in the store
pub trait Entity: Serialize + DeserializeOwned + Clone {
    /// Record kind, the first half of the store key
    const KIND: &'static str;

    /// Unique key within the kind
    fn key(&self) -> String;

    /// Indexed `(property, value)` pairs usable with [`Transaction::query`]
    fn indexes(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// Fully qualified record identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub kind: String,
    pub key: String,
}

impl RecordKey {
    pub fn new(kind: &str, key: &str) -> Self {
        Self {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    pub fn of<E: Entity>(key: &str) -> Self {
        Self::new(E::KIND, key)
    }
}

/// A record as the store keeps it: the document plus its index entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub value: serde_json::Value,
    #[serde(default)]
    pub indexes: BTreeMap<String, String>,
}

impl StoredRecord {
    pub fn from_entity<E: Entity>(entity: &E) -> Result<Self> {
        Ok(Self {
            value: serde_json::to_value(entity)?,
            indexes: entity
                .indexes()
                .into_iter()
                .map(|(property, value)| (property.to_string(), value))
                .collect(),
        })
    }

    pub fn matches(&self, property: &str, value: &str) -> bool {
        self.indexes.get(property).map(String::as_str) == Some(value)
    }
}

/// A record read together with the version it had at read time.
/// Absent records read as version 0.
#[derive(Debug, Clone)]
pub struct Versioned {
    pub version: u64,
    pub record: Option<StoredRecord>,
}

/// Pending writes of a transaction; `None` deletes the record
pub type WriteSet = BTreeMap<RecordKey, Option<StoredRecord>>;

/// An indexed-property predicate: records of `kind` whose `property` equals `value`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey {
    pub kind: String,
    pub property: String,
    pub value: String,
}

impl IndexKey {
    pub fn new(kind: &str, property: &str, value: &str) -> Self {
        Self {
            kind: kind.to_string(),
            property: property.to_string(),
            value: value.to_string(),
        }
    }
}

/// Records matching an index predicate, plus the predicate's own version.
/// The version moves whenever a record enters or leaves the match set, so an
/// empty answer can be re-checked at commit.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub version: u64,
    pub records: Vec<(RecordKey, Versioned)>,
}

/// Versions observed by a transaction
#[derive(Debug, Clone, Default)]
pub struct ReadSet {
    pub records: BTreeMap<RecordKey, u64>,
    pub predicates: BTreeMap<IndexKey, u64>,
}

impl ReadSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len() + self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Primitives a backing store has to provide
pub trait Store: Send + Sync {
    /// Read a single record with its current version
    fn read(&self, key: &RecordKey) -> Result<Versioned>;

    /// All records matching an index predicate
    fn query(&self, predicate: &IndexKey) -> Result<QueryResult>;

    /// All records of `kind`
    fn scan(&self, kind: &str) -> Result<Vec<(RecordKey, Versioned)>>;

    /// Atomically validate `reads` (records and predicates) and apply `writes`
    fn commit(&self, reads: &ReadSet, writes: &WriteSet) -> Result<()>;
}
