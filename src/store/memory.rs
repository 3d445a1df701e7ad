//! In-memory store engine with JSON snapshots.

use super::{IndexKey, QueryResult, ReadSet, RecordKey, Store, StoredRecord, Versioned, WriteSet};
use crate::error::{FleetError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<RecordKey, StoredRecord>,
    /// Survives deletion so a delete followed by a re-create still invalidates readers
    versions: HashMap<RecordKey, u64>,
    index: BTreeMap<IndexKey, BTreeSet<String>>,
    /// Bumped whenever a key joins or leaves an index entry
    index_versions: HashMap<IndexKey, u64>,
    clock: u64,
}

impl State {
    fn version(&self, key: &RecordKey) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn index_version(&self, predicate: &IndexKey) -> u64 {
        self.index_versions.get(predicate).copied().unwrap_or(0)
    }

    fn versioned(&self, key: &RecordKey) -> Versioned {
        Versioned {
            version: self.version(key),
            record: self.records.get(key).cloned(),
        }
    }

    fn index_entries(key: &RecordKey, record: Option<&StoredRecord>) -> BTreeSet<IndexKey> {
        record
            .map(|record| {
                record
                    .indexes
                    .iter()
                    .map(|(property, value)| IndexKey::new(&key.kind, property, value))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn apply(&mut self, key: &RecordKey, pending: &Option<StoredRecord>) {
        self.clock += 1;
        self.versions.insert(key.clone(), self.clock);

        let before = Self::index_entries(key, self.records.get(key));
        let after = Self::index_entries(key, pending.as_ref());
        for entry in before.difference(&after) {
            if let Some(keys) = self.index.get_mut(entry) {
                keys.remove(&key.key);
                if keys.is_empty() {
                    self.index.remove(entry);
                }
            }
            self.index_versions.insert(entry.clone(), self.clock);
        }
        for entry in after.difference(&before) {
            self.index.entry(entry.clone()).or_default().insert(key.key.clone());
            self.index_versions.insert(entry.clone(), self.clock);
        }

        match pending {
            Some(record) => {
                self.records.insert(key.clone(), record.clone());
            }
            None => {
                self.records.remove(key);
            }
        }
    }
}

/// One record in a snapshot file
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    kind: String,
    key: String,
    #[serde(flatten)]
    record: StoredRecord,
}

/// Thread-safe in-memory [`Store`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| FleetError::Store("store lock poisoned".to_string()))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| FleetError::Store("store lock poisoned".to_string()))
    }

    /// Number of live records
    pub fn len(&self) -> Result<usize> {
        Ok(self.read_state()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Load a store from a JSON snapshot; a missing file yields an empty store
    pub fn load_snapshot(path: &Path) -> Result<Self> {
        let store = Self::new();
        if !path.exists() {
            info!("Snapshot {:?} does not exist, starting with an empty store", path);
            return Ok(store);
        }

        let content = fs::read_to_string(path)?;
        let entries: Vec<SnapshotEntry> = serde_json::from_str(&content)?;
        {
            let mut state = store.write_state()?;
            for entry in entries {
                let key = RecordKey {
                    kind: entry.kind,
                    key: entry.key,
                };
                state.apply(&key, &Some(entry.record));
            }
            info!("Loaded {} records from {:?}", state.records.len(), path);
        }
        Ok(store)
    }

    /// Write every live record to a JSON snapshot
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let state = self.read_state()?;
        let entries: Vec<SnapshotEntry> = state
            .records
            .iter()
            .map(|(key, record)| SnapshotEntry {
                kind: key.kind.clone(),
                key: key.key.clone(),
                record: record.clone(),
            })
            .collect();
        let json = serde_json::to_string_pretty(&entries)?;
        fs::write(path, json)?;
        debug!("Saved {} records to {:?}", entries.len(), path);
        Ok(())
    }
}

impl Store for MemoryStore {
    fn read(&self, key: &RecordKey) -> Result<Versioned> {
        Ok(self.read_state()?.versioned(key))
    }

    fn query(&self, predicate: &IndexKey) -> Result<QueryResult> {
        let state = self.read_state()?;
        let records = state
            .index
            .get(predicate)
            .map(|keys| {
                keys.iter()
                    .map(|key| {
                        let record_key = RecordKey::new(&predicate.kind, key);
                        let versioned = state.versioned(&record_key);
                        (record_key, versioned)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(QueryResult {
            version: state.index_version(predicate),
            records,
        })
    }

    fn scan(&self, kind: &str) -> Result<Vec<(RecordKey, Versioned)>> {
        let state = self.read_state()?;
        Ok(state
            .records
            .keys()
            .filter(|key| key.kind == kind)
            .map(|key| (key.clone(), state.versioned(key)))
            .collect())
    }

    fn commit(&self, reads: &ReadSet, writes: &WriteSet) -> Result<()> {
        let mut state = self.write_state()?;
        for (key, seen) in &reads.records {
            if state.version(key) != *seen {
                debug!("Commit rejected: {} {} changed since it was read", key.kind, key.key);
                return Err(FleetError::TransientConflict {
                    kind: key.kind.clone(),
                    key: key.key.clone(),
                });
            }
        }
        for (predicate, seen) in &reads.predicates {
            if state.index_version(predicate) != *seen {
                debug!(
                    "Commit rejected: {} matching {}={} changed since it was queried",
                    predicate.kind, predicate.property, predicate.value
                );
                return Err(FleetError::TransientConflict {
                    kind: predicate.kind.clone(),
                    key: format!("{}={}", predicate.property, predicate.value),
                });
            }
        }
        for (key, pending) in writes {
            state.apply(key, pending);
        }
        Ok(())
    }
}
