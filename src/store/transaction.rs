//! Buffered, optimistically-checked transactions over a [`Store`].

use super::{Entity, IndexKey, ReadSet, RecordKey, Store, StoredRecord, Versioned, WriteSet};
use crate::audit::ChangeEvent;
use crate::error::Result;
use log::debug;
use std::collections::BTreeMap;

/// A single-attempt transaction.
///
/// Reads go to the store (or to this transaction's own pending writes), writes
/// stay buffered until [`Transaction::commit`]. Dropping a transaction without
/// committing discards everything it wrote.
pub struct Transaction<'s> {
    store: &'s dyn Store,
    reads: ReadSet,
    /// First value observed per key, reported as the "old" side of change events
    originals: BTreeMap<RecordKey, Option<serde_json::Value>>,
    writes: WriteSet,
}

impl<'s> Transaction<'s> {
    pub fn new(store: &'s dyn Store) -> Self {
        Self {
            store,
            reads: ReadSet::new(),
            originals: BTreeMap::new(),
            writes: WriteSet::new(),
        }
    }

    fn observe(&mut self, key: &RecordKey, versioned: &Versioned) {
        self.reads.records.entry(key.clone()).or_insert(versioned.version);
        self.originals
            .entry(key.clone())
            .or_insert_with(|| versioned.record.as_ref().map(|r| r.value.clone()));
    }

    fn current(&mut self, key: &RecordKey) -> Result<Option<StoredRecord>> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        let versioned = self.store.read(key)?;
        self.observe(key, &versioned);
        Ok(versioned.record)
    }

    /// Fetch a record by key
    pub fn get<E: Entity>(&mut self, key: &str) -> Result<Option<E>> {
        match self.current(&RecordKey::of::<E>(key))? {
            Some(record) => Ok(Some(serde_json::from_value(record.value)?)),
            None => Ok(None),
        }
    }

    /// Create or overwrite a record
    pub fn put<E: Entity>(&mut self, entity: &E) -> Result<()> {
        let key = RecordKey::of::<E>(&entity.key());
        // Writes always follow a fresh read so the commit validates what we overwrite.
        self.current(&key)?;
        let record = StoredRecord::from_entity(entity)?;
        self.writes.insert(key, Some(record));
        Ok(())
    }

    /// Delete a record; deleting an absent record is a no-op
    pub fn delete<E: Entity>(&mut self, key: &str) -> Result<()> {
        let key = RecordKey::of::<E>(key);
        if self.current(&key)?.is_some() {
            self.writes.insert(key, None);
        }
        Ok(())
    }

    /// All records of `E` whose indexed `property` equals `value`, ordered by key.
    /// The predicate itself joins the read set, so a matching record created
    /// elsewhere before commit fails the commit even when nothing matched.
    pub fn query<E: Entity>(&mut self, property: &str, value: &str) -> Result<Vec<E>> {
        let predicate = IndexKey::new(E::KIND, property, value);
        let result = self.store.query(&predicate)?;
        self.reads.predicates.entry(predicate).or_insert(result.version);
        self.merge_pending::<E>(result.records, |record| record.matches(property, value))
    }

    /// All records of `E`, ordered by key
    pub fn scan<E: Entity>(&mut self) -> Result<Vec<E>> {
        let stored = self.store.scan(E::KIND)?;
        self.merge_pending::<E>(stored, |_| true)
    }

    fn merge_pending<E: Entity>(
        &mut self,
        stored: Vec<(RecordKey, Versioned)>,
        filter: impl Fn(&StoredRecord) -> bool,
    ) -> Result<Vec<E>> {
        let mut found: BTreeMap<RecordKey, StoredRecord> = BTreeMap::new();
        for (key, versioned) in stored {
            if self.writes.contains_key(&key) {
                continue;
            }
            self.observe(&key, &versioned);
            if let Some(record) = versioned.record {
                found.insert(key, record);
            }
        }
        for (key, pending) in &self.writes {
            if key.kind != E::KIND {
                continue;
            }
            if let Some(record) = pending {
                if filter(record) {
                    found.insert(key.clone(), record.clone());
                }
            }
        }
        found
            .into_values()
            .map(|record| serde_json::from_value(record.value).map_err(Into::into))
            .collect()
    }

    /// Number of buffered writes
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Validate the read set and apply all writes atomically.
    /// Returns one change event per record whose content actually changed.
    pub fn commit(self) -> Result<Vec<ChangeEvent>> {
        if self.writes.is_empty() {
            return Ok(Vec::new());
        }
        self.store.commit(&self.reads, &self.writes)?;
        debug!(
            "Committed {} writes after {} reads",
            self.writes.len(),
            self.reads.len()
        );

        let mut originals = self.originals;
        let events = self
            .writes
            .into_iter()
            .filter_map(|(key, pending)| {
                let old = originals.remove(&key).flatten();
                let new = pending.map(|record| record.value);
                (old != new).then(|| ChangeEvent::new(&key.kind, &key.key, old, new))
            })
            .collect();
        Ok(events)
    }
}

/// Run `op` inside a fresh transaction and commit it.
///
/// Any error from `op` aborts the transaction before anything is written.
/// Commit-time conflicts are returned as-is; nothing here retries.
pub fn run_in_transaction<T, F>(store: &dyn Store, op: F) -> Result<(T, Vec<ChangeEvent>)>
where
    F: FnOnce(&mut Transaction<'_>) -> Result<T>,
{
    let mut txn = Transaction::new(store);
    let value = op(&mut txn)?;
    let events = txn.commit()?;
    Ok((value, events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FleetError;
    use crate::store::MemoryStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
        color: String,
    }

    impl Entity for Widget {
        const KIND: &'static str = "widget";

        fn key(&self) -> String {
            self.name.clone()
        }

        fn indexes(&self) -> Vec<(&'static str, String)> {
            vec![("color", self.color.clone())]
        }
    }

    fn widget(name: &str, color: &str) -> Widget {
        Widget {
            name: name.to_string(),
            color: color.to_string(),
        }
    }

    #[test]
    fn test_reads_see_own_writes() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new(&store);
        txn.put(&widget("a", "red")).unwrap();
        assert_eq!(txn.get::<Widget>("a").unwrap(), Some(widget("a", "red")));
        assert_eq!(txn.query::<Widget>("color", "red").unwrap().len(), 1);

        // Nothing is visible outside before commit
        let mut other = Transaction::new(&store);
        assert_eq!(other.get::<Widget>("a").unwrap(), None);

        let events = txn.commit().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].old.is_none());

        let mut fresh = Transaction::new(&store);
        assert_eq!(fresh.get::<Widget>("a").unwrap(), Some(widget("a", "red")));
    }

    #[test]
    fn test_pending_write_moves_record_out_of_query() {
        let store = MemoryStore::new();
        run_in_transaction(&store, |txn| txn.put(&widget("a", "red"))).unwrap();

        let mut txn = Transaction::new(&store);
        txn.put(&widget("a", "blue")).unwrap();
        assert!(txn.query::<Widget>("color", "red").unwrap().is_empty());
        assert_eq!(txn.query::<Widget>("color", "blue").unwrap().len(), 1);
    }

    #[test]
    fn test_failed_op_writes_nothing() {
        let store = MemoryStore::new();
        let result: Result<((), Vec<ChangeEvent>)> = run_in_transaction(&store, |txn| {
            txn.put(&widget("a", "red"))?;
            Err(FleetError::validation("boom"))
        });
        assert!(result.is_err());

        let mut txn = Transaction::new(&store);
        assert_eq!(txn.get::<Widget>("a").unwrap(), None);
    }

    #[test]
    fn test_concurrent_writers_conflict() {
        let store = MemoryStore::new();
        run_in_transaction(&store, |txn| txn.put(&widget("a", "red"))).unwrap();

        let mut first = Transaction::new(&store);
        let mut second = Transaction::new(&store);
        first.get::<Widget>("a").unwrap();
        second.get::<Widget>("a").unwrap();
        first.put(&widget("a", "blue")).unwrap();
        second.put(&widget("a", "green")).unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(err.is_transient());

        let mut txn = Transaction::new(&store);
        assert_eq!(txn.get::<Widget>("a").unwrap(), Some(widget("a", "blue")));
    }

    #[test]
    fn test_empty_query_conflicts_with_new_match() {
        let store = MemoryStore::new();

        let mut first = Transaction::new(&store);
        let mut second = Transaction::new(&store);
        assert!(first.query::<Widget>("color", "red").unwrap().is_empty());
        assert!(second.query::<Widget>("color", "red").unwrap().is_empty());
        first.put(&widget("a", "red")).unwrap();
        second.put(&widget("b", "red")).unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(err.is_transient());

        let mut txn = Transaction::new(&store);
        assert_eq!(txn.query::<Widget>("color", "red").unwrap(), vec![widget("a", "red")]);
    }

    #[test]
    fn test_delete_emits_old_value() {
        let store = MemoryStore::new();
        run_in_transaction(&store, |txn| txn.put(&widget("a", "red"))).unwrap();
        let (_, events) = run_in_transaction(&store, |txn| txn.delete::<Widget>("a")).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].old.is_some());
        assert!(events[0].new.is_none());

        // Deleting again is a no-op with nothing to report
        let (_, events) = run_in_transaction(&store, |txn| txn.delete::<Widget>("a")).unwrap();
        assert!(events.is_empty());
    }
}
