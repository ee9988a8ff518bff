//! The versioned row-store and its write transactions.

use crate::cursor::CursorPool;
use crate::log::{ChangeLog, CoalescedChanges, LogBody};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::RangeBounds;
use std::rc::Rc;
use tidemark_core::{Result, Value, Version};

/// Shared handle to a store.
///
/// One room's processor, snapshotters, and transactions all hold clones
/// of this handle; rooms are single-threaded actors, so plain `Rc` with
/// interior mutability is the sharing model.
pub type SharedStore = Rc<RefCell<ReplicaStore>>;

/// An in-memory multi-table key→value store with a monotonic commit
/// sequence and an append-only change log.
///
/// Only write transactions mutate table data; every commit appends one
/// coalesced row record per touched key and advances the sequence.
#[derive(Debug, Default)]
pub struct ReplicaStore {
    tables: BTreeMap<String, BTreeMap<String, Value>>,
    seq: u64,
    schema_version: u32,
    log: ChangeLog,
    cursors: CursorPool,
}

impl ReplicaStore {
    /// Creates an empty store at sequence zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store behind a shared handle.
    pub fn shared() -> SharedStore {
        Rc::new(RefCell::new(Self::new()))
    }

    /// The current commit sequence.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The current version watermark.
    pub fn version(&self) -> Version {
        Version::from_seq(self.seq)
    }

    /// The current schema version.
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Reads a key's committed value.
    pub fn get(&self, table: &str, key: &str) -> Option<&Value> {
        self.tables.get(table)?.get(key)
    }

    /// Scans a table's committed keys within a range, in key order.
    pub fn scan<R: RangeBounds<String>>(&self, table: &str, range: R) -> Vec<(String, Value)> {
        match self.tables.get(table) {
            Some(rows) => rows
                .range(range)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Names of tables holding at least one key.
    pub fn tables(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The change log.
    pub fn log(&self) -> &ChangeLog {
        &self.log
    }

    /// A clone of the cursor pool handle.
    pub fn cursor_pool(&self) -> CursorPool {
        self.cursors.clone()
    }

    /// Coalesced changes over the version range `(lo, hi]`.
    pub fn coalesced_changes(&self, lo: u64, hi: u64) -> Result<CoalescedChanges> {
        self.log.coalesce(lo, hi)
    }

    /// Truncates a table: clears its rows and logs a distinguished record
    /// that invalidates row-level diffing across it.
    pub fn truncate(&mut self, table: &str) -> Version {
        self.tables.remove(table);
        self.seq += 1;
        self.schema_version += 1;
        self.log.append(
            self.seq,
            LogBody::Truncate {
                table: table.into(),
            },
        );
        self.version()
    }

    /// Records a schema change (column add/drop) for a table.
    pub fn alter_schema(&mut self, table: &str) -> Version {
        self.seq += 1;
        self.schema_version += 1;
        self.log.append(
            self.seq,
            LogBody::AlterSchema {
                table: table.into(),
            },
        );
        self.version()
    }

    fn apply(
        &mut self,
        writes: BTreeMap<(String, String), (Option<Value>, Option<Value>)>,
    ) -> Version {
        if writes.is_empty() {
            return self.version();
        }
        self.seq += 1;
        for ((table, key), (prev, next)) in writes {
            let rows = self.tables.entry(table.clone()).or_default();
            match &next {
                Some(value) => {
                    rows.insert(key.clone(), value.clone());
                }
                None => {
                    rows.remove(&key);
                }
            }
            self.log.append(self.seq, LogBody::Row { table, key, prev, next });
        }
        self.version()
    }
}

/// A journal-staged write transaction.
///
/// Writes stage in the transaction and hit the store only at commit;
/// dropping the transaction without committing rolls everything back.
/// Reads see the transaction's own staged writes.
pub struct WriteTx {
    store: SharedStore,
    writes: BTreeMap<(String, String), (Option<Value>, Option<Value>)>,
}

impl WriteTx {
    /// Begins a transaction against a store.
    pub fn begin(store: SharedStore) -> Self {
        Self {
            store,
            writes: BTreeMap::new(),
        }
    }

    /// Reads a key, seeing this transaction's staged writes.
    pub fn get(&self, table: &str, key: &str) -> Option<Value> {
        if let Some((_, next)) = self.writes.get(&(table.into(), key.into())) {
            return next.clone();
        }
        self.store.borrow().get(table, key).cloned()
    }

    /// Scans a table within a key range, seeing staged writes.
    pub fn scan<R: RangeBounds<String> + Clone>(
        &self,
        table: &str,
        range: R,
    ) -> Vec<(String, Value)> {
        let mut merged: BTreeMap<String, Value> = self
            .store
            .borrow()
            .scan(table, range.clone())
            .into_iter()
            .collect();
        for ((t, key), (_, next)) in &self.writes {
            if t != table || !range.contains(key) {
                continue;
            }
            match next {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }

    /// Stages a put.
    pub fn put(&mut self, table: &str, key: &str, value: Value) {
        self.stage(table, key, Some(value));
    }

    /// Stages a delete. Returns true if the key was visible beforehand.
    pub fn del(&mut self, table: &str, key: &str) -> bool {
        let existed = self.get(table, key).is_some();
        self.stage(table, key, None);
        existed
    }

    fn stage(&mut self, table: &str, key: &str, next: Option<Value>) {
        let full_key = (table.to_string(), key.to_string());
        match self.writes.get_mut(&full_key) {
            Some(entry) => entry.1 = next,
            None => {
                let prev = self.store.borrow().get(table, key).cloned();
                self.writes.insert(full_key, (prev, next));
            }
        }
    }

    /// Returns true if nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Commits the staged writes, advancing the store's version.
    ///
    /// A transaction with no staged writes leaves the version unchanged.
    pub fn commit(self) -> Result<Version> {
        let writes = self.writes;
        Ok(self.store.borrow_mut().apply(writes))
    }

    /// Discards the staged writes.
    ///
    /// Dropping the transaction has the same effect; this spelling exists
    /// for call sites where the rollback is the point.
    pub fn rollback(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Value {
        Value::String(s.into())
    }

    #[test]
    fn test_commit_advances_version() {
        let store = ReplicaStore::shared();
        assert_eq!(store.borrow().seq(), 0);

        let mut tx = WriteTx::begin(store.clone());
        tx.put("entries", "foo", v("bar"));
        let version = tx.commit().unwrap();

        assert_eq!(version, Version::from_seq(1));
        assert_eq!(store.borrow().get("entries", "foo"), Some(&v("bar")));
    }

    #[test]
    fn test_empty_commit_keeps_version() {
        let store = ReplicaStore::shared();
        let tx = WriteTx::begin(store.clone());
        assert!(tx.is_empty());
        let version = tx.commit().unwrap();
        assert_eq!(version, Version::from_seq(0));
        assert!(store.borrow().log().is_empty());
    }

    #[test]
    fn test_rollback_by_drop() {
        let store = ReplicaStore::shared();
        {
            let mut tx = WriteTx::begin(store.clone());
            tx.put("entries", "foo", v("bar"));
        }
        assert_eq!(store.borrow().get("entries", "foo"), None);
        assert_eq!(store.borrow().seq(), 0);
    }

    #[test]
    fn test_read_your_writes() {
        let store = ReplicaStore::shared();
        let mut setup = WriteTx::begin(store.clone());
        setup.put("entries", "a", v("committed"));
        setup.commit().unwrap();

        let mut tx = WriteTx::begin(store.clone());
        tx.put("entries", "a", v("staged"));
        tx.put("entries", "b", v("new"));
        assert_eq!(tx.get("entries", "a"), Some(v("staged")));
        assert_eq!(tx.get("entries", "b"), Some(v("new")));

        tx.del("entries", "a");
        assert_eq!(tx.get("entries", "a"), None);
        // The store still sees the committed value until commit.
        assert_eq!(store.borrow().get("entries", "a"), Some(&v("committed")));
    }

    #[test]
    fn test_tx_coalesces_writes_per_key() {
        let store = ReplicaStore::shared();
        let mut tx = WriteTx::begin(store.clone());
        tx.put("entries", "a", v("one"));
        tx.put("entries", "a", v("two"));
        tx.commit().unwrap();

        // One log record, prev from before the tx, next from the last put.
        let log = store.borrow();
        assert_eq!(log.log().len(), 1);
        match &log.log().records()[0].body {
            LogBody::Row { prev, next, .. } => {
                assert_eq!(prev, &None);
                assert_eq!(next, &Some(v("two")));
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_scan_merges_staged_writes() {
        let store = ReplicaStore::shared();
        let mut setup = WriteTx::begin(store.clone());
        setup.put("entries", "a", v("1"));
        setup.put("entries", "b", v("2"));
        setup.commit().unwrap();

        let mut tx = WriteTx::begin(store.clone());
        tx.del("entries", "a");
        tx.put("entries", "c", v("3"));

        let keys: Vec<String> = tx.scan("entries", ..).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b", "c"]);
    }

    #[test]
    fn test_del_returns_visibility() {
        let store = ReplicaStore::shared();
        let mut tx = WriteTx::begin(store.clone());
        assert!(!tx.del("entries", "ghost"));
        tx.put("entries", "a", v("1"));
        assert!(tx.del("entries", "a"));
    }

    #[test]
    fn test_truncate_logs_reset_record() {
        let store = ReplicaStore::shared();
        let mut tx = WriteTx::begin(store.clone());
        tx.put("entries", "a", v("1"));
        tx.commit().unwrap();

        let version = store.borrow_mut().truncate("entries");
        assert_eq!(version, Version::from_seq(2));
        assert_eq!(store.borrow().get("entries", "a"), None);
        assert!(store.borrow().log().has_reset(0, 2));
        assert_eq!(store.borrow().schema_version(), 1);
    }

    #[test]
    fn test_scan_range() {
        let store = ReplicaStore::shared();
        let mut tx = WriteTx::begin(store.clone());
        for key in ["a", "b", "c", "d"] {
            tx.put("entries", key, v(key));
        }
        tx.commit().unwrap();

        let range = store
            .borrow()
            .scan("entries", "b".to_string().."d".to_string());
        let keys: Vec<String> = range.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b", "c"]);
    }
}
