//! Snapshotters and diffs.
//!
//! A `Snapshotter` stays pinned at one version of the store while commits
//! continue past it. `current()` reads the pinned state; `advance()`
//! re-pins to the head and hands back a `Diff` covering everything in
//! between. Diffs are single-use: they carry the generation stamp of the
//! advance that created them, and every iteration step re-checks it, so a
//! later advance invalidates them instead of letting them read on.

use crate::cursor::CursorGuard;
use crate::log::LogBody;
use crate::store::SharedStore;
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeBounds;
use std::rc::Rc;
use tidemark_core::{Error, Result, Value, Version};

/// A handle pinned to one version of a store.
///
/// Multiple snapshotters over one store pin and advance independently;
/// none of them observes another's progress.
pub struct Snapshotter {
    store: SharedStore,
    pinned: u64,
    schema_version: u32,
    generation: Rc<Cell<u64>>,
}

impl Snapshotter {
    /// Creates a snapshotter pinned at the store's current head.
    pub fn new(store: SharedStore) -> Self {
        let (pinned, schema_version) = {
            let s = store.borrow();
            (s.seq(), s.schema_version())
        };
        Self {
            store,
            pinned,
            schema_version,
            generation: Rc::new(Cell::new(0)),
        }
    }

    /// The pinned version.
    pub fn pinned(&self) -> Version {
        Version::from_seq(self.pinned)
    }

    /// A read view of the store at the pinned version, with the schema
    /// version observed at pin time.
    pub fn current(&self) -> StoreView {
        StoreView {
            store: self.store.clone(),
            pinned: self.pinned,
            schema_version: self.schema_version,
        }
    }

    /// Atomically re-pins to the store's head and returns the diff
    /// spanning `(previous pin, head]`.
    ///
    /// Advancing again invalidates the returned diff. When nothing has
    /// committed since the last pin the diff is simply empty.
    pub fn advance(&mut self) -> Diff {
        let (head, schema_version) = {
            let s = self.store.borrow();
            (s.seq(), s.schema_version())
        };
        let stamp = self.generation.get() + 1;
        self.generation.set(stamp);
        let diff = Diff {
            store: self.store.clone(),
            prev: self.pinned,
            curr: head,
            stamp,
            generation: self.generation.clone(),
        };
        self.pinned = head;
        self.schema_version = schema_version;
        diff
    }
}

/// A read view of the store at a pinned version.
///
/// Reads reconstruct the pinned state by rewinding newer change-log
/// records over the committed data.
pub struct StoreView {
    store: SharedStore,
    pinned: u64,
    schema_version: u32,
}

impl StoreView {
    /// The version this view reads at.
    pub fn version(&self) -> Version {
        Version::from_seq(self.pinned)
    }

    /// The schema version observed at pin time.
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Reads a key as of the pinned version.
    ///
    /// Fails with `ResetRequired` if the table was truncated after the
    /// pin: the pinned rows are gone and cannot be reconstructed.
    pub fn get(&self, table: &str, key: &str) -> Result<Option<Value>> {
        let store = self.store.borrow();
        let mut value = store.get(table, key).cloned();
        let newer = store.log().lower_bound(self.pinned);
        for record in store.log().records()[newer..].iter().rev() {
            match &record.body {
                LogBody::Row {
                    table: t,
                    key: k,
                    prev,
                    ..
                } if t == table && k == key => {
                    value = prev.clone();
                }
                LogBody::Truncate { table: t } if t == table => {
                    return Err(Error::ResetRequired);
                }
                _ => {}
            }
        }
        Ok(value)
    }

    /// Scans a table's keys within a range, as of the pinned version.
    pub fn scan<R: RangeBounds<String> + Clone>(
        &self,
        table: &str,
        range: R,
    ) -> Result<Vec<(String, Value)>> {
        let store = self.store.borrow();
        let mut rows: BTreeMap<String, Value> =
            store.scan(table, range.clone()).into_iter().collect();
        let newer = store.log().lower_bound(self.pinned);
        for record in store.log().records()[newer..].iter().rev() {
            match &record.body {
                LogBody::Row {
                    table: t,
                    key,
                    prev,
                    ..
                } if t == table && range.contains(key) => match prev {
                    Some(value) => {
                        rows.insert(key.clone(), value.clone());
                    }
                    None => {
                        rows.remove(key);
                    }
                },
                LogBody::Truncate { table: t } if t == table => {
                    return Err(Error::ResetRequired);
                }
                _ => {}
            }
        }
        Ok(rows.into_iter().collect())
    }
}

/// One coalesced row change within a diff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowDiff {
    /// The row key.
    pub key: String,
    /// The value as of the diff's previous version; None if absent.
    pub prev: Option<Value>,
    /// The value as of the diff's current version; None if deleted.
    pub next: Option<Value>,
}

/// Everything that changed between two pinned versions.
///
/// Single-use: a later `advance()` on the owning snapshotter invalidates
/// it, and iteration fails with `InvalidDiff` instead of returning stale
/// data.
pub struct Diff {
    store: SharedStore,
    prev: u64,
    curr: u64,
    stamp: u64,
    generation: Rc<Cell<u64>>,
}

impl Diff {
    /// The version the diff starts after.
    pub fn prev_version(&self) -> Version {
        Version::from_seq(self.prev)
    }

    /// The version the diff runs up to.
    pub fn curr_version(&self) -> Version {
        Version::from_seq(self.curr)
    }

    fn check_valid(&self) -> Result<()> {
        if self.generation.get() != self.stamp {
            return Err(Error::InvalidDiff);
        }
        Ok(())
    }

    /// Returns true if nothing changed in the spanned range.
    pub fn is_empty(&self) -> Result<bool> {
        self.check_valid()?;
        Ok(!self.store.borrow().log().has_changes(self.prev, self.curr))
    }

    /// Names of the tables touched in the spanned range.
    pub fn tables(&self) -> Result<Vec<String>> {
        self.check_valid()?;
        let store = self.store.borrow();
        let log = store.log();
        let mut tables = BTreeSet::new();
        for record in &log.records()[log.lower_bound(self.prev)..log.upper_bound(self.curr)] {
            tables.insert(record.body.table().to_string());
        }
        Ok(tables.into_iter().collect())
    }

    /// Starts iterating one table's coalesced row changes.
    ///
    /// Fails with `ResetRequired` if the spanned range contains a
    /// truncate or schema change for any table: such an event cannot be
    /// repaired row by row, and every dependent view must be rebuilt.
    pub fn table(&self, table: &str) -> Result<TableDiffIter> {
        self.check_valid()?;
        let (cursor, end) = {
            let store = self.store.borrow();
            let log = store.log();
            if log.has_reset(self.prev, self.curr) {
                return Err(Error::ResetRequired);
            }
            let mut cursor = store.cursor_pool().acquire();
            cursor.pos = log.lower_bound(self.prev);
            (cursor, log.upper_bound(self.curr))
        };
        Ok(TableDiffIter {
            store: self.store.clone(),
            table: table.to_string(),
            end,
            stamp: self.stamp,
            generation: self.generation.clone(),
            cursor,
            seen: BTreeSet::new(),
        })
    }
}

/// Lazy per-table iterator over a diff's coalesced row changes.
///
/// Holds a pooled cursor for the duration of the walk; the cursor goes
/// back to the pool when the iterator drops, however iteration ends.
pub struct TableDiffIter {
    store: SharedStore,
    table: String,
    end: usize,
    stamp: u64,
    generation: Rc<Cell<u64>>,
    cursor: CursorGuard,
    seen: BTreeSet<String>,
}

impl Iterator for TableDiffIter {
    type Item = Result<RowDiff>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.generation.get() != self.stamp {
            return Some(Err(Error::InvalidDiff));
        }
        let store = self.store.borrow();
        let records = store.log().records();
        while self.cursor.pos < self.end {
            let pos = self.cursor.pos;
            self.cursor.pos += 1;
            let LogBody::Row {
                table,
                key,
                prev,
                next,
            } = &records[pos].body
            else {
                // Reset records were rejected when the iterator was made.
                continue;
            };
            if table != &self.table || self.seen.contains(key) {
                continue;
            }
            self.seen.insert(key.clone());
            // Look ahead for later writes to the same key; the pair is
            // the first prev and the last next.
            let mut last_next = next.clone();
            for record in &records[pos + 1..self.end] {
                if let LogBody::Row {
                    table: t,
                    key: k,
                    next,
                    ..
                } = &record.body
                {
                    if t == table && k == key {
                        last_next = next.clone();
                    }
                }
            }
            return Some(Ok(RowDiff {
                key: key.clone(),
                prev: prev.clone(),
                next: last_next,
            }));
        }
        None
    }
}
