//! Append-only change log.
//!
//! Every commit appends one row record per touched key; truncations and
//! schema changes append distinguished records, since they cannot be
//! expressed as row-level changes.

use std::collections::BTreeMap;
use tidemark_core::{Error, Result, Value};

/// One logged change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogBody {
    /// A row-level change: the key's value before and after.
    Row {
        table: String,
        key: String,
        prev: Option<Value>,
        next: Option<Value>,
    },
    /// The table was truncated.
    Truncate { table: String },
    /// The table's schema changed (column add/drop).
    AlterSchema { table: String },
}

impl LogBody {
    /// The table this record belongs to.
    pub fn table(&self) -> &str {
        match self {
            LogBody::Row { table, .. } => table,
            LogBody::Truncate { table } => table,
            LogBody::AlterSchema { table } => table,
        }
    }

    /// Returns true for records that invalidate row-level diffing.
    pub fn is_reset(&self) -> bool {
        matches!(self, LogBody::Truncate { .. } | LogBody::AlterSchema { .. })
    }
}

/// A sequenced log record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Commit sequence the record was written at.
    pub seq: u64,
    /// The change itself.
    pub body: LogBody,
}

/// Per-table coalesced changes over a version range: for each key, the
/// value as of the range start and as of the range end.
pub type CoalescedChanges = BTreeMap<String, BTreeMap<String, (Option<Value>, Option<Value>)>>;

/// The append-only ordered list of changes.
#[derive(Debug, Default)]
pub struct ChangeLog {
    records: Vec<LogRecord>,
}

impl ChangeLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record at a commit sequence.
    ///
    /// Sequences must be appended in non-decreasing order.
    pub fn append(&mut self, seq: u64, body: LogBody) {
        debug_assert!(self.records.last().map_or(true, |r| r.seq <= seq));
        self.records.push(LogRecord { seq, body });
    }

    /// All records, in append order.
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Index of the first record with `seq > lo`.
    pub fn lower_bound(&self, lo: u64) -> usize {
        self.records.partition_point(|r| r.seq <= lo)
    }

    /// Index of the first record with `seq > hi`.
    pub fn upper_bound(&self, hi: u64) -> usize {
        self.records.partition_point(|r| r.seq <= hi)
    }

    /// Returns true if any record falls in `(lo, hi]`.
    pub fn has_changes(&self, lo: u64, hi: u64) -> bool {
        self.lower_bound(lo) < self.upper_bound(hi)
    }

    /// Returns true if a reset record falls in `(lo, hi]`.
    pub fn has_reset(&self, lo: u64, hi: u64) -> bool {
        self.records[self.lower_bound(lo)..self.upper_bound(hi)]
            .iter()
            .any(|r| r.body.is_reset())
    }

    /// Coalesces the changes in `(lo, hi]` per table and key.
    ///
    /// Multiple writes to one key collapse into a single pair: the value
    /// as of `lo` and the value as of `hi`. A pair whose sides are equal
    /// is a legal no-op and is not elided.
    ///
    /// Fails with `ResetRequired` if the range spans a truncate or schema
    /// change: those cannot be expressed as row-level pairs.
    pub fn coalesce(&self, lo: u64, hi: u64) -> Result<CoalescedChanges> {
        let mut out: CoalescedChanges = BTreeMap::new();
        for record in &self.records[self.lower_bound(lo)..self.upper_bound(hi)] {
            match &record.body {
                LogBody::Row {
                    table,
                    key,
                    prev,
                    next,
                } => {
                    let entry = out
                        .entry(table.clone())
                        .or_default()
                        .entry(key.clone())
                        .or_insert_with(|| (prev.clone(), None));
                    entry.1 = next.clone();
                }
                LogBody::Truncate { .. } | LogBody::AlterSchema { .. } => {
                    return Err(Error::ResetRequired);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(table: &str, key: &str, prev: Option<i64>, next: Option<i64>) -> LogBody {
        LogBody::Row {
            table: table.into(),
            key: key.into(),
            prev: prev.map(Value::Int64),
            next: next.map(Value::Int64),
        }
    }

    #[test]
    fn test_bounds() {
        let mut log = ChangeLog::new();
        log.append(1, row("t", "a", None, Some(1)));
        log.append(2, row("t", "a", Some(1), Some(2)));
        log.append(2, row("t", "b", None, Some(1)));
        log.append(4, row("t", "a", Some(2), None));

        assert_eq!(log.lower_bound(0), 0);
        assert_eq!(log.lower_bound(1), 1);
        assert_eq!(log.upper_bound(2), 3);
        assert!(log.has_changes(1, 2));
        assert!(!log.has_changes(4, 9));
    }

    #[test]
    fn test_coalesce_multiple_writes_to_one_key() {
        let mut log = ChangeLog::new();
        log.append(1, row("t", "a", None, Some(1)));
        log.append(2, row("t", "a", Some(1), Some(2)));
        log.append(3, row("t", "a", Some(2), Some(3)));

        let changes = log.coalesce(0, 3).unwrap();
        assert_eq!(
            changes["t"]["a"],
            (None, Some(Value::Int64(3)))
        );

        let tail = log.coalesce(1, 3).unwrap();
        assert_eq!(
            tail["t"]["a"],
            (Some(Value::Int64(1)), Some(Value::Int64(3)))
        );
    }

    #[test]
    fn test_coalesce_keeps_noop_pairs() {
        let mut log = ChangeLog::new();
        log.append(1, row("t", "a", Some(1), Some(2)));
        log.append(2, row("t", "a", Some(2), Some(1)));

        // The key returns to its original value; the pair is still there.
        let changes = log.coalesce(0, 2).unwrap();
        assert_eq!(
            changes["t"]["a"],
            (Some(Value::Int64(1)), Some(Value::Int64(1)))
        );
    }

    #[test]
    fn test_coalesce_rejects_reset_records() {
        let mut log = ChangeLog::new();
        log.append(1, row("t", "a", None, Some(1)));
        log.append(2, LogBody::Truncate { table: "t".into() });

        assert!(log.coalesce(0, 1).is_ok());
        assert_eq!(log.coalesce(0, 2), Err(Error::ResetRequired));
        assert!(log.has_reset(0, 2));
        assert!(!log.has_reset(2, 9));
    }

    // Diff composition: coalescing (v0, v2] directly equals composing the
    // coalesced (v0, v1] and (v1, v2] ranges key by key.
    proptest! {
        #[test]
        fn prop_coalesce_composes(
            writes in proptest::collection::vec((0usize..4, proptest::option::of(0i64..5)), 1..30),
            cut in 1u64..30,
        ) {
            let mut log = ChangeLog::new();
            let mut current: BTreeMap<String, Option<Value>> = BTreeMap::new();
            for (seq, (key_idx, next)) in writes.iter().enumerate() {
                let key = format!("k{}", key_idx);
                let prev = current.get(&key).cloned().flatten();
                let next = next.map(Value::Int64);
                current.insert(key.clone(), next.clone());
                log.append(
                    seq as u64 + 1,
                    LogBody::Row { table: "t".into(), key, prev, next },
                );
            }
            let hi = writes.len() as u64;
            let cut = cut.min(hi);

            let direct = log.coalesce(0, hi).unwrap();
            let first = log.coalesce(0, cut).unwrap();
            let second = log.coalesce(cut, hi).unwrap();

            // Compose: start from the first range, overlay the second's
            // next values, keeping the first's prev where both touch.
            let mut composed = first.clone();
            for (table, keys) in second {
                let entry = composed.entry(table).or_default();
                for (key, (prev, next)) in keys {
                    entry
                        .entry(key)
                        .and_modify(|pair| pair.1 = next.clone())
                        .or_insert((prev, next));
                }
            }
            prop_assert_eq!(direct, composed);
        }
    }
}
