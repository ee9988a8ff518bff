//! Row structure for the Tidemark sync engine.
//!
//! A `Row` is an ordered map of column name to `Value`. Rows are treated
//! as immutable once they have been observed by a `Node`; updates flow
//! through the system as remove + add change pairs.

use crate::value::Value;
use alloc::collections::BTreeMap;
use alloc::string::String;
use core::cmp::Ordering;
use serde::{Deserialize, Serialize};

/// A row of a replicated table: an ordered column → value map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    /// Creates a new empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a row from (column, value) pairs.
    pub fn from_pairs<C, I>(pairs: I) -> Self
    where
        C: Into<String>,
        I: IntoIterator<Item = (C, Value)>,
    {
        Self {
            values: pairs.into_iter().map(|(c, v)| (c.into(), v)).collect(),
        }
    }

    /// Gets the value of a column, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Sets the value of a column, returning the previous value if any.
    pub fn set(&mut self, column: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(column.into(), value)
    }

    /// Removes a column, returning its value if it was present.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    /// Returns true if the row has a value for the column.
    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Returns the number of columns in this row.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this row has no columns.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over (column, value) entries in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Compares two rows column-by-column under the total value order.
    ///
    /// Entries are compared in column order; a missing column sorts before
    /// any present one. Used as the final tiebreaker by `RowOrder` so row
    /// ordering is total.
    pub fn total_cmp(&self, other: &Row) -> Ordering {
        for ((ca, va), (cb, vb)) in self.values.iter().zip(other.values.iter()) {
            let ord = ca.cmp(cb);
            if ord != Ordering::Equal {
                return ord;
            }
            let ord = va.total_cmp(vb);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.values.len().cmp(&other.values.len())
    }
}
