//! Row ordering contract.
//!
//! Operators that maintain sorted windows (Take) and sorted sources share
//! a caller-supplied comparator: a sequence of sort keys compared under
//! the total value order, with a full-row tiebreak so the result is a
//! total order over rows.

use crate::row::Row;
use crate::value::Value;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;

/// Sort direction for one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first.
    Asc,
    /// Largest first.
    Desc,
}

/// One (column, direction) sort key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    /// Column the key sorts on.
    pub column: String,
    /// Sort direction.
    pub direction: Direction,
}

impl SortKey {
    /// Creates an ascending sort key.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    /// Creates a descending sort key.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }
}

/// A total order over rows.
///
/// Keys are compared in sequence; rows equal under every key fall back to
/// a full-row comparison, so two distinct rows never compare equal unless
/// they are identical.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowOrder {
    keys: Vec<SortKey>,
}

impl RowOrder {
    /// Creates an order from explicit sort keys.
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    /// Creates an ascending order over the given columns.
    pub fn asc(columns: &[&str]) -> Self {
        Self {
            keys: columns.iter().map(|c| SortKey::asc(*c)).collect(),
        }
    }

    /// Returns the sort keys.
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Compares two rows under this order.
    pub fn cmp(&self, a: &Row, b: &Row) -> Ordering {
        for key in &self.keys {
            let va = a.get(&key.column).unwrap_or(&Value::Null);
            let vb = b.get(&key.column).unwrap_or(&Value::Null);
            let ord = match key.direction {
                Direction::Asc => va.total_cmp(vb),
                Direction::Desc => vb.total_cmp(va),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.total_cmp(b)
    }
}
