//! Operator state storage.
//!
//! Every stateful operator persists its incremental state in a store
//! scoped by operator identity: the full key is the operator's scope
//! prefix plus a key derived from the partition value (Take) or primary
//! key tuple (Join). State is owned exclusively by one operator instance
//! and partition; scopes never overlap.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use tidemark_core::Row;

/// Take's durable per-partition state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TakeState {
    /// Number of rows currently kept, never more than the limit.
    pub size: usize,
    /// The largest kept row, absent when the window is empty.
    pub bound: Option<Row>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum StateValue {
    Take(TakeState),
    MaxBound(Row),
    Flag,
}

/// Shared state store for one operator tree.
///
/// Hands out [`ScopedStorage`] handles with unique scope prefixes; all
/// reads and writes go through a scope.
#[derive(Clone, Default)]
pub struct OperatorStorage {
    inner: Rc<RefCell<BTreeMap<String, StateValue>>>,
    next_scope: Rc<Cell<u32>>,
}

impl OperatorStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh operator scope.
    pub fn scoped(&self) -> ScopedStorage {
        let id = self.next_scope.get();
        self.next_scope.set(id + 1);
        ScopedStorage {
            inner: self.inner.clone(),
            prefix: format!("{:08x}/", id),
        }
    }

    /// Total number of stored entries, across all scopes.
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

/// One operator's view of the store.
#[derive(Clone)]
pub struct ScopedStorage {
    inner: Rc<RefCell<BTreeMap<String, StateValue>>>,
    prefix: String,
}

impl ScopedStorage {
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Reads a Take state.
    pub fn get_take(&self, key: &str) -> Option<TakeState> {
        match self.inner.borrow().get(&self.full_key(key)) {
            Some(StateValue::Take(state)) => Some(state.clone()),
            _ => None,
        }
    }

    /// Writes a Take state.
    pub fn set_take(&self, key: &str, state: TakeState) {
        self.inner
            .borrow_mut()
            .insert(self.full_key(key), StateValue::Take(state));
    }

    /// Removes a Take state, returning it if present.
    pub fn remove_take(&self, key: &str) -> Option<TakeState> {
        match self.inner.borrow_mut().remove(&self.full_key(key)) {
            Some(StateValue::Take(state)) => Some(state),
            _ => None,
        }
    }

    /// Reads the cross-partition max-bound watermark.
    pub fn max_bound(&self) -> Option<Row> {
        match self.inner.borrow().get(&self.full_key("~max")) {
            Some(StateValue::MaxBound(row)) => Some(row.clone()),
            _ => None,
        }
    }

    /// Writes the cross-partition max-bound watermark.
    pub fn set_max_bound(&self, row: Row) {
        self.inner
            .borrow_mut()
            .insert(self.full_key("~max"), StateValue::MaxBound(row));
    }

    /// Sets a presence flag.
    pub fn set_flag(&self, key: &str) {
        self.inner
            .borrow_mut()
            .insert(self.full_key(key), StateValue::Flag);
    }

    /// Returns true if a presence flag is set.
    pub fn has_flag(&self, key: &str) -> bool {
        matches!(
            self.inner.borrow().get(&self.full_key(key)),
            Some(StateValue::Flag)
        )
    }

    /// Clears a presence flag, returning true if it was set.
    pub fn del_flag(&self, key: &str) -> bool {
        let full = self.full_key(key);
        let mut inner = self.inner.borrow_mut();
        match inner.get(&full) {
            Some(StateValue::Flag) => {
                inner.remove(&full);
                true
            }
            _ => false,
        }
    }

    /// Lists the scoped keys starting with a prefix, in order.
    pub fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        let full = self.full_key(prefix);
        self.inner
            .borrow()
            .range(full.clone()..)
            .take_while(|(k, _)| k.starts_with(&full))
            .map(|(k, _)| k[self.prefix.len()..].into())
            .collect()
    }
}
