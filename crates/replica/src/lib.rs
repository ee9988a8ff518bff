//! Tidemark Replica - the versioned row-store and snapshot/diff engine.
//!
//! This crate provides the single source of truth the sync engine runs
//! against:
//!
//! - `ReplicaStore`: an in-memory multi-table key→value store with a
//!   monotonically increasing commit sequence and an append-only change log
//! - `WriteTx`: a journal-staged write transaction (read-your-writes,
//!   rollback by drop, commit advances the version)
//! - `Snapshotter`: a handle pinned to one version; `current()` reads the
//!   pinned state, `advance()` re-pins to the head and returns a `Diff`
//! - `Diff`: a generation-stamped, single-use view of everything that
//!   changed between two versions, iterated per table with per-key
//!   coalescing
//! - `CursorPool`: pooled log cursors, released on every exit path
//!
//! # Example
//!
//! ```rust
//! use tidemark_core::Value;
//! use tidemark_replica::{ReplicaStore, Snapshotter, WriteTx};
//!
//! let store = ReplicaStore::shared();
//! let mut snap = Snapshotter::new(store.clone());
//!
//! let mut tx = WriteTx::begin(store.clone());
//! tx.put("entries", "foo", Value::String("bar".into()));
//! tx.commit().unwrap();
//!
//! let diff = snap.advance();
//! let pairs: Vec<_> = diff.table("entries").unwrap().collect();
//! assert_eq!(pairs.len(), 1);
//! ```

mod cursor;
mod log;
mod snapshot;
mod store;

pub use cursor::{CursorGuard, CursorPool, LogCursor};
pub use log::{ChangeLog, CoalescedChanges, LogBody, LogRecord};
pub use snapshot::{Diff, RowDiff, Snapshotter, StoreView, TableDiffIter};
pub use store::{ReplicaStore, SharedStore, WriteTx};
