//! Tidemark Pipeline - incremental view maintenance operators.
//!
//! This crate implements the operator tree that keeps query results up to
//! date as row changes flow through it, without recomputation:
//!
//! - `Operator`: the tree of composable stages (Source, Filter, Take, Join)
//! - `FetchRequest`: the pull interface (constraint, start position, direction)
//! - `SourceChange`: a row-level change pushed into the tree's sources
//! - `OperatorStorage` / `ScopedStorage`: per-operator persistent state,
//!   keyed by operator identity plus partition value
//! - `keys`: deterministic encoding of value tuples into storage keys
//!
//! Each operator owns its upstream input(s); `fetch` pulls the current
//! result down the tree, `push` feeds a source change in at the leaves and
//! returns the resulting output changes at the root.
//!
//! # Example
//!
//! ```rust
//! use tidemark_core::{Row, RowOrder, Value};
//! use tidemark_pipeline::{FetchRequest, Operator, OperatorStorage, SourceChange, TakeOptions};
//!
//! let storage = OperatorStorage::new();
//! let source = Operator::source("issues", RowOrder::asc(&["rank", "id"]));
//! let mut top3 = Operator::take(
//!     source,
//!     RowOrder::asc(&["rank", "id"]),
//!     TakeOptions::new(3),
//!     storage.scoped(),
//! );
//!
//! for (id, rank) in [("a", 5), ("b", 1), ("c", 3), ("d", 9)] {
//!     let row = Row::from_pairs([("id", Value::String(id.into())), ("rank", Value::Int64(rank))]);
//!     top3.push(&SourceChange::add("issues", row));
//! }
//!
//! let window = top3.fetch(&FetchRequest::all());
//! assert_eq!(window.len(), 3);
//! ```

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod keys;

mod filter;
mod join;
mod operator;
mod source;
mod storage;
mod take;

pub use filter::{Filter, Predicate};
pub use join::{Join, JoinOptions};
pub use operator::{Basis, Constraint, FetchRequest, Operator, RowOp, SourceChange, Start};
pub use source::Source;
pub use storage::{OperatorStorage, ScopedStorage, TakeState};
pub use take::{Take, TakeOptions};
