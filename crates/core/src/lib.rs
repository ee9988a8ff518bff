//! Tidemark Core - shared primitives for the Tidemark sync engine.
//!
//! This crate provides the foundational types every other Tidemark crate
//! builds on:
//!
//! - `Value`: JSON-shaped cell values with a total order
//! - `Row`: an ordered column → value map
//! - `Node`: a row plus its materialized child relationships
//! - `Change`: a tagged delta event (add / remove / child)
//! - `RowOrder`: the comparator contract operators sort under
//! - `Version`: an opaque, lexicographically ordered watermark
//! - `Error`: error types for sync-engine operations
//!
//! # Example
//!
//! ```rust
//! use tidemark_core::{Row, Value, Version, RowOrder};
//!
//! let row = Row::from_pairs([
//!     ("id", Value::String("a1".into())),
//!     ("rank", Value::Int64(3)),
//! ]);
//! assert_eq!(row.get("rank"), Some(&Value::Int64(3)));
//!
//! let order = RowOrder::asc(&["rank", "id"]);
//! assert_eq!(order.cmp(&row, &row), core::cmp::Ordering::Equal);
//!
//! assert!(Version::from_seq(9) < Version::from_seq(40));
//! ```

#![no_std]

extern crate alloc;

mod change;
mod compare;
mod error;
mod node;
mod row;
mod value;
mod version;

pub use change::Change;
pub use compare::{Direction, RowOrder, SortKey};
pub use error::{Error, Result};
pub use node::Node;
pub use row::Row;
pub use value::Value;
pub use version::Version;
