//! The operator tree and its pull/push interfaces.
//!
//! Operators compose into an owned tree: each stage exclusively owns its
//! upstream input(s). The Input side is `fetch`/`cleanup` (pull the
//! current result down the tree); the Output side is `push` (feed one
//! source change in at the leaves, collect the output changes that fall
//! out at the root).

use crate::filter::{Filter, Predicate};
use crate::join::{Join, JoinOptions};
use crate::source::Source;
use crate::storage::ScopedStorage;
use crate::take::{Take, TakeOptions};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use tidemark_core::{Change, Node, Row, RowOrder, Value};

/// An exact-match constraint on one column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraint {
    /// Constrained column.
    pub column: String,
    /// Required value.
    pub value: Value,
}

/// Where iteration begins relative to a row position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Basis {
    /// Begin at the position itself.
    At,
    /// Begin just past the position.
    After,
}

/// A start position within the sorted stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Start {
    /// The row the position is measured against. The row itself need not
    /// still exist; positioning is by comparison.
    pub row: Row,
    /// Whether iteration includes the position itself.
    pub basis: Basis,
}

/// A pull request against an operator's Input side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// Optional exact-match constraint.
    pub constraint: Option<Constraint>,
    /// Optional start position.
    pub start: Option<Start>,
    /// Iterate against the stream order when true.
    pub reverse: bool,
}

impl FetchRequest {
    /// A request for everything, in stream order.
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds an exact-match constraint.
    pub fn with_constraint(mut self, column: impl Into<String>, value: Value) -> Self {
        self.constraint = Some(Constraint {
            column: column.into(),
            value,
        });
        self
    }

    /// Adds a start position.
    pub fn with_start(mut self, row: Row, basis: Basis) -> Self {
        self.start = Some(Start { row, basis });
        self
    }

    /// Flips iteration against the stream order.
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

/// A row-level change applied to a source table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowOp {
    /// The row was inserted.
    Add(Row),
    /// The row was deleted.
    Remove(Row),
}

/// A source change: which table, and what happened to which row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceChange {
    /// Affected table.
    pub table: String,
    /// The row-level operation.
    pub op: RowOp,
}

impl SourceChange {
    /// Creates an insert change.
    pub fn add(table: impl Into<String>, row: Row) -> Self {
        Self {
            table: table.into(),
            op: RowOp::Add(row),
        }
    }

    /// Creates a delete change.
    pub fn remove(table: impl Into<String>, row: Row) -> Self {
        Self {
            table: table.into(),
            op: RowOp::Remove(row),
        }
    }
}

/// A node in the operator tree.
pub enum Operator {
    /// Sorted in-memory table; the tree's entry point for changes.
    Source(Source),
    /// Predicate pass-through.
    Filter(Filter),
    /// Bounded top-N window per partition.
    Take(Take),
    /// One-to-many relationship materialization.
    Join(Join),
}

impl Operator {
    /// Creates a source operator.
    pub fn source(table: impl Into<String>, order: RowOrder) -> Self {
        Operator::Source(Source::new(table, order))
    }

    /// Creates a filter operator over an input.
    pub fn filter<F>(input: Operator, predicate: F) -> Self
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        Operator::Filter(Filter::new(Box::new(input), Box::new(predicate) as Predicate))
    }

    /// Creates a take operator over an input.
    pub fn take(
        input: Operator,
        order: RowOrder,
        options: TakeOptions,
        storage: ScopedStorage,
    ) -> Self {
        Operator::Take(Take::new(Box::new(input), order, options, storage))
    }

    /// Creates a join operator over a parent and a child input.
    pub fn join(
        parent: Operator,
        child: Operator,
        options: JoinOptions,
        storage: ScopedStorage,
    ) -> Self {
        Operator::Join(Join::new(Box::new(parent), Box::new(child), options, storage))
    }

    /// Pulls the current result for a request.
    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        match self {
            Operator::Source(op) => op.fetch(req),
            Operator::Filter(op) => op.fetch(req),
            Operator::Take(op) => op.fetch(req),
            Operator::Join(op) => op.fetch(req),
        }
    }

    /// Releases operator state for a request, yielding what was kept.
    pub fn cleanup(&mut self, req: &FetchRequest) -> Vec<Node> {
        match self {
            Operator::Source(op) => op.cleanup(req),
            Operator::Filter(op) => op.cleanup(req),
            Operator::Take(op) => op.cleanup(req),
            Operator::Join(op) => op.cleanup(req),
        }
    }

    /// Pushes one source change through the tree.
    ///
    /// Returns the changes the tree's root emits as a result.
    pub fn push(&mut self, change: &SourceChange) -> Vec<Change> {
        match self {
            Operator::Source(op) => op.push(change),
            Operator::Filter(op) => op.push(change),
            Operator::Take(op) => op.push(change),
            Operator::Join(op) => op.push(change),
        }
    }
}
