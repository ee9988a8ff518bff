//! Source operator: a sorted in-memory table.

use crate::operator::{Basis, FetchRequest, RowOp, SourceChange};
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;
use tidemark_core::{Change, Node, Row, RowOrder};

/// The leaf of an operator tree: rows of one table kept sorted under the
/// stream order. Pushes update the table and emit the matching change;
/// fetches honor constraint, start position, and direction.
pub struct Source {
    table: String,
    order: RowOrder,
    rows: Vec<Row>,
}

impl Source {
    /// Creates an empty source for a table.
    pub fn new(table: impl Into<String>, order: RowOrder) -> Self {
        Self {
            table: table.into(),
            order,
            rows: Vec::new(),
        }
    }

    /// Returns the table this source feeds from.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the stream order.
    pub fn order(&self) -> &RowOrder {
        &self.order
    }

    /// Number of rows currently held.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the source holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn matches(&self, req: &FetchRequest, row: &Row) -> bool {
        if let Some(constraint) = &req.constraint {
            let value = row.get(&constraint.column);
            if value != Some(&constraint.value) {
                return false;
            }
        }
        if let Some(start) = &req.start {
            let ord = self.order.cmp(row, &start.row);
            let past = if req.reverse {
                ord == Ordering::Less
            } else {
                ord == Ordering::Greater
            };
            let at = ord == Ordering::Equal && start.basis == Basis::At;
            if !(past || at) {
                return false;
            }
        }
        true
    }

    /// Pulls rows for a request, in the requested direction.
    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        let keep = |row: &&Row| self.matches(req, row);
        if req.reverse {
            self.rows.iter().rev().filter(keep).map(|r| Node::new(r.clone())).collect()
        } else {
            self.rows.iter().filter(keep).map(|r| Node::new(r.clone())).collect()
        }
    }

    /// Sources hold no per-fetch state; cleanup is a plain fetch.
    pub fn cleanup(&mut self, req: &FetchRequest) -> Vec<Node> {
        self.fetch(req)
    }

    /// Applies a change to the table and emits it downstream.
    ///
    /// Changes for other tables, and removes for unknown rows, emit
    /// nothing.
    pub fn push(&mut self, change: &SourceChange) -> Vec<Change> {
        if change.table != self.table {
            return Vec::new();
        }
        match &change.op {
            RowOp::Add(row) => {
                let at = self
                    .rows
                    .partition_point(|r| self.order.cmp(r, row) == Ordering::Less);
                self.rows.insert(at, row.clone());
                alloc::vec![Change::add(Node::new(row.clone()))]
            }
            RowOp::Remove(row) => {
                match self.rows.iter().position(|r| r == row) {
                    Some(at) => {
                        self.rows.remove(at);
                        alloc::vec![Change::remove(Node::new(row.clone()))]
                    }
                    None => Vec::new(),
                }
            }
        }
    }
}
