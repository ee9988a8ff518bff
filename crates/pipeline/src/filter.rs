//! Filter operator: predicate pass-through.

use crate::operator::{FetchRequest, Operator, SourceChange};
use alloc::boxed::Box;
use alloc::vec::Vec;
use tidemark_core::{Change, Node, Row};

/// Predicate over rows.
pub type Predicate = Box<dyn Fn(&Row) -> bool + Send + Sync>;

/// Passes through nodes and changes whose row satisfies a predicate.
///
/// `Child` changes pass with their parent: the nested change belongs to
/// a relationship, not to this stream's rows.
pub struct Filter {
    input: Box<Operator>,
    predicate: Predicate,
}

impl Filter {
    /// Creates a filter over an input.
    pub fn new(input: Box<Operator>, predicate: Predicate) -> Self {
        Self { input, predicate }
    }

    /// Pulls matching nodes from the input.
    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        let predicate = &self.predicate;
        self.input
            .fetch(req)
            .into_iter()
            .filter(|n| predicate(n.row()))
            .collect()
    }

    /// Cleans up the input, yielding the matching subset.
    pub fn cleanup(&mut self, req: &FetchRequest) -> Vec<Node> {
        let predicate = &self.predicate;
        self.input
            .cleanup(req)
            .into_iter()
            .filter(|n| predicate(n.row()))
            .collect()
    }

    /// Pushes a change through, dropping output for non-matching rows.
    pub fn push(&mut self, change: &SourceChange) -> Vec<Change> {
        let predicate = &self.predicate;
        self.input
            .push(change)
            .into_iter()
            .filter(|c| predicate(c.node().row()))
            .collect()
    }
}
