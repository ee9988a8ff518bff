//! Server-side materialized queries.
//!
//! A materialized query keeps an operator pipeline's current result list
//! up to date by applying the changes the pipeline emits for each frame's
//! row changes.

use tidemark_core::{Change, Node, Row, Value};
use tidemark_pipeline::{FetchRequest, Operator, SourceChange};

/// Builds the pipeline row for one store entry.
///
/// Object values become rows directly, with the store key injected as
/// `id` when the object lacks one; scalar values become `{id, value}`
/// rows.
pub fn row_from_entry(key: &str, value: &Value) -> Row {
    match value {
        Value::Object(entries) => {
            let mut row = Row::from_pairs(entries.clone());
            if !row.contains("id") {
                row.set("id", Value::String(key.into()));
            }
            row
        }
        other => Row::from_pairs([
            ("id", Value::String(key.into())),
            ("value", other.clone()),
        ]),
    }
}

/// An operator pipeline plus its maintained result list.
pub struct MaterializedQuery {
    name: String,
    root: Operator,
    results: Vec<Node>,
}

impl MaterializedQuery {
    /// Creates a query and hydrates its initial result.
    pub fn new(name: impl Into<String>, mut root: Operator) -> Self {
        let results = root.fetch(&FetchRequest::all());
        Self {
            name: name.into(),
            root,
            results,
        }
    }

    /// The query name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current result list.
    pub fn results(&self) -> &[Node] {
        &self.results
    }

    /// Pushes one row change through the pipeline and applies whatever
    /// falls out to the result list. Returns how many output changes the
    /// pipeline emitted.
    pub fn push_source(&mut self, change: &SourceChange) -> usize {
        let changes = self.root.push(change);
        let count = changes.len();
        for change in changes {
            self.apply(change);
        }
        count
    }

    fn apply(&mut self, change: Change) {
        match change {
            Change::Add { node } => self.results.push(node),
            Change::Remove { node } => {
                self.results.retain(|n| n.row() != node.row());
            }
            Change::Child {
                node,
                relationship,
                change,
            } => {
                if let Some(target) = self.results.iter_mut().find(|n| n.row() == node.row()) {
                    apply_child(target, &relationship, *change);
                }
            }
        }
    }
}

fn apply_child(parent: &mut Node, relationship: &str, change: Change) {
    match change {
        Change::Add { node } => parent.push_related(relationship, node),
        Change::Remove { node } => {
            parent.remove_related(relationship, node.row());
        }
        Change::Child {
            node,
            relationship: nested_relationship,
            change,
        } => {
            // Walk one level down and recurse.
            let children: Vec<Node> = parent.relationship(relationship).to_vec();
            let mut children = children;
            if let Some(target) = children.iter_mut().find(|n| n.row() == node.row()) {
                apply_child(target, &nested_relationship, *change);
            }
            parent.set_relationship(relationship, children);
        }
    }
}
