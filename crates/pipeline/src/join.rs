//! Join operator: one-to-many relationship materialization.

use crate::keys;
use crate::operator::{FetchRequest, Operator, SourceChange};
use crate::storage::ScopedStorage;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use tidemark_core::{Change, Node, Row, Value};

/// Configuration for a Join operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinOptions {
    /// Parent column the relationship is keyed by.
    pub parent_key: String,
    /// Child column that references the parent key.
    pub child_key: String,
    /// Relationship name children are materialized under.
    pub relationship: String,
    /// Parent primary key columns, in order.
    pub parent_primary_key: Vec<String>,
}

impl JoinOptions {
    /// Creates join options.
    pub fn new(
        parent_key: impl Into<String>,
        child_key: impl Into<String>,
        relationship: impl Into<String>,
        parent_primary_key: &[&str],
    ) -> Self {
        Self {
            parent_key: parent_key.into(),
            child_key: child_key.into(),
            relationship: relationship.into(),
            parent_primary_key: parent_primary_key.iter().map(|c| (*c).into()).collect(),
        }
    }
}

/// Materializes a one-to-many relationship between a parent stream and a
/// child stream keyed by `parent_key = child_key`.
///
/// A per-parent primary-key set in storage records which parents this
/// join has observed. Child pushes that match a parent not in the set are
/// ignored rather than producing a spurious update, so dangling
/// references are tolerated. Key-set keys are derived deterministically
/// from the ordered primary key tuple: identical tuples map to one
/// entry, distinct tuples never collide.
pub struct Join {
    parent: Box<Operator>,
    child: Box<Operator>,
    options: JoinOptions,
    storage: ScopedStorage,
}

impl Join {
    /// Creates a join over a parent and a child input.
    pub fn new(
        parent: Box<Operator>,
        child: Box<Operator>,
        options: JoinOptions,
        storage: ScopedStorage,
    ) -> Self {
        Self {
            parent,
            child,
            options,
            storage,
        }
    }

    fn join_value(&self, parent_row: &Row) -> Value {
        parent_row
            .get(&self.options.parent_key)
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn key_set_key(&self, join_value: &Value, parent_row: &Row) -> String {
        let mut key = keys::encode_value(join_value);
        key.push_str(&keys::encode_row_key(
            parent_row,
            &self.options.parent_primary_key,
        ));
        key
    }

    fn children_request(&self, join_value: &Value) -> FetchRequest {
        FetchRequest::all().with_constraint(self.options.child_key.clone(), join_value.clone())
    }

    /// Pulls parents with their relationship materialized, recording each
    /// parent in the key set.
    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        let parents = self.parent.fetch(req);
        let mut out = Vec::new();
        for mut parent in parents {
            let join_value = self.join_value(parent.row());
            let children = self.child.fetch(&self.children_request(&join_value));
            self.storage
                .set_flag(&self.key_set_key(&join_value, parent.row()));
            parent.set_relationship(self.options.relationship.clone(), children);
            out.push(parent);
        }
        out
    }

    /// Cleans up both sides, forgetting each yielded parent.
    pub fn cleanup(&mut self, req: &FetchRequest) -> Vec<Node> {
        let parents = self.parent.cleanup(req);
        let mut out = Vec::new();
        for mut parent in parents {
            let join_value = self.join_value(parent.row());
            let children = self.child.cleanup(&self.children_request(&join_value));
            self.storage
                .del_flag(&self.key_set_key(&join_value, parent.row()));
            parent.set_relationship(self.options.relationship.clone(), children);
            out.push(parent);
        }
        out
    }

    /// Pushes a source change through both sides.
    pub fn push(&mut self, change: &SourceChange) -> Vec<Change> {
        let mut out = Vec::new();

        for ch in self.parent.push(change) {
            match ch {
                Change::Add { mut node } => {
                    let join_value = self.join_value(node.row());
                    let children = self.child.fetch(&self.children_request(&join_value));
                    self.storage
                        .set_flag(&self.key_set_key(&join_value, node.row()));
                    node.set_relationship(self.options.relationship.clone(), children);
                    out.push(Change::add(node));
                }
                Change::Remove { mut node } => {
                    let join_value = self.join_value(node.row());
                    let children = self.child.fetch(&self.children_request(&join_value));
                    self.storage
                        .del_flag(&self.key_set_key(&join_value, node.row()));
                    node.set_relationship(self.options.relationship.clone(), children);
                    out.push(Change::remove(node));
                }
                ch @ Change::Child { .. } => out.push(ch),
            }
        }

        for ch in self.child.push(change) {
            let join_value = ch
                .node()
                .row()
                .get(&self.options.child_key)
                .cloned()
                .unwrap_or(Value::Null);
            let request = FetchRequest::all()
                .with_constraint(self.options.parent_key.clone(), join_value.clone());
            for parent in self.parent.fetch(&request) {
                if self
                    .storage
                    .has_flag(&self.key_set_key(&join_value, parent.row()))
                {
                    out.push(Change::child(
                        parent,
                        self.options.relationship.clone(),
                        ch.clone(),
                    ));
                }
                // Parents this join has not observed are skipped: the
                // child reference is dangling from our point of view.
            }
        }

        out
    }
}
