//! Change events flowing through the operator tree.
//!
//! A `Change` is the tagged delta event every operator consumes and
//! produces. It is a closed union matched exhaustively everywhere; new
//! kinds are added here, never via downcasting.

use crate::node::Node;
use alloc::boxed::Box;
use alloc::string::String;

/// A single delta event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    /// A node entered the result.
    Add {
        /// The node that was added.
        node: Node,
    },
    /// A node left the result.
    Remove {
        /// The node that was removed.
        node: Node,
    },
    /// A change happened inside one of a node's relationships.
    Child {
        /// The parent node the nested change is scoped under.
        node: Node,
        /// The relationship name the nested change belongs to.
        relationship: String,
        /// The nested change, itself any kind of `Change`.
        change: Box<Change>,
    },
}

impl Change {
    /// Creates an add change.
    pub fn add(node: Node) -> Self {
        Change::Add { node }
    }

    /// Creates a remove change.
    pub fn remove(node: Node) -> Self {
        Change::Remove { node }
    }

    /// Creates a child change scoped under a parent's relationship.
    pub fn child(node: Node, relationship: impl Into<String>, change: Change) -> Self {
        Change::Child {
            node,
            relationship: relationship.into(),
            change: Box::new(change),
        }
    }

    /// Returns true if this is an add.
    #[inline]
    pub fn is_add(&self) -> bool {
        matches!(self, Change::Add { .. })
    }

    /// Returns true if this is a remove.
    #[inline]
    pub fn is_remove(&self) -> bool {
        matches!(self, Change::Remove { .. })
    }

    /// Returns true if this is a child change.
    #[inline]
    pub fn is_child(&self) -> bool {
        matches!(self, Change::Child { .. })
    }

    /// Returns the node this change applies to.
    ///
    /// For a child change this is the parent node the nested change is
    /// scoped under.
    pub fn node(&self) -> &Node {
        match self {
            Change::Add { node } => node,
            Change::Remove { node } => node,
            Change::Child { node, .. } => node,
        }
    }
}
