//! Queued client mutations.

use crate::client::ClientId;
use tidemark_core::Value;

/// A queued, not-yet-applied client mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingMutation {
    /// The submitting client.
    pub client_id: ClientId,
    /// The client's declared group.
    pub client_group_id: String,
    /// Per-client id; must apply in strictly ascending order.
    pub mutation_id: u64,
    /// Registered mutator name.
    pub name: String,
    /// Mutator arguments.
    pub args: Value,
    /// Client-observed timestamp, milliseconds.
    pub timestamp: f64,
}

impl PendingMutation {
    /// Creates a pending mutation.
    pub fn new(
        client_id: impl Into<ClientId>,
        client_group_id: impl Into<String>,
        mutation_id: u64,
        name: impl Into<String>,
        args: Value,
        timestamp: f64,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_group_id: client_group_id.into(),
            mutation_id,
            name: name.into(),
            args,
            timestamp,
        }
    }
}

/// One incoming push: a batch of mutations declared under one group.
///
/// A push is all-or-nothing at intake: any group inconsistency rejects
/// the whole batch before anything is queued.
#[derive(Clone, Debug, PartialEq)]
pub struct Push {
    /// The group every mutation in the batch must belong to.
    pub client_group_id: String,
    /// The mutations, in client submission order.
    pub mutations: Vec<PendingMutation>,
}

impl Push {
    /// Creates a push.
    pub fn new(client_group_id: impl Into<String>, mutations: Vec<PendingMutation>) -> Self {
        Self {
            client_group_id: client_group_id.into(),
            mutations,
        }
    }
}
