//! Poke wire types.
//!
//! The field names and envelope shape here are what clients parse; they
//! must stay byte-compatible.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;
use tidemark_core::{Value, Version};

/// One patch operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Sets a key to a value.
    Put {
        key: String,
        value: Value,
    },
    /// Removes a key.
    Del {
        key: String,
    },
}

impl PatchOp {
    /// Creates a put operation.
    pub fn put(key: impl Into<String>, value: Value) -> Self {
        PatchOp::Put {
            key: key.into(),
            value,
        }
    }

    /// Creates a del operation.
    pub fn del(key: impl Into<String>) -> Self {
        PatchOp::Del { key: key.into() }
    }
}

/// The diff sent to one client for one frame.
///
/// `patch` is shared: clients with the same base cookie reference the
/// same array, which is what the dispatcher dedups on.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Poke {
    /// The client's last acked version; None for a client with no state.
    #[serde(rename = "baseCookie")]
    pub base_cookie: Option<Version>,
    /// The version this poke advances the client to.
    pub cookie: Version,
    /// Mutation ids that advanced, for clients sharing this client's group.
    #[serde(rename = "lastMutationIDChanges")]
    pub last_mutation_id_changes: BTreeMap<String, u64>,
    /// Ordered put/del operations; empty iff nothing visible changed.
    pub patch: Rc<Vec<PatchOp>>,
    /// Frame timestamp, milliseconds.
    pub timestamp: f64,
}

/// The envelope body: a request correlation id plus the pokes.
#[derive(Debug, Serialize)]
pub struct PokeBody<'a> {
    /// Correlation id of the connection request this poke answers.
    #[serde(rename = "requestID")]
    pub request_id: &'a str,
    /// The pokes, in order.
    pub pokes: &'a [Poke],
}

/// Serializes the full `["poke", {...}]` envelope directly.
pub fn envelope_json(request_id: &str, pokes: &[Poke]) -> serde_json::Result<String> {
    serde_json::to_string(&("poke", PokeBody { request_id, pokes }))
}
