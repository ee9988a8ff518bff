//! Tidemark Poke - the poke wire format and its dispatcher.
//!
//! A poke is the server-to-client message that advances a client from one
//! cookie to a later one: the envelope
//! `["poke", {requestID, pokes: [{baseCookie, cookie,
//! lastMutationIDChanges, patch, timestamp}]}]` with `put`/`del` patch
//! operations inside.
//!
//! The dispatcher serializes a frame's pokes for many clients. Most
//! clients of a room see the same committed rows, so their patch arrays
//! are shared; each distinct patch is serialized exactly once and spliced
//! into every envelope that references it. Patch payloads dominate poke
//! cost under load, which makes the splice a required property of the
//! dispatcher, not an optimization.

mod dispatch;
mod types;

pub use dispatch::{serialize_pokes, DispatchBatch, OutboundPoke};
pub use types::{envelope_json, PatchOp, Poke, PokeBody};
