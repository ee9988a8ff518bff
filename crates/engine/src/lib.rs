//! Tidemark Engine - per-room orchestration.
//!
//! A `RoomEngine` is the single logical actor for one room: it owns the
//! room's store, its mutation processor, its materialized queries, and
//! the sinks of every attached client. Different rooms share nothing and
//! run fully in parallel.
//!
//! One `step(now)` runs one frame: drain the queued pushes through the
//! processor, feed the committed row changes to the materialized query
//! pipelines, serialize the frame's pokes (deduplicating shared patches),
//! and hand each client's envelope to its sink. Transport framing is not
//! this crate's business; the `ClientSink` trait is the whole seam.

mod engine;
mod query;
mod sink;

pub use engine::RoomEngine;
pub use query::{row_from_entry, MaterializedQuery};
pub use sink::ClientSink;
