//! Tidemark Process - mutation processing for the Tidemark sync engine.
//!
//! This crate turns queued client mutations into committed store writes
//! and per-client pokes, one frame at a time:
//!
//! - `ClientRecord` / `ClientRegistry`: per-client sync bookkeeping
//!   (group, last acked cookie, last applied mutation id)
//! - `PendingMutation` / `Push`: queued, not-yet-applied client mutations
//! - `BufferSizer`: the adaptive window that withholds mutations arriving
//!   with timestamps newer than the engine trusts
//! - `MutationProcessor`: applies each frame's mutations transactionally
//!   in strict per-client id order, runs disconnect handlers with scoped
//!   rollback, and assembles one poke per connected client
//!
//! Mutations are exactly-once: a client's record advances atomically with
//! the data its mutator wrote, and a mutation id that is not the next
//! expected one is fatal to that client's connection without touching any
//! other client in the frame.

mod buffer;
mod client;
mod mutation;
mod processor;

pub use buffer::{BufferOptions, BufferSizer};
pub use client::{ClientId, ClientRecord, ClientRegistry};
pub use mutation::{PendingMutation, Push};
pub use processor::{
    ClientError, ClientPoke, DisconnectHandler, FrameOutput, MutationProcessor, Mutator,
    CLIENTS_TABLE,
};
