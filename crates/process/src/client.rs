//! Per-client sync bookkeeping.

use std::collections::BTreeMap;
use tidemark_core::{Error, Result};

/// Client identifier.
pub type ClientId = String;

/// One client's sync state.
///
/// Created on first contact, never deleted here (garbage collection is
/// out-of-band). `last_mutation_id` is monotonically non-decreasing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientRecord {
    /// The client group this client belongs to.
    pub client_group_id: String,
    /// Commit sequence of the last poke the client acked; None before the
    /// first poke.
    pub base_cookie: Option<u64>,
    /// Last applied mutation id.
    pub last_mutation_id: u64,
    /// Commit sequence at which `last_mutation_id` last advanced.
    pub last_mutation_id_version: u64,
}

impl ClientRecord {
    /// Creates a fresh record for a client in a group.
    pub fn new(client_group_id: impl Into<String>) -> Self {
        Self {
            client_group_id: client_group_id.into(),
            base_cookie: None,
            last_mutation_id: 0,
            last_mutation_id_version: 0,
        }
    }
}

/// The set of client records for one room.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    records: BTreeMap<ClientId, ClientRecord>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a client's record.
    pub fn get(&self, client_id: &str) -> Option<&ClientRecord> {
        self.records.get(client_id)
    }

    /// Looks up a client's record mutably.
    pub fn get_mut(&mut self, client_id: &str) -> Option<&mut ClientRecord> {
        self.records.get_mut(client_id)
    }

    /// Returns the record for a client, creating it on first contact.
    ///
    /// Fails with `ClientGroupMismatch` if the client already has a
    /// record in a different group.
    pub fn ensure(
        &mut self,
        client_id: &str,
        client_group_id: &str,
    ) -> Result<&mut ClientRecord> {
        if let Some(record) = self.records.get(client_id) {
            if record.client_group_id != client_group_id {
                return Err(Error::client_group_mismatch(
                    client_id,
                    record.client_group_id.clone(),
                    client_group_id,
                ));
            }
        }
        Ok(self
            .records
            .entry(client_id.to_string())
            .or_insert_with(|| ClientRecord::new(client_group_id)))
    }

    /// Checks a client's declared group against its record, if any.
    pub fn check_group(&self, client_id: &str, client_group_id: &str) -> Result<()> {
        match self.records.get(client_id) {
            Some(record) if record.client_group_id != client_group_id => {
                Err(Error::client_group_mismatch(
                    client_id,
                    record.client_group_id.clone(),
                    client_group_id,
                ))
            }
            _ => Ok(()),
        }
    }

    /// Iterates records in client-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &ClientRecord)> {
        self.records.iter()
    }

    /// Number of known clients.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no client has been seen.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
