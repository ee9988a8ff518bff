//! Poke fan-out with patch deduplication.

use crate::types::{Poke, PokeBody};
use hashbrown::HashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::rc::Rc;
use tidemark_core::Version;

/// One client's poke, addressed and correlated.
#[derive(Clone, Debug)]
pub struct OutboundPoke {
    /// The client the poke goes to.
    pub client_id: String,
    /// The client's request correlation id.
    pub request_id: String,
    /// The poke itself.
    pub poke: Poke,
}

/// The serialized frame output.
#[derive(Debug)]
pub struct DispatchBatch {
    /// (client id, serialized envelope) pairs, in input order.
    pub messages: Vec<(String, String)>,
    /// How many distinct patch arrays were actually serialized.
    pub distinct_patches: usize,
}

/// The non-patch head of a poke, serialized per client.
#[derive(Serialize)]
struct PokeMeta<'a> {
    #[serde(rename = "baseCookie")]
    base_cookie: &'a Option<Version>,
    cookie: &'a Version,
    #[serde(rename = "lastMutationIDChanges")]
    last_mutation_id_changes: &'a BTreeMap<String, u64>,
}

/// Serializes one frame's pokes.
///
/// With a single client the envelope is serialized directly. With many,
/// each distinct patch array (by shared-pointer identity) is serialized
/// once, and the resulting string is spliced into every client's
/// envelope by concatenation instead of re-serializing the patch per
/// client. The spliced output is byte-identical to direct serialization.
pub fn serialize_pokes(outgoing: &[OutboundPoke]) -> serde_json::Result<DispatchBatch> {
    if outgoing.is_empty() {
        return Ok(DispatchBatch {
            messages: Vec::new(),
            distinct_patches: 0,
        });
    }
    if let [single] = outgoing {
        let json = serde_json::to_string(&(
            "poke",
            PokeBody {
                request_id: &single.request_id,
                pokes: std::slice::from_ref(&single.poke),
            },
        ))?;
        return Ok(DispatchBatch {
            messages: vec![(single.client_id.clone(), json)],
            distinct_patches: 1,
        });
    }

    let mut patch_cache: HashMap<*const u8, String> = HashMap::new();
    let mut messages = Vec::with_capacity(outgoing.len());
    for out in outgoing {
        let identity = Rc::as_ptr(&out.poke.patch).cast::<u8>();
        if !patch_cache.contains_key(&identity) {
            let json = serde_json::to_string(out.poke.patch.as_slice())?;
            patch_cache.insert(identity, json);
        }
        let patch_json = &patch_cache[&identity];

        let meta = serde_json::to_string(&PokeMeta {
            base_cookie: &out.poke.base_cookie,
            cookie: &out.poke.cookie,
            last_mutation_id_changes: &out.poke.last_mutation_id_changes,
        })?;
        let timestamp = serde_json::to_string(&out.poke.timestamp)?;
        let request_id = serde_json::to_string(&out.request_id)?;

        // Splice: meta without its closing brace, then patch + timestamp.
        let mut envelope = String::with_capacity(
            meta.len() + patch_json.len() + timestamp.len() + request_id.len() + 48,
        );
        envelope.push_str("[\"poke\",{\"requestID\":");
        envelope.push_str(&request_id);
        envelope.push_str(",\"pokes\":[");
        envelope.push_str(&meta[..meta.len() - 1]);
        envelope.push_str(",\"patch\":");
        envelope.push_str(patch_json);
        envelope.push_str(",\"timestamp\":");
        envelope.push_str(&timestamp);
        envelope.push_str("}]}]");
        messages.push((out.client_id.clone(), envelope));
    }

    Ok(DispatchBatch {
        messages,
        distinct_patches: patch_cache.len(),
    })
}
