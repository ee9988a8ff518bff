//! The frame processor.
//!
//! One frame: drain the pending-mutation queue, apply every runnable
//! mutation transactionally in strict per-client id order, run disconnect
//! bookkeeping, and assemble one poke per connected client.

use crate::buffer::{BufferOptions, BufferSizer};
use crate::client::{ClientId, ClientRegistry};
use crate::mutation::{PendingMutation, Push};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use tidemark_core::{Error, Result, Value, Version};
use tidemark_poke::{PatchOp, Poke};
use tidemark_replica::{SharedStore, WriteTx};
use tracing::{debug, error, warn};

/// System table holding durable client records. System tables (leading
/// underscore) never appear in client patches.
pub const CLIENTS_TABLE: &str = "_clients";

/// A named mutator: runs once per queued mutation inside its transaction.
pub type Mutator = Box<dyn Fn(&mut WriteTx, &Value) -> Result<()>>;

/// Disconnect callback, given a write handle scoped to one parting client.
pub type DisconnectHandler = Box<dyn Fn(&mut WriteTx, &str) -> Result<()>>;

/// A fatal per-connection failure; the transport closes the socket with
/// the error's description.
#[derive(Debug, PartialEq, Eq)]
pub struct ClientError {
    /// The client whose connection is done.
    pub client_id: ClientId,
    /// Why.
    pub error: Error,
}

/// One client's poke for the frame.
#[derive(Clone, Debug)]
pub struct ClientPoke {
    /// The client the poke belongs to.
    pub client_id: ClientId,
    /// The poke.
    pub poke: Poke,
}

/// Everything one frame produced.
#[derive(Debug)]
pub struct FrameOutput {
    /// One poke per connected client, in client-id order.
    pub pokes: Vec<ClientPoke>,
    /// Connections to close, with reasons.
    pub errors: Vec<ClientError>,
    /// Mutations withheld to a later frame by the timestamp buffer.
    pub deferred: usize,
    /// The store version after the frame.
    pub version: Version,
}

/// Applies frames of mutations for one room.
pub struct MutationProcessor {
    store: SharedStore,
    registry: ClientRegistry,
    mutators: BTreeMap<String, Mutator>,
    disconnect_handler: Option<DisconnectHandler>,
    queue: Vec<PendingMutation>,
    connected: BTreeSet<ClientId>,
    buffer: BufferSizer,
}

impl MutationProcessor {
    /// Creates a processor over a store with default buffering.
    pub fn new(store: SharedStore) -> Self {
        Self::with_buffer(store, BufferOptions::default())
    }

    /// Creates a processor with explicit buffer options.
    pub fn with_buffer(store: SharedStore, options: BufferOptions) -> Self {
        Self {
            store,
            registry: ClientRegistry::new(),
            mutators: BTreeMap::new(),
            disconnect_handler: None,
            queue: Vec::new(),
            connected: BTreeSet::new(),
            buffer: BufferSizer::new(options),
        }
    }

    /// Registers a named mutator.
    pub fn register_mutator<F>(&mut self, name: impl Into<String>, mutator: F)
    where
        F: Fn(&mut WriteTx, &Value) -> Result<()> + 'static,
    {
        self.mutators.insert(name.into(), Box::new(mutator));
    }

    /// Sets the disconnect callback.
    pub fn set_disconnect_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut WriteTx, &str) -> Result<()> + 'static,
    {
        self.disconnect_handler = Some(Box::new(handler));
    }

    /// The client registry.
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// The adaptive buffer controller.
    pub fn buffer(&self) -> &BufferSizer {
        &self.buffer
    }

    /// Number of queued mutations.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Registers a (re)connecting client and its last acked cookie.
    ///
    /// Fails with `ClientGroupMismatch` if the client is recorded under a
    /// different group.
    pub fn connect_client(
        &mut self,
        client_id: &str,
        client_group_id: &str,
        base_cookie: Option<&Version>,
    ) -> Result<()> {
        let record = self.registry.ensure(client_id, client_group_id)?;
        record.base_cookie = base_cookie.and_then(Version::seq);
        Ok(())
    }

    /// Queues an incoming push.
    ///
    /// All-or-nothing: a group inconsistency anywhere in the batch,
    /// against either the push's declared group or a client's recorded
    /// one, rejects the entire push before any mutation is queued.
    pub fn enqueue_push(&mut self, push: Push) -> Result<()> {
        for m in &push.mutations {
            if m.client_group_id != push.client_group_id {
                return Err(Error::client_group_mismatch(
                    m.client_id.clone(),
                    push.client_group_id.clone(),
                    m.client_group_id.clone(),
                ));
            }
            self.registry.check_group(&m.client_id, &m.client_group_id)?;
        }
        self.queue.extend(push.mutations);
        Ok(())
    }

    /// Processes one frame.
    ///
    /// `connected` is the transport's current view of attached clients;
    /// `now` is the frame timestamp in milliseconds.
    pub fn process_frame(
        &mut self,
        connected: &BTreeSet<ClientId>,
        now: f64,
    ) -> Result<FrameOutput> {
        let mut errors = Vec::new();

        // Group the queue per client, ids ascending.
        let mut per_client: BTreeMap<ClientId, Vec<PendingMutation>> = BTreeMap::new();
        for m in std::mem::take(&mut self.queue) {
            per_client.entry(m.client_id.clone()).or_default().push(m);
        }
        for list in per_client.values_mut() {
            list.sort_by_key(|m| m.mutation_id);
        }

        // Withhold mutations newer than the buffer window trusts. Later
        // ids of the same client are held with them: applying them first
        // would break id ordering.
        let threshold = now - self.buffer.window_ms();
        let mut deferred: Vec<PendingMutation> = Vec::new();
        let mut had_miss = false;
        for list in per_client.values_mut() {
            if let Some(cut) = list.iter().position(|m| m.timestamp > threshold) {
                let held: Vec<PendingMutation> = list.drain(cut..).collect();
                if held.iter().skip(1).any(|m| m.timestamp <= threshold) {
                    had_miss = true;
                    self.buffer.record_miss();
                }
                deferred.extend(held);
            }
        }

        // Validate every client's sequence before applying any of it: a
        // gap or duplicate rejects that client's whole batch.
        let mut runnable: Vec<(ClientId, Vec<PendingMutation>)> = Vec::new();
        for (client_id, list) in per_client {
            if list.is_empty() {
                continue;
            }
            match self.validate_sequence(&client_id, &list) {
                Ok(()) => runnable.push((client_id, list)),
                Err(err) => {
                    warn!(client = %client_id, %err, "rejecting client batch");
                    deferred.retain(|m| m.client_id != client_id);
                    errors.push(ClientError {
                        client_id,
                        error: err,
                    });
                }
            }
        }

        // Apply, one transaction per mutation.
        for (client_id, list) in runnable {
            for m in list {
                self.apply_mutation(&client_id, m)?;
            }
        }

        // Disconnect bookkeeping for clients that parted since last frame.
        let parted: Vec<ClientId> = self.connected.difference(connected).cloned().collect();
        for client_id in &parted {
            self.run_disconnect(client_id);
        }

        let head = self.store.borrow().seq();

        // One poke per connected client. Clients at the same base share
        // one patch allocation; the dispatcher dedups on that identity.
        // A client whose connection is being closed gets no poke: it
        // either sees a full consistent poke or nothing.
        let failed: BTreeSet<ClientId> = errors.iter().map(|e| e.client_id.clone()).collect();
        let mut patch_cache: BTreeMap<Option<u64>, Rc<Vec<PatchOp>>> = BTreeMap::new();
        let mut pokes = Vec::new();
        for client_id in connected {
            if failed.contains(client_id) {
                continue;
            }
            let (base, group) = match self.registry.get(client_id) {
                Some(record) => (record.base_cookie, record.client_group_id.clone()),
                None => {
                    warn!(client = %client_id, "connected client was never registered; no poke");
                    continue;
                }
            };
            let patch = match patch_cache.get(&base) {
                Some(shared) => shared.clone(),
                None => match self.build_patch(base, head) {
                    Ok(built) => {
                        patch_cache.insert(base, built.clone());
                        built
                    }
                    Err(Error::ResetRequired) => {
                        errors.push(ClientError {
                            client_id: client_id.clone(),
                            error: Error::ResetRequired,
                        });
                        continue;
                    }
                    Err(err) => return Err(err),
                },
            };
            let last_mutation_id_changes = self
                .registry
                .iter()
                .filter(|(_, r)| r.client_group_id == group)
                .filter(|(_, r)| match base {
                    Some(b) => r.last_mutation_id_version > b,
                    None => r.last_mutation_id > 0,
                })
                .map(|(id, r)| (id.clone(), r.last_mutation_id))
                .collect();
            pokes.push(ClientPoke {
                client_id: client_id.clone(),
                poke: Poke {
                    base_cookie: base.map(Version::from_seq),
                    cookie: Version::from_seq(head),
                    last_mutation_id_changes,
                    patch,
                    timestamp: now,
                },
            });
            if let Some(record) = self.registry.get_mut(client_id) {
                record.base_cookie = Some(head);
            }
        }

        self.queue = deferred;
        self.buffer.record_frame(had_miss);
        self.connected = connected.clone();
        debug!(
            version = head,
            pokes = pokes.len(),
            errors = errors.len(),
            deferred = self.queue.len(),
            "frame processed"
        );
        Ok(FrameOutput {
            pokes,
            errors,
            deferred: self.queue.len(),
            version: Version::from_seq(head),
        })
    }

    fn validate_sequence(&mut self, client_id: &str, list: &[PendingMutation]) -> Result<()> {
        let record = self
            .registry
            .ensure(client_id, &list[0].client_group_id)?;
        let mut expected = record.last_mutation_id + 1;
        for m in list {
            if m.client_group_id != record.client_group_id {
                return Err(Error::client_group_mismatch(
                    client_id,
                    record.client_group_id.clone(),
                    m.client_group_id.clone(),
                ));
            }
            if m.mutation_id != expected {
                return Err(Error::unexpected_mutation_id(
                    client_id,
                    expected,
                    m.mutation_id,
                ));
            }
            expected += 1;
        }
        Ok(())
    }

    fn apply_mutation(&mut self, client_id: &str, m: PendingMutation) -> Result<()> {
        let mut tx = WriteTx::begin(self.store.clone());
        let outcome = match self.mutators.get(&m.name) {
            Some(mutator) => mutator(&mut tx, &m.args),
            None => Err(Error::unknown_mutator(&m.name)),
        };
        if let Err(err) = outcome {
            // The mutation is consumed either way; only its data writes
            // are rolled back.
            warn!(
                client = %client_id,
                mutation = m.mutation_id,
                name = %m.name,
                %err,
                "mutator failed; its writes are rolled back"
            );
            tx.rollback();
            tx = WriteTx::begin(self.store.clone());
        }

        let group = {
            let record = self
                .registry
                .get_mut(client_id)
                .ok_or_else(|| Error::invalid_operation("client record missing"))?;
            record.last_mutation_id = m.mutation_id;
            record.client_group_id.clone()
        };
        tx.put(
            CLIENTS_TABLE,
            client_id,
            client_record_value(&group, m.mutation_id),
        );
        let version = tx.commit()?;
        if let Some(record) = self.registry.get_mut(client_id) {
            record.last_mutation_id_version = version.seq().unwrap_or(0);
        }
        Ok(())
    }

    fn run_disconnect(&mut self, client_id: &str) {
        let Some(handler) = &self.disconnect_handler else {
            return;
        };
        let mut tx = WriteTx::begin(self.store.clone());
        match handler(&mut tx, client_id) {
            Ok(()) => {
                if let Err(err) = tx.commit() {
                    error!(client = %client_id, %err, "disconnect commit failed");
                }
            }
            Err(err) => {
                // Scoped: this client's disconnect writes roll back, the
                // rest of the frame continues.
                error!(client = %client_id, %err, "disconnect handler failed; writes rolled back");
                tx.rollback();
            }
        }
    }

    fn build_patch(&self, base: Option<u64>, head: u64) -> Result<Rc<Vec<PatchOp>>> {
        let store = self.store.borrow();
        let mut ops = Vec::new();
        match base {
            Some(b) if b >= head => {}
            Some(b) => {
                for (table, keys) in store.coalesced_changes(b, head)? {
                    if table.starts_with('_') {
                        continue;
                    }
                    for (key, (_, next)) in keys {
                        match next {
                            Some(value) => ops.push(PatchOp::put(key, value)),
                            None => ops.push(PatchOp::del(key)),
                        }
                    }
                }
            }
            None => {
                // Fast-forward: the client has no state at all.
                for table in store.tables() {
                    if table.starts_with('_') {
                        continue;
                    }
                    for (key, value) in store.scan(&table, ..) {
                        ops.push(PatchOp::put(key, value));
                    }
                }
            }
        }
        Ok(Rc::new(ops))
    }
}

fn client_record_value(client_group_id: &str, last_mutation_id: u64) -> Value {
    Value::Object(BTreeMap::from([
        (
            "clientGroupID".to_string(),
            Value::String(client_group_id.to_string()),
        ),
        (
            "lastMutationID".to_string(),
            Value::Int64(last_mutation_id as i64),
        ),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_replica::ReplicaStore;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    /// Mutator applying `{"put": {key: value, ..}, "del": [key, ..]}`
    /// against the "entries" table.
    fn apply_args(tx: &mut WriteTx, args: &Value) -> Result<()> {
        let entries = args
            .as_object()
            .ok_or_else(|| Error::invalid_operation("args must be an object"))?;
        if let Some(Value::Object(puts)) = entries.get("put") {
            for (key, value) in puts {
                tx.put("entries", key, value.clone());
            }
        }
        if let Some(Value::Array(dels)) = entries.get("del") {
            for key in dels {
                if let Some(key) = key.as_str() {
                    tx.del("entries", key);
                }
            }
        }
        Ok(())
    }

    fn processor(store: &SharedStore) -> MutationProcessor {
        let mut p = MutationProcessor::new(store.clone());
        p.register_mutator("apply", apply_args);
        p.register_mutator("fail", |tx, _| {
            tx.put("entries", "leak", Value::Bool(true));
            Err(Error::invalid_operation("mutator exploded"))
        });
        p
    }

    fn mutation(client: &str, id: u64, args: Value) -> PendingMutation {
        PendingMutation::new(client, "g1", id, "apply", args, 0.0)
    }

    fn put_args(key: &str, value: &str) -> Value {
        obj(&[("put", obj(&[(key, Value::String(value.into()))]))])
    }

    fn connected(ids: &[&str]) -> BTreeSet<ClientId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    /// Commits a throwaway write on a system table, advancing the store
    /// version without touching client-visible data.
    fn bump(store: &SharedStore) {
        let mut tx = WriteTx::begin(store.clone());
        tx.put("_boot", "tick", Value::Null);
        tx.commit().unwrap();
    }

    #[test]
    fn test_mutations_apply_in_order() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.connect_client("c1", "g1", None).unwrap();

        p.enqueue_push(Push::new(
            "g1",
            vec![
                mutation("c1", 1, put_args("a", "1")),
                mutation("c1", 2, put_args("b", "2")),
            ],
        ))
        .unwrap();
        let out = p.process_frame(&connected(&["c1"]), 100.0).unwrap();
        assert!(out.errors.is_empty());
        assert_eq!(p.registry().get("c1").unwrap().last_mutation_id, 2);

        // Ids [3, 4] continue the sequence.
        p.enqueue_push(Push::new(
            "g1",
            vec![
                mutation("c1", 3, put_args("c", "3")),
                mutation("c1", 4, put_args("d", "4")),
            ],
        ))
        .unwrap();
        let out = p.process_frame(&connected(&["c1"]), 200.0).unwrap();
        assert!(out.errors.is_empty());
        assert_eq!(p.registry().get("c1").unwrap().last_mutation_id, 4);
        assert_eq!(
            store.borrow().get("entries", "d"),
            Some(&Value::String("4".into()))
        );
    }

    #[test]
    fn test_mutation_id_gap_is_fatal_for_that_client_only() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.connect_client("c1", "g1", None).unwrap();
        p.connect_client("c2", "g1", None).unwrap();

        // c1 skips an id; c2 is fine in the same frame.
        p.enqueue_push(Push::new(
            "g1",
            vec![
                mutation("c1", 1, put_args("a", "1")),
                mutation("c1", 3, put_args("b", "2")),
                mutation("c2", 1, put_args("x", "9")),
            ],
        ))
        .unwrap();
        let out = p.process_frame(&connected(&["c1", "c2"]), 100.0).unwrap();

        assert_eq!(out.errors.len(), 1);
        assert_eq!(
            out.errors[0],
            ClientError {
                client_id: "c1".into(),
                error: Error::unexpected_mutation_id("c1", 2, 3),
            }
        );
        // None of c1's batch applied, including the valid-looking id 1.
        assert_eq!(p.registry().get("c1").unwrap().last_mutation_id, 0);
        assert_eq!(store.borrow().get("entries", "a"), None);
        // c2's mutation landed.
        assert_eq!(p.registry().get("c2").unwrap().last_mutation_id, 1);
        assert_eq!(
            store.borrow().get("entries", "x"),
            Some(&Value::String("9".into()))
        );
    }

    #[test]
    fn test_duplicate_mutation_id_is_fatal() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.connect_client("c1", "g1", None).unwrap();
        p.enqueue_push(Push::new("g1", vec![mutation("c1", 1, put_args("a", "1"))]))
            .unwrap();
        p.process_frame(&connected(&["c1"]), 100.0).unwrap();

        p.enqueue_push(Push::new("g1", vec![mutation("c1", 1, put_args("a", "2"))]))
            .unwrap();
        let out = p.process_frame(&connected(&["c1"]), 200.0).unwrap();
        assert_eq!(
            out.errors[0].error,
            Error::unexpected_mutation_id("c1", 2, 1)
        );
    }

    #[test]
    fn test_group_mismatch_rejects_push_at_intake() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.connect_client("c1", "g1", None).unwrap();

        // Recorded group differs.
        let err = p
            .enqueue_push(Push::new(
                "g2",
                vec![PendingMutation::new(
                    "c1",
                    "g2",
                    1,
                    "apply",
                    put_args("a", "1"),
                    0.0,
                )],
            ))
            .unwrap_err();
        assert_eq!(err, Error::client_group_mismatch("c1", "g1", "g2"));
        assert_eq!(p.pending(), 0);

        // Mutation group differs from the push's declared group.
        let err = p
            .enqueue_push(Push::new(
                "g1",
                vec![
                    mutation("c1", 1, put_args("a", "1")),
                    PendingMutation::new("c9", "g9", 1, "apply", put_args("b", "2"), 0.0),
                ],
            ))
            .unwrap_err();
        assert!(matches!(err, Error::ClientGroupMismatch { .. }));
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn test_poke_scenario_base_40_to_42() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);

        // Seed: 39 system commits, then "hot" lands at version 40.
        for _ in 0..39 {
            bump(&store);
        }
        let mut tx = WriteTx::begin(store.clone());
        tx.put("entries", "hot", Value::String("spicy".into()));
        tx.commit().unwrap();
        assert_eq!(store.borrow().seq(), 40);

        p.connect_client("c1", "g1", Some(&Version::from_seq(40)))
            .unwrap();
        bump(&store); // version 41, invisible to clients

        // The transaction at version 42 inserts foo and deletes hot.
        p.enqueue_push(Push::new(
            "g1",
            vec![mutation(
                "c1",
                1,
                obj(&[
                    ("put", obj(&[("foo", Value::String("bar".into()))])),
                    ("del", Value::Array(vec![Value::String("hot".into())])),
                ]),
            )],
        ))
        .unwrap();
        let out = p.process_frame(&connected(&["c1"]), 1_000.0).unwrap();

        assert_eq!(out.pokes.len(), 1);
        let poke = &out.pokes[0].poke;
        assert_eq!(poke.base_cookie, Some(Version::from_seq(40)));
        assert_eq!(poke.cookie, Version::from_seq(42));
        assert_eq!(
            *poke.patch,
            vec![
                PatchOp::put("foo", Value::String("bar".into())),
                PatchOp::del("hot"),
            ]
        );
        assert_eq!(poke.last_mutation_id_changes, BTreeMap::from([("c1".to_string(), 1)]));
    }

    #[test]
    fn test_disconnect_writes_reach_remaining_clients() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.set_disconnect_handler(|tx, client_id| {
            tx.put(
                "entries",
                &format!("disconnected:{}", client_id),
                Value::Bool(true),
            );
            Ok(())
        });
        p.connect_client("c1", "g1", None).unwrap();
        p.connect_client("c2", "g1", None).unwrap();
        p.process_frame(&connected(&["c1", "c2"]), 100.0).unwrap();

        // c1 drops.
        let out = p.process_frame(&connected(&["c2"]), 200.0).unwrap();
        assert_eq!(out.pokes.len(), 1);
        assert_eq!(
            *out.pokes[0].poke.patch,
            vec![PatchOp::put("disconnected:c1", Value::Bool(true))]
        );
        assert_eq!(out.version, Version::from_seq(1));
    }

    #[test]
    fn test_disconnect_handler_failure_is_scoped() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.set_disconnect_handler(|tx, client_id| {
            tx.put(
                "entries",
                &format!("disconnected:{}", client_id),
                Value::Bool(true),
            );
            Err(Error::invalid_operation("handler exploded"))
        });
        p.connect_client("c1", "g1", None).unwrap();
        p.connect_client("c2", "g1", None).unwrap();
        p.process_frame(&connected(&["c1", "c2"]), 100.0).unwrap();

        let out = p.process_frame(&connected(&["c2"]), 200.0).unwrap();
        // Neither the write nor a version bump happened.
        assert!(out.pokes[0].poke.patch.is_empty());
        assert_eq!(out.version, Version::from_seq(0));
        assert_eq!(store.borrow().get("entries", "disconnected:c1"), None);
    }

    #[test]
    fn test_failed_mutator_is_consumed_without_its_writes() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.connect_client("c1", "g1", None).unwrap();
        p.enqueue_push(Push::new(
            "g1",
            vec![PendingMutation::new("c1", "g1", 1, "fail", Value::Null, 0.0)],
        ))
        .unwrap();
        let out = p.process_frame(&connected(&["c1"]), 100.0).unwrap();

        assert!(out.errors.is_empty());
        assert_eq!(store.borrow().get("entries", "leak"), None);
        // The id is consumed and the advance is durable and versioned.
        let record = p.registry().get("c1").unwrap();
        assert_eq!(record.last_mutation_id, 1);
        assert_eq!(record.last_mutation_id_version, 1);
        assert!(store.borrow().get(CLIENTS_TABLE, "c1").is_some());
    }

    #[test]
    fn test_unknown_mutator_is_consumed() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.connect_client("c1", "g1", None).unwrap();
        p.enqueue_push(Push::new(
            "g1",
            vec![PendingMutation::new(
                "c1",
                "g1",
                1,
                "no-such-mutator",
                Value::Null,
                0.0,
            )],
        ))
        .unwrap();
        let out = p.process_frame(&connected(&["c1"]), 100.0).unwrap();
        assert!(out.errors.is_empty());
        assert_eq!(p.registry().get("c1").unwrap().last_mutation_id, 1);
    }

    #[test]
    fn test_too_new_mutations_are_deferred() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.connect_client("c1", "g1", None).unwrap();

        // Window is 250ms; at now=1000 anything newer than 750 is held.
        // Id 1 is too new, id 2 is ready but must wait behind it.
        p.enqueue_push(Push::new(
            "g1",
            vec![
                PendingMutation::new("c1", "g1", 1, "apply", put_args("a", "1"), 900.0),
                PendingMutation::new("c1", "g1", 2, "apply", put_args("b", "2"), 100.0),
            ],
        ))
        .unwrap();
        let out = p.process_frame(&connected(&["c1"]), 1_000.0).unwrap();

        assert_eq!(out.deferred, 2);
        assert!(out.errors.is_empty());
        assert_eq!(p.registry().get("c1").unwrap().last_mutation_id, 0);
        // The forced miss grew the window.
        assert_eq!(p.buffer().misses(), 1);
        assert_eq!(p.buffer().window_ms(), 500.0);

        // A later frame applies both, in order.
        let out = p.process_frame(&connected(&["c1"]), 2_000.0).unwrap();
        assert_eq!(out.deferred, 0);
        assert_eq!(p.registry().get("c1").unwrap().last_mutation_id, 2);
    }

    #[test]
    fn test_too_new_tail_defers_without_miss() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.connect_client("c1", "g1", None).unwrap();
        p.enqueue_push(Push::new(
            "g1",
            vec![
                PendingMutation::new("c1", "g1", 1, "apply", put_args("a", "1"), 100.0),
                PendingMutation::new("c1", "g1", 2, "apply", put_args("b", "2"), 990.0),
            ],
        ))
        .unwrap();
        let out = p.process_frame(&connected(&["c1"]), 1_000.0).unwrap();

        // Only the tail was held; nothing ready sat behind it.
        assert_eq!(out.deferred, 1);
        assert_eq!(p.registry().get("c1").unwrap().last_mutation_id, 1);
        assert_eq!(p.buffer().misses(), 0);
    }

    #[test]
    fn test_clients_at_same_base_share_one_patch() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.connect_client("c1", "g1", Some(&Version::from_seq(0)))
            .unwrap();
        p.connect_client("c2", "g1", Some(&Version::from_seq(0)))
            .unwrap();
        p.enqueue_push(Push::new("g1", vec![mutation("c1", 1, put_args("a", "1"))]))
            .unwrap();
        let out = p.process_frame(&connected(&["c1", "c2"]), 100.0).unwrap();

        assert_eq!(out.pokes.len(), 2);
        assert!(Rc::ptr_eq(
            &out.pokes[0].poke.patch,
            &out.pokes[1].poke.patch
        ));
        assert!(!out.pokes[0].poke.patch.is_empty());
    }

    #[test]
    fn test_fast_forward_for_client_without_base() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        let mut tx = WriteTx::begin(store.clone());
        tx.put("entries", "pre", Value::String("existing".into()));
        tx.commit().unwrap();

        p.connect_client("c1", "g1", None).unwrap();
        let out = p.process_frame(&connected(&["c1"]), 100.0).unwrap();

        assert_eq!(out.pokes[0].poke.base_cookie, None);
        assert_eq!(
            *out.pokes[0].poke.patch,
            vec![PatchOp::put("pre", Value::String("existing".into()))]
        );

        // The next frame diffs from the new base instead.
        let out = p.process_frame(&connected(&["c1"]), 200.0).unwrap();
        assert!(out.pokes[0].poke.patch.is_empty());
    }

    #[test]
    fn test_truncate_forces_client_resync() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.connect_client("c1", "g1", Some(&Version::from_seq(0)))
            .unwrap();
        p.enqueue_push(Push::new("g1", vec![mutation("c1", 1, put_args("a", "1"))]))
            .unwrap();
        p.process_frame(&connected(&["c1"]), 100.0).unwrap();

        store.borrow_mut().truncate("entries");
        let out = p.process_frame(&connected(&["c1"]), 200.0).unwrap();

        assert!(out.pokes.is_empty());
        assert_eq!(
            out.errors,
            vec![ClientError {
                client_id: "c1".into(),
                error: Error::ResetRequired,
            }]
        );
    }

    #[test]
    fn test_system_tables_never_reach_patches() {
        let store = ReplicaStore::shared();
        let mut p = processor(&store);
        p.connect_client("c1", "g1", Some(&Version::from_seq(0)))
            .unwrap();
        p.enqueue_push(Push::new("g1", vec![mutation("c1", 1, put_args("a", "1"))]))
            .unwrap();
        let out = p.process_frame(&connected(&["c1"]), 100.0).unwrap();

        // The commit also wrote the _clients record, but the patch only
        // carries the visible entry.
        assert_eq!(
            *out.pokes[0].poke.patch,
            vec![PatchOp::put("a", Value::String("1".into()))]
        );
        assert!(store.borrow().get(CLIENTS_TABLE, "c1").is_some());
    }
}
