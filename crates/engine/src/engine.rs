//! The per-room engine.

use crate::query::{row_from_entry, MaterializedQuery};
use crate::sink::ClientSink;
use std::collections::{BTreeMap, BTreeSet};
use tidemark_core::{Error, Result, Value, Version};
use tidemark_pipeline::SourceChange;
use tidemark_poke::{serialize_pokes, OutboundPoke};
use tidemark_process::{BufferOptions, ClientId, MutationProcessor, Push};
use tidemark_replica::{ReplicaStore, SharedStore, WriteTx};
use tracing::{debug, warn};

struct Connection {
    request_id: String,
    sink: Box<dyn ClientSink>,
}

/// One room's logical actor.
///
/// Owns the room's store and processor, the attached client sinks, and
/// the room's materialized queries. All mutation application, diffing,
/// and poke dispatch for the room happens through `step`, one frame at a
/// time; separate rooms share no state.
pub struct RoomEngine {
    room_id: String,
    store: SharedStore,
    processor: MutationProcessor,
    queries: Vec<MaterializedQuery>,
    connections: BTreeMap<ClientId, Connection>,
    seen_seq: u64,
}

impl RoomEngine {
    /// Creates an engine for a room with default buffering.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self::with_buffer(room_id, BufferOptions::default())
    }

    /// Creates an engine with explicit timestamp-buffer options.
    pub fn with_buffer(room_id: impl Into<String>, buffer: BufferOptions) -> Self {
        let store = ReplicaStore::shared();
        Self {
            room_id: room_id.into(),
            processor: MutationProcessor::with_buffer(store.clone(), buffer),
            store,
            queries: Vec::new(),
            connections: BTreeMap::new(),
            seen_seq: 0,
        }
    }

    /// The room id.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// A shared handle to the room's store.
    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// Begins a write transaction against the room's store.
    ///
    /// For server-side writes outside the mutation path (seeding,
    /// migrations); mutations go through `enqueue_push`.
    pub fn begin(&self) -> WriteTx {
        WriteTx::begin(self.store.clone())
    }

    /// Registers a named mutator.
    pub fn register_mutator<F>(&mut self, name: impl Into<String>, mutator: F)
    where
        F: Fn(&mut WriteTx, &Value) -> Result<()> + 'static,
    {
        self.processor.register_mutator(name, mutator);
    }

    /// Sets the disconnect callback.
    pub fn set_disconnect_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut WriteTx, &str) -> Result<()> + 'static,
    {
        self.processor.set_disconnect_handler(handler);
    }

    /// Adds a materialized query.
    pub fn add_query(&mut self, query: MaterializedQuery) {
        self.queries.push(query);
    }

    /// Looks up a materialized query by name.
    pub fn query(&self, name: &str) -> Option<&MaterializedQuery> {
        self.queries.iter().find(|q| q.name() == name)
    }

    /// Attaches a client: records its group and last acked cookie, and
    /// takes ownership of its sink.
    pub fn connect(
        &mut self,
        client_id: impl Into<ClientId>,
        client_group_id: &str,
        base_cookie: Option<&Version>,
        request_id: impl Into<String>,
        sink: Box<dyn ClientSink>,
    ) -> Result<()> {
        let client_id = client_id.into();
        self.processor
            .connect_client(&client_id, client_group_id, base_cookie)?;
        self.connections.insert(
            client_id,
            Connection {
                request_id: request_id.into(),
                sink,
            },
        );
        Ok(())
    }

    /// Detaches a client. Its disconnect bookkeeping runs on the next
    /// frame.
    pub fn disconnect(&mut self, client_id: &str) {
        self.connections.remove(client_id);
    }

    /// Queues an incoming push. A group inconsistency rejects the whole
    /// push; the transport should close the offending connection with
    /// the returned error's description.
    pub fn enqueue_push(&mut self, push: Push) -> Result<()> {
        self.processor.enqueue_push(push)
    }

    /// Runs one frame and returns the store version after it.
    pub fn step(&mut self, now: f64) -> Result<Version> {
        let connected: BTreeSet<ClientId> = self.connections.keys().cloned().collect();
        let frame = self.processor.process_frame(&connected, now)?;

        self.pump_queries();

        let outgoing: Vec<OutboundPoke> = frame
            .pokes
            .iter()
            .filter_map(|cp| {
                self.connections.get(&cp.client_id).map(|conn| OutboundPoke {
                    client_id: cp.client_id.clone(),
                    request_id: conn.request_id.clone(),
                    poke: cp.poke.clone(),
                })
            })
            .collect();
        let batch = serialize_pokes(&outgoing)
            .map_err(|e| Error::invalid_operation(format!("poke serialization: {}", e)))?;
        for (client_id, message) in &batch.messages {
            if let Some(conn) = self.connections.get_mut(client_id) {
                conn.sink.send(message);
            }
        }

        for client_error in &frame.errors {
            if let Some(mut conn) = self.connections.remove(&client_error.client_id) {
                conn.sink.close(&client_error.error.to_string());
            }
        }

        debug!(
            room = %self.room_id,
            version = %frame.version,
            sent = batch.messages.len(),
            closed = frame.errors.len(),
            "stepped frame"
        );
        Ok(frame.version)
    }

    /// Feeds the row changes committed since the last frame into every
    /// materialized query pipeline.
    fn pump_queries(&mut self) {
        let head = self.store.borrow().seq();
        if head == self.seen_seq {
            return;
        }
        let from = self.seen_seq;
        self.seen_seq = head;
        if self.queries.is_empty() {
            return;
        }

        let changes = match self.store.borrow().coalesced_changes(from, head) {
            Ok(changes) => changes,
            Err(_) => {
                // A truncate or schema change cannot be repaired row by
                // row: the queries are discarded and the application must
                // re-register them against the new state.
                warn!(room = %self.room_id, "schema change: dropping materialized queries");
                self.queries.clear();
                return;
            }
        };

        let mut source_changes = Vec::new();
        for (table, keys) in changes {
            if table.starts_with('_') {
                continue;
            }
            for (key, (prev, next)) in keys {
                if let Some(prev) = prev {
                    source_changes.push(SourceChange::remove(
                        table.clone(),
                        row_from_entry(&key, &prev),
                    ));
                }
                if let Some(next) = next {
                    source_changes.push(SourceChange::add(
                        table.clone(),
                        row_from_entry(&key, &next),
                    ));
                }
            }
        }
        for change in &source_changes {
            for query in &mut self.queries {
                query.push_source(change);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap as Map;
    use std::rc::Rc;
    use tidemark_core::RowOrder;
    use tidemark_pipeline::{Operator, OperatorStorage, TakeOptions};
    use tidemark_process::PendingMutation;

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Rc<RefCell<Vec<String>>>,
        closed: Rc<RefCell<Option<String>>>,
    }

    impl ClientSink for RecordingSink {
        fn send(&mut self, message: &str) {
            self.sent.borrow_mut().push(message.to_string());
        }

        fn close(&mut self, reason: &str) {
            *self.closed.borrow_mut() = Some(reason.to_string());
        }
    }

    fn set_mutator(engine: &mut RoomEngine) {
        engine.register_mutator("set", |tx, args| {
            let entries = args
                .as_object()
                .ok_or_else(|| Error::invalid_operation("args must be an object"))?;
            for (key, value) in entries {
                tx.put("entries", key, value.clone());
            }
            Ok(())
        });
    }

    fn attach(engine: &mut RoomEngine, client: &str) -> RecordingSink {
        let sink = RecordingSink::default();
        engine
            .connect(
                client,
                "g1",
                Some(&Version::from_seq(0)),
                format!("req-{}", client),
                Box::new(sink.clone()),
            )
            .unwrap();
        sink
    }

    fn push_one(engine: &mut RoomEngine, client: &str, id: u64, key: &str, value: &str) {
        engine
            .enqueue_push(Push::new(
                "g1",
                vec![PendingMutation::new(
                    client,
                    "g1",
                    id,
                    "set",
                    Value::Object(Map::from([(key.to_string(), Value::String(value.into()))])),
                    0.0,
                )],
            ))
            .unwrap();
    }

    #[test]
    fn test_step_delivers_pokes_to_all_sinks() {
        let mut engine = RoomEngine::new("room-1");
        set_mutator(&mut engine);
        let s1 = attach(&mut engine, "c1");
        let s2 = attach(&mut engine, "c2");

        push_one(&mut engine, "c1", 1, "greeting", "hello");
        let version = engine.step(1_000.0).unwrap();
        assert_eq!(version, Version::from_seq(1));

        let m1 = s1.sent.borrow();
        let m2 = s2.sent.borrow();
        assert_eq!(m1.len(), 1);
        assert_eq!(m2.len(), 1);

        let parsed: serde_json::Value = serde_json::from_str(&m1[0]).unwrap();
        assert_eq!(parsed[0], "poke");
        assert_eq!(parsed[1]["requestID"], "req-c1");
        let poke = &parsed[1]["pokes"][0];
        assert_eq!(poke["baseCookie"], "00");
        assert_eq!(poke["cookie"], "01");
        assert_eq!(
            poke["patch"][0],
            serde_json::json!({"op": "put", "key": "greeting", "value": "hello"})
        );
        assert_eq!(poke["lastMutationIDChanges"]["c1"], 1);

        // Identical patches, distinct envelopes.
        assert_ne!(m1[0], m2[0]);
        let other: serde_json::Value = serde_json::from_str(&m2[0]).unwrap();
        assert_eq!(poke["patch"], other[1]["pokes"][0]["patch"]);
    }

    #[test]
    fn test_bad_mutation_id_closes_connection() {
        let mut engine = RoomEngine::new("room-1");
        set_mutator(&mut engine);
        let s1 = attach(&mut engine, "c1");
        let s2 = attach(&mut engine, "c2");

        push_one(&mut engine, "c1", 5, "a", "1"); // expected id is 1
        push_one(&mut engine, "c2", 1, "b", "2");
        engine.step(1_000.0).unwrap();

        let reason = s1.closed.borrow().clone().unwrap();
        assert!(reason.contains("Unexpected mutation id"));
        assert!(reason.contains("expected 1, got 5"));
        assert!(s1.sent.borrow().is_empty());

        // c2 is unaffected and got its poke.
        assert!(s2.closed.borrow().is_none());
        assert_eq!(s2.sent.borrow().len(), 1);

        // The closed client is gone from later frames.
        push_one(&mut engine, "c2", 2, "c", "3");
        engine.step(2_000.0).unwrap();
        assert_eq!(s1.sent.borrow().len(), 0);
        assert_eq!(s2.sent.borrow().len(), 2);
    }

    #[test]
    fn test_disconnect_handler_runs_next_frame() {
        let mut engine = RoomEngine::new("room-1");
        set_mutator(&mut engine);
        engine.set_disconnect_handler(|tx, client_id| {
            tx.put(
                "entries",
                &format!("disconnected:{}", client_id),
                Value::Bool(true),
            );
            Ok(())
        });
        let _s1 = attach(&mut engine, "c1");
        let s2 = attach(&mut engine, "c2");
        engine.step(100.0).unwrap();

        engine.disconnect("c1");
        engine.step(200.0).unwrap();

        let messages = s2.sent.borrow();
        let parsed: serde_json::Value = serde_json::from_str(messages.last().unwrap()).unwrap();
        assert_eq!(
            parsed[1]["pokes"][0]["patch"][0],
            serde_json::json!({"op": "put", "key": "disconnected:c1", "value": true})
        );
    }

    #[test]
    fn test_materialized_query_tracks_frames() {
        let mut engine = RoomEngine::new("room-1");
        engine.register_mutator("issue", |tx, args| {
            let id = args
                .as_object()
                .and_then(|o| o.get("id"))
                .and_then(Value::as_str)
                .ok_or_else(|| Error::invalid_operation("missing id"))?;
            tx.put("issues", id, args.clone());
            Ok(())
        });
        let storage = OperatorStorage::new();
        let order = RowOrder::asc(&["rank", "id"]);
        engine.add_query(MaterializedQuery::new(
            "top2",
            Operator::take(
                Operator::source("issues", order.clone()),
                order,
                TakeOptions::new(2),
                storage.scoped(),
            ),
        ));
        let _sink = attach(&mut engine, "c1");

        for (i, (id, rank)) in [("a", 3i64), ("b", 1), ("c", 2)].iter().enumerate() {
            engine
                .enqueue_push(Push::new(
                    "g1",
                    vec![PendingMutation::new(
                        "c1",
                        "g1",
                        i as u64 + 1,
                        "issue",
                        Value::Object(Map::from([
                            ("id".to_string(), Value::String((*id).into())),
                            ("rank".to_string(), Value::Int64(*rank)),
                        ])),
                        0.0,
                    )],
                ))
                .unwrap();
        }
        engine.step(1_000.0).unwrap();

        let query = engine.query("top2").unwrap();
        let ids: Vec<&str> = query
            .results()
            .iter()
            .map(|n| n.row().get("id").unwrap().as_str().unwrap())
            .collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    fn test_queries_dropped_on_truncate() {
        let mut engine = RoomEngine::new("room-1");
        set_mutator(&mut engine);
        engine.add_query(MaterializedQuery::new(
            "all",
            Operator::source("entries", RowOrder::asc(&["id"])),
        ));
        let _sink = attach(&mut engine, "c1");
        push_one(&mut engine, "c1", 1, "a", "1");
        engine.step(100.0).unwrap();
        assert!(engine.query("all").is_some());

        engine.store().borrow_mut().truncate("entries");
        engine.step(200.0).unwrap();
        assert!(engine.query("all").is_none());
    }

    #[test]
    fn test_reconnect_fast_forwards() {
        let mut engine = RoomEngine::new("room-1");
        set_mutator(&mut engine);
        let _s1 = attach(&mut engine, "c1");
        push_one(&mut engine, "c1", 1, "a", "1");
        push_one(&mut engine, "c1", 2, "b", "2");
        engine.step(100.0).unwrap();

        // A second client connects with no state at all.
        let sink = RecordingSink::default();
        engine
            .connect("c9", "g1", None, "req-c9", Box::new(sink.clone()))
            .unwrap();
        engine.step(200.0).unwrap();

        let messages = sink.sent.borrow();
        let parsed: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
        let poke = &parsed[1]["pokes"][0];
        assert_eq!(poke["baseCookie"], serde_json::Value::Null);
        assert_eq!(poke["patch"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_row_without_id_gets_key_injected() {
        let row = row_from_entry("k1", &Value::Object(Map::new()));
        assert_eq!(row.get("id"), Some(&Value::String("k1".into())));
    }
}
