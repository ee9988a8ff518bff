//! Take operator: bounded top-N window per partition.

use crate::keys;
use crate::operator::{Basis, FetchRequest, Operator, SourceChange};
use crate::storage::{ScopedStorage, TakeState};
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;
use tidemark_core::{Change, Node, Row, RowOrder, Value};

/// Configuration for a Take operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TakeOptions {
    /// Maximum number of rows kept per partition.
    pub limit: usize,
    /// Column partitioning the windows; None keeps a single window.
    pub partition: Option<String>,
}

impl TakeOptions {
    /// A single window of at most `limit` rows.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            partition: None,
        }
    }

    /// One window of at most `limit` rows per value of `partition`.
    pub fn partitioned(limit: usize, partition: impl Into<String>) -> Self {
        Self {
            limit,
            partition: Some(partition.into()),
        }
    }
}

/// Maintains the first `limit` rows per partition under the stream order.
///
/// Per-partition `{size, bound}` state is durable in operator storage:
/// `bound` is the largest kept row, and any upstream row at or below the
/// bound is in the window. Pushes for partitions that were never fetched
/// are ignored.
pub struct Take {
    input: Box<Operator>,
    order: RowOrder,
    limit: usize,
    partition: Option<String>,
    storage: ScopedStorage,
}

impl Take {
    /// Creates a take over an input.
    pub fn new(
        input: Box<Operator>,
        order: RowOrder,
        options: TakeOptions,
        storage: ScopedStorage,
    ) -> Self {
        Self {
            input,
            order,
            limit: options.limit,
            partition: options.partition,
            storage,
        }
    }

    fn state_key(&self, partition_value: Option<&Value>) -> String {
        match partition_value {
            Some(value) => format!("w/{}", keys::encode_value(value)),
            None => "w/".into(),
        }
    }

    fn partition_value(&self, row: &Row) -> Option<Value> {
        self.partition
            .as_ref()
            .map(|col| row.get(col).cloned().unwrap_or(Value::Null))
    }

    fn upstream_request(&self, partition_value: Option<&Value>) -> FetchRequest {
        match (&self.partition, partition_value) {
            (Some(col), Some(value)) => {
                FetchRequest::all().with_constraint(col.clone(), value.clone())
            }
            _ => FetchRequest::all(),
        }
    }

    fn grow_max_bound(&mut self, row: &Row) {
        let grew = match self.storage.max_bound() {
            Some(max) => self.order.cmp(row, &max) == Ordering::Greater,
            None => true,
        };
        if grew {
            self.storage.set_max_bound(row.clone());
        }
    }

    /// Pulls the window for a request.
    ///
    /// With an exact partition constraint (or no partitioning) this is the
    /// window itself, hydrating state on first fetch. Without one, rows
    /// from every hydrated partition's window are yielded, cut off at the
    /// global max-bound watermark.
    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        match (&self.partition, &req.constraint) {
            (Some(col), Some(c)) if c.column == *col => {
                self.fetch_window(Some(c.value.clone()))
            }
            (Some(_), _) => self.fetch_across_partitions(),
            (None, _) => self.fetch_window(None),
        }
    }

    fn fetch_window(&mut self, partition_value: Option<Value>) -> Vec<Node> {
        let key = self.state_key(partition_value.as_ref());
        let upstream = self.upstream_request(partition_value.as_ref());
        match self.storage.get_take(&key) {
            Some(state) => {
                let Some(bound) = state.bound else {
                    return Vec::new();
                };
                let mut out = Vec::new();
                for node in self.input.fetch(&upstream) {
                    if self.order.cmp(node.row(), &bound) == Ordering::Greater {
                        break;
                    }
                    out.push(node);
                    if out.len() == state.size {
                        break;
                    }
                }
                out
            }
            None => self.hydrate(&key, &upstream),
        }
    }

    fn hydrate(&mut self, key: &str, upstream: &FetchRequest) -> Vec<Node> {
        if self.limit == 0 {
            self.storage.set_take(key, TakeState::default());
            return Vec::new();
        }
        let mut out = Vec::new();
        for node in self.input.fetch(upstream) {
            out.push(node);
            if out.len() == self.limit {
                break;
            }
        }
        let bound = out.last().map(|n| n.row().clone());
        if let Some(b) = &bound {
            self.grow_max_bound(b);
        }
        self.storage.set_take(
            key,
            TakeState {
                size: out.len(),
                bound,
            },
        );
        out
    }

    fn fetch_across_partitions(&mut self) -> Vec<Node> {
        let Some(max_bound) = self.storage.max_bound() else {
            return Vec::new();
        };
        let Some(col) = self.partition.clone() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for node in self.input.fetch(&FetchRequest::all()) {
            // Nothing beyond the watermark is validated by any partition.
            if self.order.cmp(node.row(), &max_bound) == Ordering::Greater {
                break;
            }
            let value = node.row().get(&col).cloned().unwrap_or(Value::Null);
            let state = self.storage.get_take(&self.state_key(Some(&value)));
            let kept = state
                .and_then(|s| s.bound)
                .is_some_and(|b| self.order.cmp(node.row(), &b) != Ordering::Greater);
            if kept {
                out.push(node);
            }
        }
        out
    }

    /// Releases a partition's window state, yielding the kept rows.
    ///
    /// Panics if the partition was never fetched: cleanup of unhydrated
    /// state signals a misbehaving caller.
    pub fn cleanup(&mut self, req: &FetchRequest) -> Vec<Node> {
        let partition_value = match (&self.partition, &req.constraint) {
            (Some(col), Some(c)) if c.column == *col => Some(c.value.clone()),
            (None, _) => None,
            _ => panic!("take: cleanup requires an exact partition constraint"),
        };
        let key = self.state_key(partition_value.as_ref());
        let Some(state) = self.storage.remove_take(&key) else {
            panic!("take: cleanup for a partition that was never fetched");
        };
        let upstream = self.upstream_request(partition_value.as_ref());
        let hydrated = self.input.cleanup(&upstream);
        let Some(bound) = state.bound else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for node in hydrated {
            if self.order.cmp(node.row(), &bound) == Ordering::Greater {
                break;
            }
            out.push(node);
            if out.len() == state.size {
                break;
            }
        }
        out
    }

    /// Pushes a source change through, maintaining each affected window.
    ///
    /// Panics on a `Child` change: Take windows plain row streams, and a
    /// child change reaching one means the operator tree is misassembled.
    pub fn push(&mut self, change: &SourceChange) -> Vec<Change> {
        let inner = self.input.push(change);
        let mut out = Vec::new();
        for ch in inner {
            match ch {
                Change::Child { .. } => {
                    panic!("take: child changes are unsupported; restructure the operator tree")
                }
                Change::Add { node } => self.push_add(node, &mut out),
                Change::Remove { node } => self.push_remove(node, &mut out),
            }
        }
        out
    }

    fn push_add(&mut self, node: Node, out: &mut Vec<Change>) {
        let partition_value = self.partition_value(node.row());
        let key = self.state_key(partition_value.as_ref());
        let Some(mut state) = self.storage.get_take(&key) else {
            return;
        };
        if self.limit == 0 {
            return;
        }

        if state.size < self.limit {
            state.size += 1;
            let grew = match &state.bound {
                Some(bound) => self.order.cmp(node.row(), bound) == Ordering::Greater,
                None => true,
            };
            if grew {
                state.bound = Some(node.row().clone());
                self.grow_max_bound(node.row());
            }
            self.storage.set_take(&key, state);
            out.push(Change::add(node));
            return;
        }

        let Some(bound) = state.bound.clone() else {
            return;
        };
        if self.order.cmp(node.row(), &bound) != Ordering::Less {
            return;
        }

        // The old bound leaves the window, the new row enters it.
        out.push(Change::remove(Node::new(bound.clone())));
        out.push(Change::add(node.clone()));
        let new_bound = if self.limit == 1 {
            node.into_row()
        } else {
            // Largest remaining row below the evicted bound.
            let probe = self
                .upstream_request(partition_value.as_ref())
                .with_start(bound, Basis::After)
                .reversed();
            match self.input.fetch(&probe).into_iter().next() {
                Some(n) => n.into_row(),
                None => node.into_row(),
            }
        };
        state.bound = Some(new_bound);
        self.storage.set_take(&key, state);
    }

    fn push_remove(&mut self, node: Node, out: &mut Vec<Change>) {
        let partition_value = self.partition_value(node.row());
        let key = self.state_key(partition_value.as_ref());
        let Some(mut state) = self.storage.get_take(&key) else {
            return;
        };
        let Some(bound) = state.bound.clone() else {
            return;
        };
        if self.order.cmp(node.row(), &bound) == Ordering::Greater {
            return;
        }

        out.push(Change::remove(node));

        // A row beyond the old bound refills the window.
        let probe = self
            .upstream_request(partition_value.as_ref())
            .with_start(bound.clone(), Basis::After);
        if let Some(next) = self.input.fetch(&probe).into_iter().next() {
            state.bound = Some(next.row().clone());
            self.grow_max_bound(next.row());
            self.storage.set_take(&key, state);
            out.push(Change::add(next));
            return;
        }

        // Nothing beyond the bound: the window shrinks and the bound
        // falls back to the largest remaining row at or below it.
        state.size -= 1;
        let back = self
            .upstream_request(partition_value.as_ref())
            .with_start(bound, Basis::At)
            .reversed();
        state.bound = self
            .input
            .fetch(&back)
            .into_iter()
            .next()
            .map(Node::into_row);
        self.storage.set_take(&key, state);
    }
}
