//! MemoryBackend: an in-process implementation of [`Backend`].
//!
//! Data lives in one normalized tree: maps only (lists are stored as maps
//! keyed by index), no nulls, no empty maps. Snapshots are exported with
//! children in key order, and maps whose keys are dense integers come back
//! as lists.
//!
//! # Delivery
//!
//! Every callback (events, cancellations, completions) goes through a
//! single FIFO queue. Tasks are enqueued while the state lock is held, so
//! the queue order is the order in which state changes happened, and are run
//! after the lock is released. The first caller to find the queue idle
//! drains it; re-entrant calls made from inside a callback only enqueue.
//!
//! ## Lock ordering
//!
//! 1. `state`
//! 2. `delivery`
//!
//! No lock is held while a callback runs.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde_json::{json, Map, Value};

use crate::error::BackendError;
use crate::path::{Path, Reference};
use crate::snapshot::Snapshot;

use super::events::{diff, initial_events, ChildEvent};
use super::push_id::PushIdGenerator;
use super::query::{compare_keys, Entry, Query};
use super::{
    is_server_timestamp, Backend, CancelCallback, EventCallback, EventType, ListenerHandle,
    MutableData, OnceEventCallback, TransactionCallback, TransactionFn, TransactionOutcome,
    WriteCallback, WriteOp, WriteTiming,
};

/// First segment of the read-only connection-info subtree.
pub const INFO_SEGMENT: &str = ".info";

const MAX_TRANSACTION_ATTEMPTS: usize = 25;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct MemoryBackendConfig {
    /// Whether `.info/connected` starts out `true`.
    pub start_connected: bool,
    /// Epoch-millisecond clock used for push ids and server timestamps.
    pub clock: fn() -> i64,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            start_connected: true,
            clock: system_clock,
        }
    }
}

pub fn system_clock() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Internal types
// ============================================================================

type Task = Box<dyn FnOnce() + Send>;

enum Callback {
    Every(Arc<dyn Fn(Snapshot, Option<String>) + Send + Sync>),
    Once(Option<OnceEventCallback>),
}

#[derive(Clone, PartialEq)]
enum View {
    Value(Value),
    Children(Vec<Entry>),
}

struct Listener {
    handle: ListenerHandle,
    query: Query,
    event: EventType,
    callback: Callback,
    on_cancel: Option<CancelCallback>,
    view: View,
}

struct State {
    data: Value,
    priorities: BTreeMap<Vec<String>, Value>,
    connected: bool,
    listeners: Vec<Listener>,
    next_handle: u64,
    disconnect_ops: Vec<(Reference, WriteOp)>,
    denied: Vec<Reference>,
    push_ids: PushIdGenerator,
}

#[derive(Default)]
struct Delivery {
    tasks: VecDeque<Task>,
    delivering: bool,
}

// ============================================================================
// MemoryBackend
// ============================================================================

pub struct MemoryBackend {
    clock: fn() -> i64,
    state: Mutex<State>,
    delivery: Mutex<Delivery>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_config(MemoryBackendConfig::default())
    }

    pub fn with_config(config: MemoryBackendConfig) -> Self {
        Self {
            clock: config.clock,
            state: Mutex::new(State {
                data: Value::Null,
                priorities: BTreeMap::new(),
                connected: config.start_connected,
                listeners: Vec::new(),
                next_handle: 1,
                disconnect_ops: Vec::new(),
                denied: Vec::new(),
                push_ids: PushIdGenerator::new(),
            }),
            delivery: Mutex::new(Delivery::default()),
        }
    }

    // -----------------------------------------------------------------------
    // Connection simulation
    // -----------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Drop the connection: apply every queued on-disconnect write, in the
    /// order they were registered, then flip `.info/connected` to `false`.
    pub fn disconnect(&self) {
        let now = (self.clock)();
        let mut st = self.state.lock();
        if !st.connected {
            return;
        }
        let ops = std::mem::take(&mut st.disconnect_ops);
        tracing::debug!(ops = ops.len(), "disconnecting; applying on-disconnect writes");
        for (reference, op) in ops {
            if let Err(error) = st.check_write(&reference, &op) {
                tracing::warn!(%reference, %error, "skipping on-disconnect write");
                continue;
            }
            st.apply(&reference, op, now);
        }
        st.connected = false;
        let tasks = st.collect_events();
        self.finish(st, tasks);
    }

    pub fn connect(&self) {
        let mut st = self.state.lock();
        if st.connected {
            return;
        }
        st.connected = true;
        let tasks = st.collect_events();
        self.finish(st, tasks);
    }

    // -----------------------------------------------------------------------
    // Access rules
    // -----------------------------------------------------------------------

    /// Deny reads and writes at and below `path`. Listeners already attached
    /// there are cancelled with [`BackendError::PermissionDenied`].
    pub fn deny(&self, path: &Path) {
        let reference = path.resolve(self);
        let mut st = self.state.lock();

        let (cancelled, kept): (Vec<Listener>, Vec<Listener>) = std::mem::take(&mut st.listeners)
            .into_iter()
            .partition(|l| l.query.reference.starts_with(&reference));
        st.listeners = kept;
        st.denied.push(reference);

        let tasks = cancelled
            .into_iter()
            .filter_map(|listener| {
                let error = BackendError::PermissionDenied {
                    path: listener.query.reference.to_string(),
                };
                tracing::warn!(handle = listener.handle.0, %error, "cancelling listener");
                listener
                    .on_cancel
                    .map(|cancel| Box::new(move || cancel(error)) as Task)
            })
            .collect();
        self.finish(st, tasks);
    }

    /// Lift a rule added with [`MemoryBackend::deny`].
    pub fn allow(&self, path: &Path) {
        let reference = path.resolve(self);
        self.state.lock().denied.retain(|d| *d != reference);
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Current exported value at `path`.
    pub fn value(&self, path: &Path) -> Value {
        let reference = path.resolve(self);
        export(&self.state.lock().value_at(&reference))
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    pub fn pending_disconnect_ops(&self) -> usize {
        self.state.lock().disconnect_ops.len()
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Enqueue `tasks` (still under the state lock), release the lock, then
    /// drain the queue unless another caller is already draining it.
    fn finish(&self, st: MutexGuard<'_, State>, tasks: Vec<Task>) {
        if !tasks.is_empty() {
            self.delivery.lock().tasks.extend(tasks);
        }
        drop(st);
        self.drain();
    }

    fn drain(&self) {
        {
            let mut delivery = self.delivery.lock();
            if delivery.delivering {
                return;
            }
            delivery.delivering = true;
        }

        loop {
            let task = {
                let mut delivery = self.delivery.lock();
                match delivery.tasks.pop_front() {
                    Some(task) => task,
                    None => {
                        delivery.delivering = false;
                        return;
                    }
                }
            };
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
                tracing::warn!("backend callback panicked");
            }
        }
    }

    fn register(
        &self,
        query: &Query,
        event: EventType,
        callback: Callback,
        on_cancel: CancelCallback,
    ) -> ListenerHandle {
        let mut st = self.state.lock();
        let handle = ListenerHandle(st.next_handle);
        st.next_handle += 1;

        if let Some(error) = st.read_denied(&query.reference) {
            tracing::warn!(handle = handle.0, %error, "listener rejected");
            self.finish(st, vec![Box::new(move || on_cancel(error))]);
            return handle;
        }

        let view = st.view(query, event);
        let mut listener = Listener {
            handle,
            query: query.clone(),
            event,
            callback,
            on_cancel: Some(on_cancel),
            view: view.clone(),
        };

        let events = match &view {
            View::Value(value) => vec![ChildEvent {
                entry: Entry::new(snapshot_key(&query.reference), value.clone()),
                previous_key: None,
            }],
            View::Children(entries) => initial_events(event, entries),
        };
        let priority = st.priorities.get(query.reference.segments()).cloned();
        let (tasks, fired) = listener.dispatch(events, priority);

        let once_done = matches!(listener.callback, Callback::Once(_)) && fired;
        if !once_done {
            tracing::debug!(
                handle = handle.0,
                reference = %query.reference,
                ?event,
                "listener registered"
            );
            st.listeners.push(listener);
        }
        self.finish(st, tasks);
        handle
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Backend
// ============================================================================

impl Backend for MemoryBackend {
    fn mint_key(&self) -> String {
        let now = (self.clock)();
        self.state.lock().push_ids.next_id(now)
    }

    fn observe(
        &self,
        query: &Query,
        event: EventType,
        on_event: EventCallback,
        on_cancel: CancelCallback,
    ) -> ListenerHandle {
        self.register(query, event, Callback::Every(Arc::from(on_event)), on_cancel)
    }

    fn observe_once(
        &self,
        query: &Query,
        event: EventType,
        on_event: OnceEventCallback,
        on_cancel: CancelCallback,
    ) -> ListenerHandle {
        self.register(query, event, Callback::Once(Some(on_event)), on_cancel)
    }

    fn remove_observer(&self, handle: ListenerHandle) {
        let mut st = self.state.lock();
        let before = st.listeners.len();
        st.listeners.retain(|l| l.handle != handle);
        if st.listeners.len() != before {
            tracing::debug!(handle = handle.0, "listener removed");
        }
    }

    fn write(
        &self,
        reference: &Reference,
        op: WriteOp,
        timing: WriteTiming,
        on_complete: WriteCallback,
    ) {
        let now = (self.clock)();
        let mut st = self.state.lock();

        if let Err(error) = st.check_write(reference, &op) {
            return self.finish(st, vec![Box::new(move || on_complete(Err(error)))]);
        }

        let written = reference.clone();
        let mut tasks = match timing {
            WriteTiming::Now => {
                st.apply(reference, op, now);
                st.collect_events()
            }
            WriteTiming::OnDisconnect => {
                if matches!(op, WriteOp::SetPriority(_)) {
                    let error = BackendError::InvalidWrite(
                        "priority-only writes cannot run on disconnect".to_string(),
                    );
                    return self.finish(st, vec![Box::new(move || on_complete(Err(error)))]);
                }
                st.disconnect_ops.push((reference.clone(), op));
                Vec::new()
            }
        };
        tasks.push(Box::new(move || on_complete(Ok(written))));
        self.finish(st, tasks);
    }

    fn cancel_disconnect(&self, reference: &Reference, on_complete: WriteCallback) {
        let mut st = self.state.lock();
        if let Some(error) = st.read_denied(reference) {
            return self.finish(st, vec![Box::new(move || on_complete(Err(error)))]);
        }
        st.disconnect_ops.retain(|(r, _)| !r.starts_with(reference));
        let cancelled = reference.clone();
        self.finish(st, vec![Box::new(move || on_complete(Ok(cancelled)))]);
    }

    fn run_transaction(
        &self,
        reference: &Reference,
        mut update: TransactionFn,
        local_events: bool,
        on_complete: TransactionCallback,
    ) {
        tracing::trace!(%reference, local_events, "running transaction");
        let key = snapshot_key(reference);

        for _ in 0..MAX_TRANSACTION_ATTEMPTS {
            let current = {
                let st = self.state.lock();
                if let Err(error) = st.check_write(reference, &WriteOp::Remove) {
                    return self.finish(st, vec![Box::new(move || on_complete(Err(error)))]);
                }
                export(&st.value_at(reference))
            };

            // The update function runs without any lock held.
            let mut data = MutableData::new(key.clone(), current.clone());
            let outcome = update(&mut data);

            let now = (self.clock)();
            let mut st = self.state.lock();
            if export(&st.value_at(reference)) != current {
                continue;
            }

            let committed = outcome == TransactionOutcome::Commit;
            let mut tasks = if committed {
                st.replace_value(reference, normalize(data.into_value(), now));
                st.collect_events()
            } else {
                Vec::new()
            };
            let snapshot = st.snapshot_at(reference);
            tasks.push(Box::new(move || on_complete(Ok((Some(snapshot), committed)))));
            return self.finish(st, tasks);
        }

        let st = self.state.lock();
        let error = BackendError::Other("transaction retries exhausted".to_string());
        self.finish(st, vec![Box::new(move || on_complete(Err(error)))]);
    }
}

// ============================================================================
// Listener dispatch
// ============================================================================

impl Listener {
    /// Turn `events` into delivery tasks. Once-callbacks fire for the first
    /// event only. Returns the tasks and whether anything fired.
    fn dispatch(&mut self, events: Vec<ChildEvent>, priority: Option<Value>) -> (Vec<Task>, bool) {
        let mut tasks: Vec<Task> = Vec::new();
        for event in events {
            let snapshot = match self.event {
                EventType::Value => {
                    Snapshot::new(event.entry.key, event.entry.value).with_priority(priority.clone())
                }
                _ => Snapshot::new(event.entry.key, event.entry.value)
                    .with_priority(event.entry.priority),
            };
            let previous_key = event.previous_key;
            tracing::trace!(handle = self.handle.0, key = snapshot.key(), event = ?self.event, "queueing event");

            match &mut self.callback {
                Callback::Every(cb) => {
                    let cb = Arc::clone(cb);
                    tasks.push(Box::new(move || cb(snapshot, previous_key)));
                }
                Callback::Once(slot) => {
                    if let Some(cb) = slot.take() {
                        tasks.push(Box::new(move || cb(snapshot, previous_key)));
                    }
                    break;
                }
            }
        }
        let fired = !tasks.is_empty();
        (tasks, fired)
    }
}

// ============================================================================
// State
// ============================================================================

impl State {
    fn info(&self) -> Value {
        json!({ "connected": self.connected, "serverTimeOffset": 0 })
    }

    fn value_at(&self, reference: &Reference) -> Value {
        let segments = reference.segments();
        let info;
        let (root, rest) = if segments.first().map(String::as_str) == Some(INFO_SEGMENT) {
            info = self.info();
            (&info, &segments[1..])
        } else {
            (&self.data, segments)
        };
        rest.iter()
            .try_fold(root, |node, segment| node.as_object()?.get(segment))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn snapshot_at(&self, reference: &Reference) -> Snapshot {
        Snapshot::new(snapshot_key(reference), export(&self.value_at(reference)))
            .with_priority(self.priorities.get(reference.segments()).cloned())
    }

    fn entries(&self, reference: &Reference) -> Vec<Entry> {
        match self.value_at(reference) {
            Value::Object(map) => map
                .into_iter()
                .map(|(key, value)| {
                    let mut segments = reference.segments().to_vec();
                    segments.push(key.clone());
                    Entry {
                        priority: self.priorities.get(&segments).cloned(),
                        value: export(&value),
                        key,
                    }
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn view(&self, query: &Query, event: EventType) -> View {
        if event.is_child_event() {
            return View::Children(query.params.arrange(self.entries(&query.reference)));
        }
        let value = self.value_at(&query.reference);
        if query.params.is_default() || !value.is_object() {
            return View::Value(export(&value));
        }
        let selected = query.params.arrange(self.entries(&query.reference));
        View::Value(Value::Object(
            selected.into_iter().map(|e| (e.key, e.value)).collect(),
        ))
    }

    fn read_denied(&self, reference: &Reference) -> Option<BackendError> {
        self.denied
            .iter()
            .any(|d| reference.starts_with(d))
            .then(|| BackendError::PermissionDenied {
                path: reference.to_string(),
            })
    }

    fn check_write(&self, reference: &Reference, op: &WriteOp) -> Result<(), BackendError> {
        if reference.segments().first().map(String::as_str) == Some(INFO_SEGMENT) {
            return Err(BackendError::InvalidWrite(format!(
                "{reference} is read-only"
            )));
        }
        if let WriteOp::Update(children) = op {
            if children.keys().any(|k| k.split('/').all(str::is_empty)) {
                return Err(BackendError::InvalidWrite(
                    "update keys must not be empty".to_string(),
                ));
            }
        }
        if let Some(error) = self.read_denied(reference) {
            return Err(error);
        }
        Ok(())
    }

    fn clear_priorities(&mut self, segments: &[String]) {
        self.priorities.retain(|k, _| !k.starts_with(segments));
    }

    fn replace_value(&mut self, reference: &Reference, value: Value) {
        set_at(&mut self.data, reference.segments(), value);
        let data = &self.data;
        self.priorities.retain(|k, _| {
            k.iter()
                .try_fold(data, |node, s| node.as_object()?.get(s))
                .is_some()
        });
    }

    fn apply(&mut self, reference: &Reference, op: WriteOp, now: i64) {
        match op {
            WriteOp::Set { value, priority } => {
                self.clear_priorities(reference.segments());
                set_at(&mut self.data, reference.segments(), normalize(value, now));
                if let Some(priority) = priority.filter(|p| !p.is_null()) {
                    self.priorities
                        .insert(reference.segments().to_vec(), priority);
                }
            }
            WriteOp::SetPriority(priority) => {
                if priority.is_null() {
                    self.priorities.remove(reference.segments());
                } else {
                    self.priorities
                        .insert(reference.segments().to_vec(), priority);
                }
            }
            WriteOp::Update(children) => {
                for (relative, value) in children {
                    let mut target = reference.clone();
                    for segment in relative.split('/').filter(|s| !s.is_empty()) {
                        target = target.child(segment);
                    }
                    self.clear_priorities(target.segments());
                    set_at(&mut self.data, target.segments(), normalize(value, now));
                }
            }
            WriteOp::Remove => {
                self.clear_priorities(reference.segments());
                set_at(&mut self.data, reference.segments(), Value::Null);
            }
        }
    }

    /// Recompute every listener's view and queue the events the change raised.
    fn collect_events(&mut self) -> Vec<Task> {
        let views: Vec<View> = self
            .listeners
            .iter()
            .map(|l| self.view(&l.query, l.event))
            .collect();
        let priorities: Vec<Option<Value>> = self
            .listeners
            .iter()
            .map(|l| self.priorities.get(l.query.reference.segments()).cloned())
            .collect();

        let mut tasks = Vec::new();
        let mut finished = Vec::new();
        for ((listener, view), priority) in self.listeners.iter_mut().zip(views).zip(priorities) {
            let events = match (&listener.view, &view) {
                (View::Value(old), View::Value(new)) if old != new => vec![ChildEvent {
                    entry: Entry::new(snapshot_key(&listener.query.reference), new.clone()),
                    previous_key: None,
                }],
                (View::Children(old), View::Children(new)) => diff(listener.event, old, new),
                _ => Vec::new(),
            };
            listener.view = view;

            let (queued, fired) = listener.dispatch(events, priority);
            tasks.extend(queued);
            if fired && matches!(listener.callback, Callback::Once(_)) {
                finished.push(listener.handle);
            }
        }
        self.listeners.retain(|l| !finished.contains(&l.handle));
        tasks
    }
}

// ============================================================================
// Tree helpers
// ============================================================================

fn snapshot_key(reference: &Reference) -> String {
    reference.key().unwrap_or_default().to_string()
}

/// Write `value` at `segments` below `node`, pruning maps left empty.
fn set_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if value.is_null() && !node.is_object() {
        return;
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = &mut *node else {
        return;
    };

    let child_is_null = {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
        child.is_null()
    };
    if child_is_null {
        map.remove(head);
    }
    if map.is_empty() {
        *node = Value::Null;
    }
}

/// Canonical stored form: lists become index-keyed maps, nulls and empty
/// maps disappear, server timestamps are resolved.
fn normalize(value: Value, now: i64) -> Value {
    if is_server_timestamp(&value) {
        return Value::from(now);
    }
    match value {
        Value::Array(items) => normalize(
            Value::Object(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect(),
            ),
            now,
        ),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                let child = normalize(child, now);
                if !child.is_null() {
                    out.insert(key, child);
                }
            }
            if out.is_empty() {
                Value::Null
            } else {
                Value::Object(out)
            }
        }
        other => other,
    }
}

/// Exported form: map keys in key order; dense integer-keyed maps as lists.
fn export(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    if let Some(list) = as_list(map) {
        return list;
    }
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort_by(|a, b| compare_keys(a, b));
    Value::Object(
        keys.into_iter()
            .filter_map(|k| map.get(k).map(|v| (k.clone(), export(v))))
            .collect(),
    )
}

fn as_list(map: &Map<String, Value>) -> Option<Value> {
    let mut max = 0usize;
    for key in map.keys() {
        let index: usize = key.parse().ok()?;
        if index.to_string() != *key {
            return None;
        }
        max = max.max(index);
    }
    if map.is_empty() || max >= 2 * map.len() {
        return None;
    }
    let mut items = vec![Value::Null; max + 1];
    for (key, child) in map {
        if let Ok(index) = key.parse::<usize>() {
            items[index] = export(child);
        }
    }
    Some(Value::Array(items))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
