//! Integration tests for `MemoryBackend`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rtdb_reactive::{
    backend::{
        Backend, EventType, ListenerHandle, MemoryBackend, MemoryBackendConfig, MutableData, Query,
        QueryParams, TransactionOutcome, WriteOp, WriteTiming,
    },
    path::{Path, Reference},
    server_timestamp, BackendError, Snapshot,
};
use serde_json::{json, Map, Value};

// ============================================================================
// Helpers
// ============================================================================

type EventLog = Arc<Mutex<Vec<(String, Value, Option<String>)>>>;
type ErrorLog = Arc<Mutex<Vec<BackendError>>>;

fn make_log<T: Send + 'static>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn reference(path: &str) -> Reference {
    Reference::from_segments(path.split('/').map(str::to_string).collect())
}

fn path(text: &str) -> Path {
    Path::parse(text).expect("parse path")
}

fn write(backend: &MemoryBackend, at: &str, op: WriteOp) -> Result<Reference, BackendError> {
    write_with(backend, at, op, WriteTiming::Now)
}

fn write_with(
    backend: &MemoryBackend,
    at: &str,
    op: WriteOp,
    timing: WriteTiming,
) -> Result<Reference, BackendError> {
    let result = make_log();
    let sink = Arc::clone(&result);
    backend.write(
        &reference(at),
        op,
        timing,
        Box::new(move |r| sink.lock().unwrap().push(r)),
    );
    let mut results = result.lock().unwrap();
    assert_eq!(results.len(), 1, "write completes exactly once");
    results.remove(0)
}

fn set(backend: &MemoryBackend, at: &str, value: Value) {
    write(
        backend,
        at,
        WriteOp::Set {
            value,
            priority: None,
        },
    )
    .expect("set");
}

fn listen(
    backend: &MemoryBackend,
    query: &Query,
    event: EventType,
) -> (ListenerHandle, EventLog, ErrorLog) {
    let events: EventLog = make_log();
    let errors: ErrorLog = make_log();
    let (e, c) = (Arc::clone(&events), Arc::clone(&errors));
    let handle = backend.observe(
        query,
        event,
        Box::new(move |snapshot: Snapshot, prev| {
            e.lock()
                .unwrap()
                .push((snapshot.key().to_string(), snapshot.into_value(), prev))
        }),
        Box::new(move |error| c.lock().unwrap().push(error)),
    );
    (handle, events, errors)
}

fn keys(log: &EventLog) -> Vec<(String, Option<String>)> {
    log.lock()
        .unwrap()
        .iter()
        .map(|(k, _, p)| (k.clone(), p.clone()))
        .collect()
}

fn entry(key: &str, prev: Option<&str>) -> (String, Option<String>) {
    (key.to_string(), prev.map(str::to_string))
}

fn fixed_clock() -> i64 {
    1_700_000_000_000
}

// ============================================================================
// Writes and values
// ============================================================================

#[test]
fn set_then_read_back() {
    let backend = MemoryBackend::new();
    set(&backend, "a/b", json!({ "x": 1 }));
    assert_eq!(backend.value(&path("a")), json!({ "b": { "x": 1 } }));
}

#[test]
fn nulls_prune_the_tree() {
    let backend = MemoryBackend::new();
    set(&backend, "a/b", json!(1));
    set(&backend, "a/b", Value::Null);
    assert_eq!(backend.value(&path("a")), Value::Null);
}

#[test]
fn update_touches_only_listed_children() {
    let backend = MemoryBackend::new();
    set(&backend, "m", json!({ "text": "old", "date": 5 }));
    let mut children = Map::new();
    children.insert("text".to_string(), json!("new"));
    children.insert("meta/seen".to_string(), json!(true));
    write(&backend, "m", WriteOp::Update(children)).expect("update");
    assert_eq!(
        backend.value(&path("m")),
        json!({ "date": 5, "meta": { "seen": true }, "text": "new" })
    );
}

#[test]
fn remove_deletes_the_location() {
    let backend = MemoryBackend::new();
    set(&backend, "a", json!({ "b": 1, "c": 2 }));
    write(&backend, "a/b", WriteOp::Remove).expect("remove");
    assert_eq!(backend.value(&path("a")), json!({ "c": 2 }));
}

#[test]
fn dense_integer_keys_export_as_list() {
    let backend = MemoryBackend::new();
    set(&backend, "l", json!(["x", "y"]));
    assert_eq!(backend.value(&path("l")), json!(["x", "y"]));
}

#[test]
fn server_timestamp_uses_clock() {
    let backend = MemoryBackend::with_config(MemoryBackendConfig {
        clock: fixed_clock,
        ..MemoryBackendConfig::default()
    });
    set(&backend, "m/at", server_timestamp());
    assert_eq!(backend.value(&path("m/at")), json!(fixed_clock()));
}

#[test]
fn writes_under_info_are_rejected() {
    let backend = MemoryBackend::new();
    let err = write(&backend, ".info/connected", WriteOp::Remove).unwrap_err();
    assert!(matches!(err, BackendError::InvalidWrite(_)), "{err:?}");
}

#[test]
fn write_reports_written_reference() {
    let backend = MemoryBackend::new();
    let written = write(
        &backend,
        "a/b",
        WriteOp::Set {
            value: json!(1),
            priority: None,
        },
    )
    .expect("set");
    assert_eq!(written.key(), Some("b"));
}

// ============================================================================
// Value listeners
// ============================================================================

#[test]
fn value_listener_gets_current_then_changes() {
    let backend = MemoryBackend::new();
    set(&backend, "a", json!(1));
    let (_h, events, _) = listen(&backend, &Query::at(reference("a")), EventType::Value);
    set(&backend, "a", json!(2));
    set(&backend, "a", json!(2));

    let values: Vec<Value> = events.lock().unwrap().iter().map(|(_, v, _)| v.clone()).collect();
    assert_eq!(values, vec![json!(1), json!(2)]);
}

#[test]
fn value_listener_on_empty_location_sees_null() {
    let backend = MemoryBackend::new();
    let (_h, events, _) = listen(&backend, &Query::at(reference("nothing")), EventType::Value);
    assert_eq!(events.lock().unwrap()[0].1, Value::Null);
}

#[test]
fn remove_observer_stops_delivery() {
    let backend = MemoryBackend::new();
    let (handle, events, _) = listen(&backend, &Query::at(reference("a")), EventType::Value);
    backend.remove_observer(handle);
    set(&backend, "a", json!(1));
    assert_eq!(events.lock().unwrap().len(), 1);
    assert_eq!(backend.listener_count(), 0);
}

#[test]
fn observe_once_fires_once_and_detaches() {
    let backend = MemoryBackend::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    backend.observe_once(
        &Query::at(reference("list")),
        EventType::ChildAdded,
        Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        Box::new(|_| {}),
    );
    assert_eq!(backend.listener_count(), 1);
    set(&backend, "list/a", json!(1));
    set(&backend, "list/b", json!(2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.listener_count(), 0);
}

#[test]
fn observe_once_can_be_removed_before_it_fires() {
    let backend = MemoryBackend::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handle = backend.observe_once(
        &Query::at(reference("list")),
        EventType::ChildAdded,
        Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        Box::new(|_| {}),
    );
    backend.remove_observer(handle);
    assert_eq!(backend.listener_count(), 0);

    set(&backend, "list/a", json!(1));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Child listeners
// ============================================================================

#[test]
fn child_added_replays_existing_children() {
    let backend = MemoryBackend::new();
    set(&backend, "list", json!({ "a": 1, "b": 2 }));
    let (_h, events, _) = listen(&backend, &Query::at(reference("list")), EventType::ChildAdded);
    set(&backend, "list/c", json!(3));
    assert_eq!(
        keys(&events),
        vec![entry("a", None), entry("b", Some("a")), entry("c", Some("b"))]
    );
}

#[test]
fn child_removed_reports_old_predecessor() {
    let backend = MemoryBackend::new();
    set(&backend, "list", json!({ "a": 1, "b": 2, "c": 3 }));
    let (_h, events, _) = listen(&backend, &Query::at(reference("list")), EventType::ChildRemoved);
    write(&backend, "list/b", WriteOp::Remove).expect("remove");
    assert_eq!(keys(&events), vec![entry("b", Some("a"))]);
}

#[test]
fn child_changed_reports_new_value() {
    let backend = MemoryBackend::new();
    set(&backend, "list", json!({ "a": 1, "b": 2 }));
    let (_h, events, _) = listen(&backend, &Query::at(reference("list")), EventType::ChildChanged);
    set(&backend, "list/b", json!(20));
    assert_eq!(
        events.lock().unwrap().clone(),
        vec![("b".to_string(), json!(20), Some("a".to_string()))]
    );
}

#[test]
fn child_moved_when_sort_position_changes() {
    let backend = MemoryBackend::new();
    set(
        &backend,
        "scores",
        json!({ "a": { "score": 1 }, "b": { "score": 2 }, "c": { "score": 3 } }),
    );
    let query = Query::new(reference("scores"), QueryParams::new().order_by_child("score"));
    let (_h, moved, _) = listen(&backend, &query, EventType::ChildMoved);
    set(&backend, "scores/b/score", json!(0));
    assert_eq!(keys(&moved), vec![entry("b", None)]);
}

#[test]
fn limit_window_raises_removed_and_added() {
    let backend = MemoryBackend::new();
    set(&backend, "log", json!({ "a": 1, "b": 2 }));
    let query = Query::new(reference("log"), QueryParams::new().limit_to_last(2));
    let (_h1, added, _) = listen(&backend, &query, EventType::ChildAdded);
    let (_h2, removed, _) = listen(&backend, &query, EventType::ChildRemoved);
    set(&backend, "log/c", json!(3));
    assert_eq!(
        keys(&added),
        vec![entry("a", None), entry("b", Some("a")), entry("c", Some("b"))]
    );
    assert_eq!(keys(&removed), vec![entry("a", None)]);
}

#[test]
fn order_by_priority_uses_priorities() {
    let backend = MemoryBackend::new();
    write(
        &backend,
        "p/a",
        WriteOp::Set {
            value: json!("A"),
            priority: Some(json!(2)),
        },
    )
    .expect("set");
    write(
        &backend,
        "p/b",
        WriteOp::Set {
            value: json!("B"),
            priority: Some(json!(1)),
        },
    )
    .expect("set");
    let query = Query::new(reference("p"), QueryParams::new().order_by_priority());
    let (_h, events, _) = listen(&backend, &query, EventType::ChildAdded);
    assert_eq!(keys(&events), vec![entry("b", None), entry("a", Some("b"))]);
}

// ============================================================================
// Delivery order
// ============================================================================

#[test]
fn writes_from_callbacks_are_delivered_after_the_current_event() {
    let backend = Arc::new(MemoryBackend::new());
    let order = make_log::<String>();

    let weak = Arc::downgrade(&backend);
    let log = Arc::clone(&order);
    backend.observe(
        &Query::at(reference("x")),
        EventType::Value,
        Box::new(move |snapshot, _| {
            log.lock().unwrap().push(format!("x={}", snapshot.value()));
            if snapshot.value() == &json!(1) {
                if let Some(backend) = weak.upgrade() {
                    backend.write(
                        &reference("y"),
                        WriteOp::Set {
                            value: json!(2),
                            priority: None,
                        },
                        WriteTiming::Now,
                        Box::new(|_| {}),
                    );
                }
                log.lock().unwrap().push("x done".to_string());
            }
        }),
        Box::new(|_| {}),
    );

    let log = Arc::clone(&order);
    backend.observe(
        &Query::at(reference("y")),
        EventType::Value,
        Box::new(move |snapshot, _| log.lock().unwrap().push(format!("y={}", snapshot.value()))),
        Box::new(|_| {}),
    );

    set(&backend, "x", json!(1));
    assert_eq!(
        order.lock().unwrap().clone(),
        vec!["x=null", "y=null", "x=1", "x done", "y=2"]
    );
}

#[test]
fn panicking_callback_does_not_block_the_queue() {
    let backend = MemoryBackend::new();
    backend.observe(
        &Query::at(reference("a")),
        EventType::Value,
        Box::new(|snapshot, _| {
            if snapshot.exists() {
                panic!("listener failure");
            }
        }),
        Box::new(|_| {}),
    );
    let (_h, events, _) = listen(&backend, &Query::at(reference("a")), EventType::Value);
    set(&backend, "a", json!(1));
    assert_eq!(events.lock().unwrap().len(), 2);
}

// ============================================================================
// Connection and on-disconnect writes
// ============================================================================

#[test]
fn connected_flag_is_observable() {
    let backend = MemoryBackend::new();
    let (_h, events, _) = listen(
        &backend,
        &Query::at(reference(".info/connected")),
        EventType::Value,
    );
    backend.disconnect();
    backend.connect();
    let values: Vec<Value> = events.lock().unwrap().iter().map(|(_, v, _)| v.clone()).collect();
    assert_eq!(values, vec![json!(true), json!(false), json!(true)]);
}

#[test]
fn start_disconnected() {
    let backend = MemoryBackend::with_config(MemoryBackendConfig {
        start_connected: false,
        ..MemoryBackendConfig::default()
    });
    assert!(!backend.is_connected());
    assert_eq!(backend.value(&path(".info/connected")), json!(false));
}

#[test]
fn on_disconnect_writes_run_on_disconnect() {
    let backend = MemoryBackend::new();
    set(&backend, "presence/me", json!("online"));
    write_with(
        &backend,
        "presence/me",
        WriteOp::Set {
            value: json!("offline"),
            priority: None,
        },
        WriteTiming::OnDisconnect,
    )
    .expect("queue");
    assert_eq!(backend.value(&path("presence/me")), json!("online"));
    assert_eq!(backend.pending_disconnect_ops(), 1);

    backend.disconnect();
    assert_eq!(backend.value(&path("presence/me")), json!("offline"));
    assert_eq!(backend.pending_disconnect_ops(), 0);
}

#[test]
fn cancel_disconnect_drops_queued_writes_below() {
    let backend = MemoryBackend::new();
    write_with(&backend, "presence/me", WriteOp::Remove, WriteTiming::OnDisconnect).expect("queue");
    write_with(&backend, "other", WriteOp::Remove, WriteTiming::OnDisconnect).expect("queue");

    let done = make_log();
    let sink = Arc::clone(&done);
    backend.cancel_disconnect(
        &reference("presence"),
        Box::new(move |r| sink.lock().unwrap().push(r)),
    );
    assert!(done.lock().unwrap()[0].is_ok());
    assert_eq!(backend.pending_disconnect_ops(), 1);
}

#[test]
fn priority_only_write_cannot_wait_for_disconnect() {
    let backend = MemoryBackend::new();
    let err = write_with(
        &backend,
        "a",
        WriteOp::SetPriority(json!(1)),
        WriteTiming::OnDisconnect,
    )
    .unwrap_err();
    assert!(matches!(err, BackendError::InvalidWrite(_)));
}

// ============================================================================
// Access rules
// ============================================================================

#[test]
fn deny_cancels_listeners_and_rejects_writes() {
    let backend = MemoryBackend::new();
    let (_h, events, errors) = listen(&backend, &Query::at(reference("secret/x")), EventType::Value);
    backend.deny(&path("secret"));

    assert_eq!(
        errors.lock().unwrap().clone(),
        vec![BackendError::PermissionDenied {
            path: "/secret/x".to_string()
        }]
    );
    assert_eq!(backend.listener_count(), 0);

    let err = write(&backend, "secret/x", WriteOp::Remove).unwrap_err();
    assert!(matches!(err, BackendError::PermissionDenied { .. }));
    assert_eq!(events.lock().unwrap().len(), 1);
}

#[test]
fn listening_on_denied_location_cancels_immediately() {
    let backend = MemoryBackend::new();
    backend.deny(&path("secret"));
    let (_h, events, errors) = listen(&backend, &Query::at(reference("secret")), EventType::Value);
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(errors.lock().unwrap().len(), 1);

    backend.allow(&path("secret"));
    let (_h, events, errors) = listen(&backend, &Query::at(reference("secret")), EventType::Value);
    assert_eq!(events.lock().unwrap().len(), 1);
    assert!(errors.lock().unwrap().is_empty());
}

// ============================================================================
// Transactions
// ============================================================================

type TxLog = Arc<Mutex<Vec<Result<(Option<Snapshot>, bool), BackendError>>>>;

fn transact(
    backend: &MemoryBackend,
    at: &str,
    update: impl FnMut(&mut MutableData) -> TransactionOutcome + Send + 'static,
) -> Result<(Option<Snapshot>, bool), BackendError> {
    let log: TxLog = make_log();
    let sink = Arc::clone(&log);
    backend.run_transaction(
        &reference(at),
        Box::new(update),
        true,
        Box::new(move |r| sink.lock().unwrap().push(r)),
    );
    let mut results = log.lock().unwrap();
    assert_eq!(results.len(), 1);
    results.remove(0)
}

#[test]
fn transaction_commits() {
    let backend = MemoryBackend::new();
    set(&backend, "counter", json!(1));
    let (snapshot, committed) = transact(&backend, "counter", |data| {
        let next = data.value().as_i64().unwrap_or(0) + 1;
        data.set_value(json!(next));
        TransactionOutcome::Commit
    })
    .expect("transaction");
    assert!(committed);
    assert_eq!(snapshot.expect("snapshot").value(), &json!(2));
    assert_eq!(backend.value(&path("counter")), json!(2));
}

#[test]
fn transaction_abort_leaves_value() {
    let backend = MemoryBackend::new();
    set(&backend, "counter", json!(1));
    let (snapshot, committed) = transact(&backend, "counter", |data| {
        data.set_value(json!(100));
        TransactionOutcome::Abort
    })
    .expect("transaction");
    assert!(!committed);
    assert_eq!(snapshot.expect("snapshot").value(), &json!(1));
    assert_eq!(backend.value(&path("counter")), json!(1));
}

#[test]
fn transaction_retries_on_contention() {
    let backend = Arc::new(MemoryBackend::new());
    set(&backend, "counter", json!(1));

    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let weak = Arc::downgrade(&backend);
    let (snapshot, committed) = transact(&backend, "counter", move |data| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Some(backend) = weak.upgrade() {
                set(&backend, "counter", json!(10));
            }
        }
        let next = data.value().as_i64().unwrap_or(0) + 1;
        data.set_value(json!(next));
        TransactionOutcome::Commit
    })
    .expect("transaction");

    assert!(committed);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(snapshot.expect("snapshot").value(), &json!(11));
}

#[test]
fn transaction_keeps_priority() {
    let backend = MemoryBackend::new();
    write(
        &backend,
        "n",
        WriteOp::Set {
            value: json!(1),
            priority: Some(json!(5)),
        },
    )
    .expect("set");
    let (snapshot, _) = transact(&backend, "n", |data| {
        data.set_value(json!(2));
        TransactionOutcome::Commit
    })
    .expect("transaction");
    assert_eq!(snapshot.expect("snapshot").priority(), Some(&json!(5)));
}
