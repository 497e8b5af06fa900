//! Integration tests for the `Change` sum type and its decoder.

use rtdb_reactive::{
    mapping::{Change, ChangeKind, Identifiable},
    Snapshot, SnapshotChange,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Note {
    #[serde(default)]
    id: String,
    body: String,
}

impl Identifiable for Note {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

fn note_snapshot(key: &str, body: &str) -> Snapshot {
    Snapshot::new(key, json!({ "body": body }))
}

// ============================================================================
// Accessors
// ============================================================================

#[test]
fn accessors_are_uniform_across_variants() {
    for kind in ChangeKind::ALL {
        let change = Change::new(kind, 7, Some("prev".to_string()));
        assert_eq!(change.kind(), kind);
        assert_eq!(*change.value(), 7);
        assert_eq!(change.previous_key(), Some("prev"));
    }
}

#[test]
fn none_previous_key_means_first() {
    let change: Change<i32> = Change::Insert {
        value: 1,
        previous_key: None,
    };
    assert_eq!(change.previous_key(), None);
}

#[test]
fn map_keeps_tag_and_previous_key() {
    let change = Change::new(ChangeKind::Move, 2, Some("a".to_string()));
    let doubled = change.map(|v| v * 2);
    assert_eq!(
        doubled,
        Change::Move {
            value: 4,
            previous_key: Some("a".to_string())
        }
    );
}

#[test]
fn into_parts_splits_the_change() {
    let change = Change::new(ChangeKind::Delete, "x", None);
    assert_eq!(change.into_parts(), (ChangeKind::Delete, "x", None));
}

#[test]
fn kinds_map_to_child_events() {
    use rtdb_reactive::EventType;
    let events: Vec<EventType> = ChangeKind::ALL.iter().map(|k| k.event_type()).collect();
    assert_eq!(
        events,
        vec![
            EventType::ChildRemoved,
            EventType::ChildAdded,
            EventType::ChildMoved,
            EventType::ChildChanged,
        ]
    );
}

// ============================================================================
// decode
// ============================================================================

#[test]
fn decode_keeps_tag_and_previous_key() {
    let change: SnapshotChange = Change::new(ChangeKind::Update, note_snapshot("n1", "hello"), Some("n0".to_string()));
    let decoded = change.decode::<Note>().expect("decode").expect("some");
    assert_eq!(decoded.kind(), ChangeKind::Update);
    assert_eq!(decoded.previous_key(), Some("n0"));
    assert_eq!(
        decoded.value(),
        &Note {
            id: "n1".to_string(),
            body: "hello".to_string()
        }
    );
}

#[test]
fn change_without_value_decodes_to_none() {
    for kind in ChangeKind::ALL {
        let change: SnapshotChange = Change::new(kind, Snapshot::new("gone", Value::Null), None);
        assert!(change.decode::<Note>().expect("decode").is_none(), "{kind:?}");
    }
}

#[test]
fn decode_error_propagates() {
    let change: SnapshotChange = Change::new(ChangeKind::Insert, Snapshot::new("bad", json!({ "body": [] })), None);
    let err = change.decode::<Note>().unwrap_err();
    assert_eq!(err.key, "bad");
}

#[test]
fn try_map_skips_none() {
    let change = Change::new(ChangeKind::Insert, 1, None);
    let mapped: Result<Option<Change<i32>>, ()> = change.try_map(|_| Ok(None));
    assert_eq!(mapped, Ok(None));
}
