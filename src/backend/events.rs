//! View diffing: which child events a state change raises for a listener.
//!
//! A listener's view is the arranged list of children its query selects.
//! Comparing the previous view with the new one yields, per event type:
//!   - `ChildRemoved` for keys that left the view (previous key taken from
//!     the old view),
//!   - `ChildAdded` for keys that entered it,
//!   - `ChildChanged` for keys whose value or priority changed,
//!   - `ChildMoved` for changed keys whose position relative to the other
//!     surviving children changed.
//!
//! Events come out in view order.

use std::collections::{HashMap, HashSet};

use super::query::Entry;
use super::EventType;

/// One child event: the child and the key of its preceding sibling.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildEvent {
    pub entry: Entry,
    pub previous_key: Option<String>,
}

/// Events raised when a listener first attaches to `view`.
pub fn initial_events(event: EventType, view: &[Entry]) -> Vec<ChildEvent> {
    match event {
        EventType::ChildAdded => with_previous_keys(view).collect(),
        _ => Vec::new(),
    }
}

/// Events of type `event` raised by moving from `old` to `new`.
pub fn diff(event: EventType, old: &[Entry], new: &[Entry]) -> Vec<ChildEvent> {
    match event {
        EventType::Value => Vec::new(),
        EventType::ChildRemoved => {
            let new_keys: HashSet<&str> = new.iter().map(|e| e.key.as_str()).collect();
            with_previous_keys(old)
                .filter(|ev| !new_keys.contains(ev.entry.key.as_str()))
                .collect()
        }
        EventType::ChildAdded => {
            let old_keys: HashSet<&str> = old.iter().map(|e| e.key.as_str()).collect();
            with_previous_keys(new)
                .filter(|ev| !old_keys.contains(ev.entry.key.as_str()))
                .collect()
        }
        EventType::ChildChanged => {
            let old_by_key = index(old);
            with_previous_keys(new)
                .filter(|ev| {
                    old_by_key
                        .get(ev.entry.key.as_str())
                        .is_some_and(|before| *before != &ev.entry)
                })
                .collect()
        }
        EventType::ChildMoved => moved(old, new),
    }
}

fn moved(old: &[Entry], new: &[Entry]) -> Vec<ChildEvent> {
    let old_by_key = index(old);
    let new_keys: HashSet<&str> = new.iter().map(|e| e.key.as_str()).collect();

    let common_before = common_predecessors(old.iter().filter(|e| new_keys.contains(e.key.as_str())));
    let common_after = common_predecessors(new.iter().filter(|e| old_by_key.contains_key(e.key.as_str())));

    with_previous_keys(new)
        .filter(|ev| {
            let key = ev.entry.key.as_str();
            let changed = old_by_key.get(key).is_some_and(|before| *before != &ev.entry);
            changed && common_before.get(key) != common_after.get(key)
        })
        .collect()
}

fn index(view: &[Entry]) -> HashMap<&str, &Entry> {
    view.iter().map(|e| (e.key.as_str(), e)).collect()
}

/// Map each key to the key before it, within the given sequence.
fn common_predecessors<'a>(
    entries: impl Iterator<Item = &'a Entry>,
) -> HashMap<&'a str, Option<&'a str>> {
    let mut previous = None;
    let mut out = HashMap::new();
    for entry in entries {
        out.insert(entry.key.as_str(), previous);
        previous = Some(entry.key.as_str());
    }
    out
}

fn with_previous_keys(view: &[Entry]) -> impl Iterator<Item = ChildEvent> + '_ {
    view.iter().enumerate().map(move |(i, entry)| ChildEvent {
        entry: entry.clone(),
        previous_key: i.checked_sub(1).map(|p| view[p].key.clone()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
