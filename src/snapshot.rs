//! Snapshot: an immutable, point-in-time view of one location.
//!
//! The value is a semantic tree (`serde_json::Value` built with
//! `preserve_order`, so map children keep the order the backend produced).

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    key: String,
    value: Value,
    priority: Option<Value>,
}

impl Snapshot {
    /// Snapshot of `key` holding `value`. `Value::Null` means "no data".
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: Option<Value>) -> Self {
        self.priority = priority;
        self
    }

    /// Key of the location. Empty for the root.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn priority(&self) -> Option<&Value> {
        self.priority.as_ref()
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    pub fn has_children(&self) -> bool {
        match &self.value {
            Value::Object(map) => !map.is_empty(),
            Value::Array(items) => !items.is_empty(),
            _ => false,
        }
    }

    pub fn children_count(&self) -> usize {
        match &self.value {
            Value::Object(map) => map.len(),
            Value::Array(items) => items.len(),
            _ => 0,
        }
    }

    /// Child snapshots in stored order. List elements are keyed by index.
    pub fn children(&self) -> Vec<Snapshot> {
        match &self.value {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Snapshot::new(k.clone(), v.clone()))
                .collect(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| Snapshot::new(i.to_string(), v.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Snapshot of a direct child. Missing children are non-existent
    /// snapshots, never errors.
    pub fn child(&self, key: &str) -> Snapshot {
        let value = match &self.value {
            Value::Object(map) => map.get(key).cloned(),
            Value::Array(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned()),
            _ => None,
        };
        Snapshot::new(key, value.unwrap_or(Value::Null))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
