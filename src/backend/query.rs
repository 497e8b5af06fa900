//! Query shape: ordering, range filters and limits over a location's
//! children.
//!
//! Orderings follow the database's conventions:
//!   - keys that look like 32-bit integers sort first, numerically, then all
//!     other keys lexicographically;
//!   - values sort `null < false < true < numbers < strings < maps`, ties
//!     broken by key.

use std::cmp::Ordering;

use serde_json::Value;

use crate::path::Reference;

// ============================================================================
// QueryParams
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OrderBy {
    #[default]
    Key,
    Value,
    Child(String),
    Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    First(usize),
    Last(usize),
}

/// Refinement applied to a location before reading or listening.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pub order_by: OrderBy,
    pub start_at: Option<Value>,
    pub end_at: Option<Value>,
    pub limit: Option<Limit>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by_key(mut self) -> Self {
        self.order_by = OrderBy::Key;
        self
    }

    pub fn order_by_value(mut self) -> Self {
        self.order_by = OrderBy::Value;
        self
    }

    pub fn order_by_child(mut self, child: impl Into<String>) -> Self {
        self.order_by = OrderBy::Child(child.into());
        self
    }

    pub fn order_by_priority(mut self) -> Self {
        self.order_by = OrderBy::Priority;
        self
    }

    pub fn start_at(mut self, value: Value) -> Self {
        self.start_at = Some(value);
        self
    }

    pub fn end_at(mut self, value: Value) -> Self {
        self.end_at = Some(value);
        self
    }

    pub fn equal_to(mut self, value: Value) -> Self {
        self.start_at = Some(value.clone());
        self.end_at = Some(value);
        self
    }

    pub fn limit_to_first(mut self, n: usize) -> Self {
        self.limit = Some(Limit::First(n));
        self
    }

    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit = Some(Limit::Last(n));
        self
    }

    /// `true` when the params select every child in key order.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Sort, filter and limit `entries` according to these params.
    pub fn arrange(&self, mut entries: Vec<Entry>) -> Vec<Entry> {
        entries.sort_by(|a, b| self.compare(a, b));

        entries.retain(|entry| {
            let sort_value = self.sort_value(entry);
            let after_start = self
                .start_at
                .as_ref()
                .map_or(true, |start| self.compare_bound(&sort_value, start) != Ordering::Less);
            let before_end = self
                .end_at
                .as_ref()
                .map_or(true, |end| self.compare_bound(&sort_value, end) != Ordering::Greater);
            after_start && before_end
        });

        match self.limit {
            Some(Limit::First(n)) => entries.truncate(n),
            Some(Limit::Last(n)) => {
                let skip = entries.len().saturating_sub(n);
                entries.drain(..skip);
            }
            None => {}
        }
        entries
    }

    fn sort_value(&self, entry: &Entry) -> Value {
        match &self.order_by {
            OrderBy::Key => Value::String(entry.key.clone()),
            OrderBy::Value => entry.value.clone(),
            OrderBy::Child(child) => child_value(&entry.value, child),
            OrderBy::Priority => entry.priority.clone().unwrap_or(Value::Null),
        }
    }

    fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        match &self.order_by {
            OrderBy::Key => compare_keys(&a.key, &b.key),
            _ => compare_values(&self.sort_value(a), &self.sort_value(b))
                .then_with(|| compare_keys(&a.key, &b.key)),
        }
    }

    fn compare_bound(&self, sort_value: &Value, bound: &Value) -> Ordering {
        match (&self.order_by, sort_value, bound) {
            (OrderBy::Key, Value::String(key), Value::String(bound)) => compare_keys(key, bound),
            _ => compare_values(sort_value, bound),
        }
    }
}

/// Value of `child` (a `/`-separated relative path) inside `value`.
fn child_value(value: &Value, child: &str) -> Value {
    child
        .split('/')
        .filter(|s| !s.is_empty())
        .try_fold(value, |node, segment| node.as_object()?.get(segment))
        .cloned()
        .unwrap_or(Value::Null)
}

// ============================================================================
// Query
// ============================================================================

/// A resolved location plus its refinement.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub reference: Reference,
    pub params: QueryParams,
}

impl Query {
    pub fn new(reference: Reference, params: QueryParams) -> Self {
        Self { reference, params }
    }

    /// The whole location, children in key order.
    pub fn at(reference: Reference) -> Self {
        Self::new(reference, QueryParams::default())
    }
}

// ============================================================================
// Entries and orderings
// ============================================================================

/// One child of a location, as seen by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub value: Value,
    pub priority: Option<Value>,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            priority: None,
        }
    }
}

fn integer_key(key: &str) -> Option<i32> {
    let digits = key.strip_prefix('-').unwrap_or(key);
    if digits.is_empty()
        || digits.len() > 10
        || !digits.bytes().all(|b| b.is_ascii_digit())
        || (digits.len() > 1 && digits.starts_with('0'))
        || key == "-0"
    {
        return None;
    }
    key.parse().ok()
}

/// Integer-like keys first (numerically), then lexicographic.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (integer_key(a), integer_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.len().cmp(&b.len())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) | Value::Object(_) => 5,
    }
}

/// Total order over tree values. Maps and lists compare equal to each
/// other, leaving the tie to the key.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
