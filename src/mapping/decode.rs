//! Snapshot decoder.
//!
//! Absence is not an error: a non-existent snapshot, or one holding an
//! explicit null, decodes to `Ok(None)` for every target type.

use std::collections::HashSet;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::DecodeError;
use crate::snapshot::Snapshot;

/// A record whose identifier is the key of the location it is stored at.
pub trait Identifiable {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
}

/// Decode `snapshot` into `T`, overwriting `T`'s id with the snapshot key.
pub fn decode<T>(snapshot: &Snapshot) -> Result<Option<T>, DecodeError>
where
    T: DeserializeOwned + Identifiable,
{
    decode_value(snapshot.key(), snapshot.value())
}

/// Decode every existing child of `snapshot`, in order.
///
/// Fails on the first child that does not match `T`. A snapshot without
/// children yields an empty list.
pub fn decode_list<T>(snapshot: &Snapshot) -> Result<Vec<T>, DecodeError>
where
    T: DeserializeOwned + Identifiable,
{
    let mut values = Vec::with_capacity(snapshot.children_count());
    for child in snapshot.children() {
        if let Some(value) = decode(&child)? {
            values.push(value);
        }
    }
    Ok(values)
}

/// Like [`decode_list`], collected into a set.
pub fn decode_set<T>(snapshot: &Snapshot) -> Result<HashSet<T>, DecodeError>
where
    T: DeserializeOwned + Identifiable + Eq + Hash,
{
    Ok(decode_list(snapshot)?.into_iter().collect())
}

fn decode_value<T>(key: &str, value: &Value) -> Result<Option<T>, DecodeError>
where
    T: DeserializeOwned + Identifiable,
{
    if value.is_null() {
        return Ok(None);
    }

    let mut value = value.clone();
    if let Value::Object(fields) = &mut value {
        fields.insert("id".to_string(), Value::String(key.to_string()));
    }

    let mut decoded: T = serde_json::from_value(value).map_err(|source| DecodeError {
        key: key.to_string(),
        source,
    })?;
    decoded.set_id(key.to_string());
    Ok(Some(decoded))
}

// ============================================================================
// Untyped projection
// ============================================================================

/// Key, raw data and ordering hint of a snapshot, without a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotData {
    pub id: String,
    pub data: Value,
    pub previous_key: Option<String>,
}

pub fn snapshot_data(snapshot: &Snapshot, previous_key: Option<String>) -> SnapshotData {
    SnapshotData {
        id: snapshot.key().to_string(),
        data: snapshot.value().clone(),
        previous_key,
    }
}
