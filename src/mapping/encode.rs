//! Typed record → semantic tree, for writes.
//!
//! The top-level `id` field is dropped: the location key already carries it
//! and the decoder re-injects it on the way back.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::EncodeError;

const ID_FIELD: &str = "id";

/// Serialize `value` into a tree value, stripping a top-level `id` field.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Value, EncodeError> {
    let mut encoded = serde_json::to_value(value).map_err(EncodeError::NotSerializable)?;
    if let Value::Object(map) = &mut encoded {
        map.shift_remove(ID_FIELD);
    }
    Ok(encoded)
}

/// Like [`encode`] but requires the result to be a map, as merges do.
pub fn encode_map<T: Serialize + ?Sized>(value: &T) -> Result<Map<String, Value>, EncodeError> {
    match encode(value)? {
        Value::Object(map) => Ok(map),
        other => Err(EncodeError::NotAMap(kind_name(&other))),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
