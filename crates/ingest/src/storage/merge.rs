//! JSON merge-patch (RFC 7396) used by every store backend

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Field set written by a merge
pub type Fields = Map<String, Value>;

/// Apply `patch` onto `target`
///
/// Objects merge key by key, `null` removes a key, anything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(target_map) = target else {
        return;
    };

    for (key, value) in patch_map {
        if value.is_null() {
            target_map.remove(key);
        } else {
            merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
        }
    }
}

/// Serialize a value into a merge field set
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields> {
    match serde_json::to_value(value).context("Failed to serialize document fields")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("Document fields must be an object, got {}", other),
    }
}
