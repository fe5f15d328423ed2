//! Stable string keys for sampling candidates.
//!
//! Candidates may be structured values (maps, lists) that are neither
//! hashable nor ordered. History and frequency bookkeeping work on a
//! canonical key instead:
//!
//! - strings are used verbatim,
//! - numbers, booleans, and null use their JSON text,
//! - arrays and objects use compact JSON with object keys sorted
//!   recursively, so field order never changes the key.

use genloop_core::{GenError, GenResult};
use serde::Serialize;
use serde_json::Value;

/// Canonical key for any serializable candidate.
///
/// # Errors
///
/// Returns `GenError::Serialization` if the candidate cannot be represented
/// as JSON (for example, a map with non-string keys).
pub fn canonical_key<T: Serialize + ?Sized>(item: &T) -> GenResult<String> {
    let value = serde_json::to_value(item).map_err(|error| GenError::Serialization {
        detail: error.to_string(),
    })?;
    Ok(value_key(&value))
}

/// Canonical key for an already-decoded JSON value.
#[must_use]
pub fn value_key(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => {
            let mut out = String::new();
            write_canonical(other, &mut out);
            out
        }
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (idx, (key, item)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
