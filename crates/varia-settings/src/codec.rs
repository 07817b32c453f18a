//! Encode/decode rules for stored setting values.
//!
//! A setting's value column holds either a raw scalar string or a
//! JSON-encoded compound structure, discriminated by `is_array_value`. The
//! helpers here are pure; read paths degrade on malformed input instead of
//! propagating parse errors.

use serde_json::Value;

/// A value encoded for storage: the discriminator and the column text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    /// Whether the value is a JSON-encoded compound structure.
    pub is_array_value: bool,
    /// Column text; `None` clears the stored value.
    pub value: Option<String>,
}

/// Whether a caller-supplied value is a compound structure.
#[must_use]
pub fn is_compound(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}

/// Encode a caller-supplied value for storage.
///
/// Compound values are JSON-encoded; scalars are stored as their raw text
/// (strings unquoted); `null` clears the value.
#[must_use]
pub fn encode(value: &Value) -> EncodedValue {
    match value {
        Value::Null => EncodedValue {
            is_array_value: false,
            value: None,
        },
        Value::String(text) => EncodedValue {
            is_array_value: false,
            value: Some(text.clone()),
        },
        Value::Bool(_) | Value::Number(_) => EncodedValue {
            is_array_value: false,
            value: Some(value.to_string()),
        },
        Value::Array(_) | Value::Object(_) => EncodedValue {
            is_array_value: true,
            value: Some(value.to_string()),
        },
    }
}

/// Decode a stored value for display, degrading on malformed input.
///
/// Array-valued settings decode through JSON (`None` on failure); scalars
/// surface as their raw string.
#[must_use]
pub fn decode_stored(value: Option<&str>, is_array_value: bool) -> Option<Value> {
    let raw = value?;
    if is_array_value {
        serde_json::from_str(raw).ok()
    } else {
        Some(Value::String(raw.to_string()))
    }
}

/// Compare a new value against the previously stored raw value.
///
/// The old value is decoded through the same array/scalar path as the new one
/// so a JSON string never compares against its decoded form. A shape change
/// between scalar and compound always counts as changed, whichever way it
/// goes.
#[must_use]
pub fn values_equal(new: &Value, old_raw: Option<&str>, stored_is_array: bool) -> bool {
    let new_is_compound = is_compound(new);
    if new_is_compound != stored_is_array {
        return false;
    }

    if new_is_compound {
        return old_raw
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .is_some_and(|old| old == *new);
    }

    match (new, old_raw) {
        (Value::Null, None) => true,
        (Value::Null, Some(_)) | (_, None) => false,
        (Value::String(text), Some(old)) => text == old,
        (other, Some(old)) => other.to_string() == old,
    }
}

/// Extract attachment ids from a stored file-type value.
///
/// Supports a bare id, a JSON-quoted id, a JSON number, and a JSON array of
/// ids; anything else yields no ids. Empty and whitespace-only values mean
/// "no file".
#[must_use]
pub fn attachment_ids(value: Option<&str>) -> Vec<String> {
    let Some(raw) = value else {
        return Vec::new();
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items.iter().filter_map(scalar_id).collect(),
        Ok(ref single) => scalar_id(single).into_iter().collect(),
        // Not JSON at all: treat the raw text as a single id.
        Err(_) => vec![trimmed.to_string()],
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
