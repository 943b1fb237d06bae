//! Best-effort conversion of metadata values.
//!
//! Metadata literals are stored as [`serde_json::Value`]s. Typed accessors
//! ([`Metadata::get_as`](crate::metadata::Metadata::get_as) and friends) run
//! the stored value through [`convert`], which first tries a strict serde
//! deserialization and then a short list of coercions:
//!
//! | Stored | Requested | Coercion |
//! |---|---|---|
//! | `"42"` | integer / float | parse the trimmed string |
//! | `"true"` | bool | case-insensitive parse |
//! | `42`, `true` | `String` | display form |
//! | any scalar | `Vec<T>` | single-element list |
//! | `[x]` | scalar | the only element |
//!
//! Anything else is a conversion failure, reported as `None` so the caller
//! can fall back to its default.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Number, Value};

/// Convert a value to `T`, coercing between scalars and single-element lists.
pub fn convert<T: DeserializeOwned>(value: &Value) -> Option<T> {
    if let Ok(converted) = <T as Deserialize>::deserialize(value) {
        return Some(converted);
    }
    coercions(value)
        .into_iter()
        .find_map(|candidate| <T as Deserialize>::deserialize(&candidate).ok())
}

/// Convert a value to a list of `T`.
///
/// Arrays convert element by element and fail as a whole if any element
/// fails. Scalars become a one-element list.
pub fn convert_list<T: DeserializeOwned>(value: &Value) -> Option<Vec<T>> {
    match value {
        Value::Array(items) => items.iter().map(convert).collect(),
        Value::Null => None,
        other => convert(other).map(|single| vec![single]),
    }
}

/// Display form of a value: strings unquoted, scalars via `to_string`,
/// `None` for null, arrays and objects.
pub fn to_display_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) if items.len() == 1 => to_display_string(&items[0]),
        _ => None,
    }
}

fn coercions(value: &Value) -> Vec<Value> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            let mut out = Vec::new();
            if let Ok(int) = trimmed.parse::<i64>() {
                out.push(Value::Number(int.into()));
            } else if let Ok(uint) = trimmed.parse::<u64>() {
                out.push(Value::Number(uint.into()));
            } else if let Some(float) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
                out.push(Value::Number(float));
            }
            if trimmed.eq_ignore_ascii_case("true") {
                out.push(Value::Bool(true));
            } else if trimmed.eq_ignore_ascii_case("false") {
                out.push(Value::Bool(false));
            }
            out.push(Value::Array(vec![value.clone()]));
            out
        }
        Value::Number(n) => vec![
            Value::String(n.to_string()),
            Value::Array(vec![value.clone()]),
        ],
        Value::Bool(b) => vec![
            Value::String(b.to_string()),
            Value::Array(vec![value.clone()]),
        ],
        Value::Array(items) if items.len() == 1 => {
            let mut out = vec![items[0].clone()];
            out.extend(coercions(&items[0]));
            out
        }
        _ => Vec::new(),
    }
}
