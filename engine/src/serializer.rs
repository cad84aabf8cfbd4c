//! Cross-boundary serializer: prepares a value to ship across the
//! isolated-worker boundary.
//!
//! Everything reaching this module is already JSON (the sandbox's
//! guest-value conversion in [`crate::sandbox`] handles the language-specific
//! collapse of procedures, ranges, and struct-like values into JSON first).
//! What is left here is exactly the structural part of the rule table: a
//! depth guard against circular/deeply-nested input, and recursive,
//! by-value copying of containers so the prepared tree owns everything it
//! points to.

use serde_json::Value;

/// Circular-reference / deep-nesting safety valve.
pub const MAX_DEPTH: usize = 100;

/// Pure function producing a value legal to ship across the worker boundary.
#[must_use]
pub fn prepare(value: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String(value.to_string());
    }
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(items) => Value::Array(items.iter().map(|v| prepare(v, depth + 1)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), prepare(v, depth + 1)))
                .collect(),
        ),
    }
}

/// Wrap an [`crucible_core::EngineError`] for shipping across the boundary,
/// matching rule 9 of the prepare table.
#[must_use]
pub fn prepare_exception(class: &str, message: &str, backtrace: &[String]) -> Value {
    serde_json::json!({
        "class": class,
        "message": prepare(&Value::String(message.to_string()), 0),
        "backtrace": prepare(&Value::from(backtrace.to_vec()), 0),
    })
}
