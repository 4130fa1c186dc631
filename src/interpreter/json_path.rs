//! Shared JMESPath application for `network_replay.response.path` and
//! `network_extract.path`
//!
//! Path *syntax* is validated at load time by
//! [`crate::pack::validator::validate`]; this module only applies an
//! already-valid expression to a runtime value, turning "no match" or an
//! unsupported data shape into a diagnostic hint rather than a hard error
//! (e.g. "JMESPath path `results[*].company` matched 0 items").

use serde_json::Value;

use crate::pack::flow::ResponseAs;

/// Parse `raw` per `as_`: `Json` parses as JSON, `Text` wraps the raw string.
#[must_use]
pub fn parse_body(as_: ResponseAs, raw: &str) -> Value {
    match as_ {
        ResponseAs::Json => serde_json::from_str(raw).unwrap_or(Value::Null),
        ResponseAs::Text => Value::String(raw.to_string()),
    }
}

/// Apply an optional JMESPath expression to `value`. Any failure (bad
/// expression application, no match) is surfaced as a pushed hint rather than
/// an error — the step still succeeds, writing `Value::Null`.
pub fn apply_path(value: &Value, path: Option<&str>, hints: &mut Vec<String>) -> Value {
    let Some(expr) = path else { return value.clone() };

    let compiled = match jmespath::compile(expr) {
        Ok(compiled) => compiled,
        Err(e) => {
            hints.push(format!("JMESPath path `{expr}` failed to compile: {e}"));
            return Value::Null;
        }
    };

    let searched = match compiled.search(value) {
        Ok(result) => result,
        Err(e) => {
            hints.push(format!("JMESPath path `{expr}` encountered an unsupported construct: {e}"));
            return Value::Null;
        }
    };

    match serde_json::to_value(&*searched) {
        Ok(Value::Null) => {
            hints.push(format!("JMESPath path `{expr}` matched 0 items"));
            Value::Null
        }
        Ok(Value::Array(items)) if items.is_empty() => {
            hints.push(format!("JMESPath path `{expr}` matched 0 items"));
            Value::Array(items)
        }
        Ok(other) => other,
        Err(e) => {
            hints.push(format!("JMESPath path `{expr}` produced a value that couldn't be serialized: {e}"));
            Value::Null
        }
    }
}
