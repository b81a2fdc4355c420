//! Value helpers shared by the interpreter and charms.
//!
//! Script values are plain JSON values; these helpers give them the loose,
//! text-first semantics chat scripts expect.

use serde_json::{Number, Value};

/// Render a value the way it appears when substituted into text.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(num) => num.to_string(),
        other => other.to_string(),
    }
}

/// Script truthiness. Text is falsy when it spells out "nothing".
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(num) => num.as_f64().map(|n| n != 0.0 && !n.is_nan()).unwrap_or(true),
        Value::String(text) => {
            let lowered = text.trim().to_ascii_lowercase();
            !matches!(
                lowered.as_str(),
                "" | "false" | "0" | "null" | "undefined" | "no" | "off" | "nan"
            )
        }
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Interpret literal text: numbers, booleans, `null`, and quoted strings become
/// typed values; anything else stays a string.
pub fn coerce_literal(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.len() >= 2 {
        let bytes = trimmed.as_bytes();
        let quoted = (bytes[0] == b'"' && bytes[trimmed.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[trimmed.len() - 1] == b'\'');
        if quoted {
            return Value::String(trimmed[1..trimmed.len() - 1].to_string());
        }
    }
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if let Some(num) = Number::from_f64(float) {
            return Value::Number(num);
        }
    }
    Value::String(trimmed.to_string())
}

/// Numeric view of a value, parsing text when necessary.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(num) => num.as_f64(),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// Type name used by the `is` comparison operator.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Walk a dotted path into a structured value. Array segments are indices.
pub fn descend<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
