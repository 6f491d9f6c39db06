//! Capture policy: how much of a producer payload to retain.

use flightrec_core::CaptureMode;
use serde_json::{json, Value};

/// Character cap on summary previews.
pub const SUMMARY_PREVIEW_CHARS: usize = 256;

/// Apply a capture mode to a payload value.
///
/// `Full` keeps the value, `Off` drops it, `Summary` replaces it with a
/// small descriptor: type tag, serialized byte size, truncated preview.
pub fn apply_capture(value: Value, mode: CaptureMode) -> Option<Value> {
    match mode {
        CaptureMode::Full => Some(value),
        CaptureMode::Off => None,
        CaptureMode::Summary => Some(summarize(&value)),
    }
}

fn summarize(value: &Value) -> Value {
    let serialized = value.to_string();
    json!({
        "summary": true,
        "type": type_tag(value),
        "bytes": serialized.len(),
        "preview": truncate_chars(&serialized, SUMMARY_PREVIEW_CHARS),
    })
}

fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Truncate on a char boundary, never mid code point.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    s.chars().take(max_chars).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
