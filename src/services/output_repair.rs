//! Lightweight repair of oracle output before JSON parsing.
//!
//! Models wrap JSON in markdown fences or surround it with prose even when
//! told not to. Repair never invents content: it only trims away what is
//! outside the outermost JSON object.

use serde_json::{Map, Value};

/// Strip a surrounding markdown code block.
///
/// Handles ```` ```json\n{...}\n``` ```` and ```` ```\n{...}\n``` ````.
pub fn strip_markdown_code_blocks(output: &str) -> &str {
    let trimmed = output.trim();
    if !(trimmed.len() >= 6 && trimmed.starts_with("```") && trimmed.ends_with("```")) {
        return trimmed;
    }

    let start = trimmed.find('\n').map_or(3, |pos| pos + 1);
    let end = trimmed.rfind("\n```").unwrap_or(trimmed.len() - 3);
    if start >= end {
        return trimmed;
    }
    trimmed[start..end].trim()
}

/// Slice from the first `{` to the last `}`, if both exist in order.
pub fn extract_outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Repair and parse raw oracle text into a JSON object.
pub fn parse_json_object(raw: &str) -> Result<Map<String, Value>, String> {
    let cleaned = strip_markdown_code_blocks(raw);
    if cleaned.is_empty() {
        return Err("empty output".to_string());
    }

    let parsed = match serde_json::from_str::<Value>(cleaned) {
        Ok(value) => value,
        Err(first) => {
            let candidate = extract_outermost_object(cleaned)
                .ok_or_else(|| format!("no JSON object found: {first}"))?;
            serde_json::from_str::<Value>(candidate).map_err(|e| format!("invalid JSON: {e}"))?
        }
    };

    match parsed {
        Value::Object(map) => Ok(map),
        other => Err(format!("expected a JSON object, got {}", json_kind(&other))),
    }
}

/// Required keys absent from `object`, in the order given.
pub fn missing_keys(object: &Map<String, Value>, required: &[&'static str]) -> Vec<&'static str> {
    required
        .iter()
        .copied()
        .filter(|key| !object.contains_key(*key))
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
