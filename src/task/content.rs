// src/task/content.rs

use indexmap::IndexMap;
use serde_json::Value;

use crate::errors::{Result, TraindError};

/// Flat key/value task content, in the order the producer wrote it.
pub type TaskContent = IndexMap<String, String>;

/// Parse a message body into task content.
///
/// The body must be a JSON object whose values are scalars. Strings are kept
/// verbatim; numbers and booleans are forwarded in their JSON spelling.
/// Nulls, arrays and nested objects are rejected.
pub fn parse_content(body: &str) -> Result<TaskContent> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| TraindError::InvalidContent(format!("not valid JSON: {e}")))?;

    let Value::Object(map) = value else {
        return Err(TraindError::InvalidContent(
            "expected a JSON object at the top level".to_string(),
        ));
    };

    let mut content = TaskContent::with_capacity(map.len());
    for (key, value) in map {
        let text = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(TraindError::InvalidContent(format!(
                    "value for '{key}' must be a string, number or boolean (got {other})"
                )));
            }
        };
        content.insert(key, text);
    }
    Ok(content)
}

/// Short single-line rendering used in log fields.
pub(crate) fn summary(content: &TaskContent) -> String {
    content
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}
