//! Pull JSON out of free-form model output.
//!
//! Models wrap JSON in prose or markdown fences. Extraction takes the span
//! from the first opening bracket to the last closing one, and falls back to
//! stripping fences.

use crate::types::{MapperError, Result};
use serde::de::DeserializeOwned;

/// Strip markdown code blocks.
///
/// Handles:
/// - ```json ... ```
/// - ```JSON ... ```
/// - ``` ... ```
pub fn strip_markdown(text: &str) -> String {
    let text = text.trim();

    if text.starts_with("```") {
        let start = text.find('\n').map(|i| i + 1).unwrap_or(3);
        let end = text.rfind("```").filter(|&e| e >= start).unwrap_or(text.len());
        return text[start..end].trim().to_string();
    }

    text.to_string()
}

fn extract_between<T: DeserializeOwned>(text: &str, open: char, close: char) -> Result<T> {
    let text = text.trim();
    if text.is_empty() {
        return Err(MapperError::ExtractionError("empty response".to_string()));
    }

    if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&text[start..=end]) {
                return Ok(value);
            }
        }
    }

    serde_json::from_str(&strip_markdown(text)).map_err(|e| {
        let preview: String = text.chars().take(100).collect();
        MapperError::ExtractionError(format!("invalid JSON ({}): {}...", e, preview))
    })
}

/// Parse the outermost JSON array in `text`.
///
/// # Errors
///
/// Returns `MapperError::ExtractionError` if no valid JSON is found
pub fn extract_array<T: DeserializeOwned>(text: &str) -> Result<Vec<T>> {
    extract_between(text, '[', ']')
}

/// Parse the outermost JSON object in `text`.
///
/// # Errors
///
/// Returns `MapperError::ExtractionError` if no valid JSON is found
pub fn extract_object<T: DeserializeOwned>(text: &str) -> Result<T> {
    extract_between(text, '{', '}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_strip_markdown() {
        assert_eq!(strip_markdown("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_markdown("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_markdown("  plain  "), "plain");
    }

    #[test]
    fn test_array_from_prose() {
        let text = "Here are the decisions:\n[{\"field_index\": 1}, {\"field_index\": 2}]\nLet me know.";
        let items: Vec<Value> = extract_array(text).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["field_index"], 2);
    }

    #[test]
    fn test_object_in_fence() {
        let text = "```json\n{\"corrections\": [{\"row_index\": 3}]}\n```";
        let value: Value = extract_object(text).unwrap();
        assert_eq!(value["corrections"][0]["row_index"], 3);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(extract_array::<Value>("no json here").is_err());
        assert!(extract_object::<Value>("{not json}").is_err());
        assert!(matches!(
            extract_array::<Value>("   ").unwrap_err(),
            MapperError::ExtractionError(_)
        ));
    }
}
