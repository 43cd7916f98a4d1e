//! Pulls a JSON object out of free-form model output.
//!
//! Models wrap structured answers in Markdown fences, surround them with prose,
//! or leak invisible characters into them. [`extract_json`] undoes all three:
//!
//! 1. strip a ```` ```json ```` fence if one is present,
//! 2. drop control and zero-width characters (newlines and tabs are kept),
//! 3. parse the whole text, then the first-`{`-to-last-`}` slice,
//! 4. retry the slice with raw line breaks flattened to spaces.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("response text is empty")]
    Empty,
    #[error("no JSON object found in response")]
    NoJsonObject,
    #[error("malformed JSON: {0}")]
    Malformed(String),
}

/// Removes a surrounding Markdown code fence, returning the inner text.
///
/// Text without a fence is returned trimmed. An unterminated fence yields
/// everything after the opening line.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed.to_string();
    };

    let after_open = &trimmed[open + 3..];
    // Skip the language tag on the opening line (```json, ```JSON, ...)
    let body = match after_open.find('\n') {
        Some(newline) => &after_open[newline + 1..],
        None => after_open.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };

    match body.find("```") {
        Some(close) => body[..close].trim().to_string(),
        None => body.trim().to_string(),
    }
}

/// Drops ASCII/Unicode control characters and zero-width marks.
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            if matches!(c, '\n' | '\r' | '\t') {
                return true;
            }
            !(c.is_control() || matches!(c, '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}'))
        })
        .collect()
}

/// Extracts the first JSON object embedded in `text`.
pub fn extract_json(text: &str) -> Result<Value, ExtractionError> {
    if text.trim().is_empty() {
        return Err(ExtractionError::Empty);
    }

    let cleaned = strip_control_chars(&strip_code_fences(text));

    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        return match value {
            Value::Object(_) => Ok(value),
            _ => Err(ExtractionError::NoJsonObject),
        };
    }

    let (start, end) = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => (start, end),
        _ => return Err(ExtractionError::NoJsonObject),
    };
    let candidate = &cleaned[start..=end];

    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            let flattened = candidate.replace(['\n', '\r', '\t'], " ");
            serde_json::from_str::<Value>(&flattened)
                .map_err(|_| ExtractionError::Malformed(first_err.to_string()))
        }
    }
}

/// Extracts a JSON object and deserializes it into `T`.
pub fn extract_as<T: DeserializeOwned>(text: &str) -> Result<T, ExtractionError> {
    let value = extract_json(text)?;
    serde_json::from_value(value).map_err(|e| ExtractionError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_json() {
        let value = extract_json(r#"{"queries": ["a", "b"]}"#).unwrap();
        assert_eq!(value, json!({"queries": ["a", "b"]}));
    }

    #[test]
    fn test_fenced_json() {
        let text = "```json\n{\"title\": \"Dengue\"}\n```";
        assert_eq!(extract_json(text).unwrap(), json!({"title": "Dengue"}));

        let bare_fence = "```\n{\"title\": \"Dengue\"}\n```";
        assert_eq!(extract_json(bare_fence).unwrap(), json!({"title": "Dengue"}));
    }

    #[test]
    fn test_json_with_surrounding_prose() {
        let text = "Sure! Here is the result:\n{\"topics\": []}\nLet me know if you need more.";
        assert_eq!(extract_json(text).unwrap(), json!({"topics": []}));
    }

    #[test]
    fn test_truncated_json() {
        let text = "{\"title\": \"Dengue\", \"summary\": \"The vaccine";
        assert_eq!(extract_json(text), Err(ExtractionError::NoJsonObject));

        let text = "{\"title\": \"Dengue\", \"summary\": {\"a\": 1}";
        assert!(matches!(extract_json(text), Err(ExtractionError::Malformed(_))));
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(extract_json(""), Err(ExtractionError::Empty));
        assert_eq!(extract_json("   \n "), Err(ExtractionError::Empty));
    }

    #[test]
    fn test_plain_prose() {
        assert_eq!(
            extract_json("I could not find any topics today."),
            Err(ExtractionError::NoJsonObject)
        );
    }

    #[test]
    fn test_top_level_array_is_rejected() {
        assert_eq!(extract_json("[1, 2, 3]"), Err(ExtractionError::NoJsonObject));
    }

    #[test]
    fn test_invisible_characters_are_removed() {
        let text = "\u{FEFF}{\"title\":\u{200B} \"Dengue\u{0007}\"}";
        assert_eq!(extract_json(text).unwrap(), json!({"title": "Dengue"}));
    }

    #[test]
    fn test_raw_newline_inside_string_is_repaired() {
        let text = "{\"summary\": \"first paragraph\nsecond paragraph\"}";
        let value = extract_json(text).unwrap();
        assert_eq!(value["summary"], "first paragraph second paragraph");
    }

    #[test]
    fn test_extract_as_typed() {
        #[derive(serde::Deserialize)]
        struct Plan {
            queries: Vec<String>,
        }
        let plan: Plan = extract_as("```json\n{\"queries\": [\"x\"]}\n```").unwrap();
        assert_eq!(plan.queries, vec!["x"]);

        let err = extract_as::<Plan>("{\"other\": 1}").err().unwrap();
        assert!(matches!(err, ExtractionError::Malformed(_)));
    }
}
