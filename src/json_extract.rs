//! Locating JSON objects embedded in LLM prose.

use serde_json::Value;

use crate::errors::AppError;

/// Returns the first balanced `{ ... }` substring of `text`.
///
/// Braces inside JSON string literals (including escaped quotes) do not
/// count. If an opening brace is never closed the scan restarts at the next
/// opening brace after it.
pub fn find_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(bytes, start) {
            return Some(&text[start..=end]);
        }
        search_from = start + 1;
    }

    None
}

/// Index of the brace closing the object opened at `start`, if any.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }

    None
}

/// Locates and parses the first JSON object in `text`.
pub fn parse_json_object(text: &str) -> Result<Value, AppError> {
    let candidate = find_json_object(text)
        .ok_or_else(|| AppError::Parse("No JSON object found in LLM response".to_string()))?;

    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| AppError::Parse(format!("Invalid JSON in LLM response: {}", e)))?;

    if !value.is_object() {
        return Err(AppError::Parse("Located JSON is not an object".to_string()));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_inside_prose() {
        let text = "Here is the result:\n```json\n{\"a\": {\"b\": 1}}\n```\nThanks!";
        assert_eq!(find_json_object(text), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn test_braces_in_strings_ignored() {
        let text = r#"noise {"reason": "uses } and { and \" quotes", "x": 2} trailing {"y": 3}"#;
        let found = find_json_object(text).unwrap();
        let value: Value = serde_json::from_str(found).unwrap();
        assert_eq!(value["x"], 2);
    }

    #[test]
    fn test_unclosed_brace_skipped() {
        let text = "{ broken start {\"ok\": true}";
        assert_eq!(find_json_object(text), Some("{\"ok\": true}"));
    }

    #[test]
    fn test_no_object() {
        assert_eq!(find_json_object("no json here"), None);
        assert_eq!(parse_json_object("[1, 2, 3]").unwrap_err().kind(), "parse");
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = parse_json_object("{not: valid}").unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn test_multibyte_text_around_object() {
        let text = "評估結果如下：{\"totalScore\": 15}。謝謝";
        let value = parse_json_object(text).unwrap();
        assert_eq!(value["totalScore"], 15);
    }
}
