//! Small text helpers shared by the gateway and the UI.

/// Find the first complete JSON object embedded in free text.
///
/// Brace depth is tracked outside string literals only, so `"}"` inside a
/// value does not end the object early.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Cut `s` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_with_surrounding_text() {
        let text = r#"Here you go: {"key": "value"} hope that helps"#;
        assert_eq!(extract_json_object(text), Some(r#"{"key": "value"}"#));
    }

    #[test]
    fn test_extract_json_object_nested() {
        let text = r#"{"outer": {"inner": [1, 2]}}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn test_extract_json_object_ignores_braces_in_strings() {
        let text = r#"```json
{"notes": "closing } and opening { inside", "q": "say \"}\""}
```"#;
        let found = extract_json_object(text).unwrap();
        let value: serde_json::Value = serde_json::from_str(found).unwrap();
        assert_eq!(value["q"], "say \"}\"");
    }

    #[test]
    fn test_extract_json_object_absent_or_unclosed() {
        assert_eq!(extract_json_object("No JSON here"), None);
        assert_eq!(extract_json_object(r#"{"key": "value""#), None);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate_chars("ééééé", 4), "é...");
    }
}
