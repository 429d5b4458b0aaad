use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    NotFound,
    Invalid(String),
}

impl ExtractError {
    pub fn reason(&self) -> String {
        match self {
            ExtractError::NotFound => "no JSON found in response".to_string(),
            ExtractError::Invalid(detail) => format!("invalid JSON in response: {detail}"),
        }
    }
}

/// Parse the first balanced JSON object or array embedded in `text`.
///
/// Models often wrap structured output in prose or code fences; everything
/// outside the first balanced `{...}` / `[...]` is ignored.
pub fn extract_json(text: &str) -> Result<Value, ExtractError> {
    let start = text.find(|c: char| c == '{' || c == '[').ok_or(ExtractError::NotFound)?;
    let end = balanced_end(&text[start..])
        .ok_or_else(|| ExtractError::Invalid("unbalanced brackets".to_string()))?;
    serde_json::from_str(&text[start..start + end])
        .map_err(|err| ExtractError::Invalid(err.to_string()))
}

/// Byte length of the balanced bracket run at the start of `text`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
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
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_object_from_prose() {
        let text = "Sure! Here it is:\n```json\n{\"score\": 7, \"tags\": [\"a\"]}\n```\nAnything else?";
        assert_eq!(extract_json(text).unwrap(), json!({"score": 7, "tags": ["a"]}));
    }

    #[test]
    fn extracts_top_level_array() {
        assert_eq!(extract_json("list: [1, [2, 3]] done").unwrap(), json!([1, [2, 3]]));
    }

    #[test]
    fn stops_at_first_balanced_value() {
        let text = r#"{"a": 1} and later {"b": 2}"#;
        assert_eq!(extract_json(text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn brackets_inside_strings_are_ignored() {
        let text = r#"{"note": "use } and \" carefully", "n": [1]}"#;
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"note": "use } and \" carefully", "n": [1]})
        );
    }

    #[test]
    fn missing_json_is_reported() {
        assert_eq!(extract_json("no structure here"), Err(ExtractError::NotFound));
    }

    #[test]
    fn broken_json_is_invalid() {
        assert!(matches!(extract_json("{\"a\": 1"), Err(ExtractError::Invalid(_))));
        assert!(matches!(extract_json("{\"a\": 1]"), Err(ExtractError::Invalid(_))));
        assert!(matches!(extract_json("{a: 1}"), Err(ExtractError::Invalid(_))));
    }
}
