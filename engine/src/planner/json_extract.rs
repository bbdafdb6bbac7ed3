//! Locating a JSON object inside free-form model output.
//!
//! Models wrap JSON in prose or markdown fences. Every `{` is tried as a
//! candidate start; the first balanced substring that parses as an object
//! wins.

use serde_json::{Map, Value};

/// Return the first syntactically valid JSON object embedded in `text`
pub fn extract_first_json_object(text: &str) -> Option<Map<String, Value>> {
    text.char_indices()
        .filter(|(_, ch)| *ch == '{')
        .filter_map(|(start, _)| extract_balanced_json(&text[start..]))
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

/// Extract a balanced `{...}` prefix of `s`, honouring string literals and
/// escapes. `s` must start with `{`.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
