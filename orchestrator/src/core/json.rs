//! Locating JSON objects inside free-form model output.

use serde_json::Value;

/// Return the first JSON object embedded in `text`.
///
/// Tries the whole (trimmed) text first, then every `{` position in order,
/// accepting the first that parses as an object. Trailing prose and code
/// fences around the object are ignored.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    for (idx, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[idx..]).into_iter::<Value>();
        if let Some(Ok(value @ Value::Object(_))) = stream.next() {
            return Some(value);
        }
    }
    None
}
