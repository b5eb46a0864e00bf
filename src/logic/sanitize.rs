use serde_json::{Map, Value};

/// Strips UI-internal keys and empty values from a raw form payload before
/// it reaches evaluation or storage.
///
/// Keys starting with `__` are reserved for client-side mirror/formula/
/// condition markers and are dropped, as are keys whose value is null or the
/// empty string. Arrays and nested objects are walked recursively; any other
/// value passes through unchanged.
pub fn sanitize(input: &Value) -> Value {
    match input {
        Value::Object(map) => Value::Object(sanitize_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

/// Object-shaped variant of [`sanitize`] for callers that already hold a map.
pub fn sanitize_map(input: &Map<String, Value>) -> Map<String, Value> {
    let mut cleaned = Map::new();
    for (key, value) in input {
        if key.starts_with("__") {
            continue;
        }
        if value.is_null() {
            continue;
        }
        if matches!(value, Value::String(s) if s.is_empty()) {
            continue;
        }
        cleaned.insert(key.clone(), sanitize(value));
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_removes_technical_keys() {
        let input = json!({"a": "1", "__mirror_b": "2", "c": "", "d": null});
        assert_eq!(sanitize(&input), json!({"a": "1"}));
    }

    #[test]
    fn test_sanitize_recurses_into_nested_structures() {
        let input = json!({
            "outer": {"__activeTab": "ui-state", "kept": 5},
            "list": [{"__marker": true, "x": "y"}, "plain", 3]
        });
        assert_eq!(
            sanitize(&input),
            json!({"outer": {"kept": 5}, "list": [{"x": "y"}, "plain", 3]})
        );
    }

    #[test]
    fn test_sanitize_keeps_falsy_but_meaningful_values() {
        let input = json!({"zero": 0, "no": false, "blank_object": {}});
        assert_eq!(sanitize(&input), input);
    }

    #[test]
    fn test_sanitize_passes_non_objects_through() {
        assert_eq!(sanitize(&json!(42)), json!(42));
        assert_eq!(sanitize(&json!("text")), json!("text"));
        assert_eq!(sanitize(&json!(null)), json!(null));
    }
}
