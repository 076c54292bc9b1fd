//! Pure reference-template resolution, kept separate from dispatch so it is
//! trivially unit-testable (and so a future strict mode can reject
//! unresolved references without touching the executor).

use std::collections::HashMap;

use serde_json::Value;

use super::model::TaskResult;

/// Replace every `${<id>.result.<dot.path>}` template found in `params` with
/// the value reached by walking `results[id].result` along the dot path.
/// Unresolved references (unknown task id, missing path) are left as the
/// literal template string, per the engine's "preserve input" policy.
pub fn resolve(
    params: &HashMap<String, Value>,
    results: &HashMap<String, TaskResult>,
) -> HashMap<String, Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, results)))
        .collect()
}

fn resolve_value(value: &Value, results: &HashMap<String, TaskResult>) -> Value {
    match value {
        Value::String(s) => resolve_string(s, results),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, results)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, results)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Parse `${<id>.result.<dot.path>}` into `(id, path)`, `path` empty when the
/// template ends right after `.result`. Returns `None` when `s` is not
/// exactly one such template.
fn parse_template(s: &str) -> Option<(&str, &str)> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    let (id, rest) = inner.split_once(".result")?;
    if id.is_empty() || id.contains('.') {
        return None;
    }
    let path = match rest.strip_prefix('.') {
        Some(p) => p,
        None if rest.is_empty() => rest,
        None => return None,
    };
    Some((id, path))
}

fn resolve_string(s: &str, results: &HashMap<String, TaskResult>) -> Value {
    let Some((task_id, path)) = parse_template(s) else {
        return Value::String(s.to_string());
    };

    if let Some(result) = results.get(task_id) {
        if let Some(base) = &result.result {
            if let Some(found) = walk_path(base, path) {
                return found.clone();
            }
        }
    }
    Value::String(s.to_string())
}

fn walk_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::model::{TaskResult, TaskStatus};
    use chrono::Utc;
    use serde_json::json;

    fn result_with(task_id: &str, value: Value) -> TaskResult {
        let now = Utc::now();
        TaskResult {
            task_id: task_id.to_string(),
            status: TaskStatus::Success,
            result: Some(value),
            error: None,
            start: now,
            end: now,
            duration_ms: 0,
        }
    }

    #[test]
    fn resolves_nested_dot_path() {
        let mut results = HashMap::new();
        results.insert(
            "p".to_string(),
            result_with("p", json!({"data": {"nested": {"value": 42}}})),
        );
        let mut params = HashMap::new();
        params.insert(
            "val".to_string(),
            Value::String("${p.result.data.nested.value}".to_string()),
        );

        let resolved = resolve(&params, &results);
        assert_eq!(resolved["val"], json!(42));
    }

    #[test]
    fn unresolved_reference_preserves_literal() {
        let results = HashMap::new();
        let mut params = HashMap::new();
        params.insert(
            "val".to_string(),
            Value::String("${missing.result.data}".to_string()),
        );
        let resolved = resolve(&params, &results);
        assert_eq!(resolved["val"], json!("${missing.result.data}"));
    }

    #[test]
    fn non_template_strings_pass_through() {
        let results = HashMap::new();
        let mut params = HashMap::new();
        params.insert("literal".to_string(), Value::String("hello".to_string()));
        let resolved = resolve(&params, &results);
        assert_eq!(resolved["literal"], json!("hello"));
    }

    #[test]
    fn bare_result_reference_without_path_returns_whole_value() {
        let mut results = HashMap::new();
        results.insert("p".to_string(), result_with("p", json!({"ok": true})));
        let mut params = HashMap::new();
        params.insert("val".to_string(), Value::String("${p.result}".to_string()));
        let resolved = resolve(&params, &results);
        assert_eq!(resolved["val"], json!({"ok": true}));
    }
}
