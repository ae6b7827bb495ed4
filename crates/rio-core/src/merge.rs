//! Recursive merge of JSON documents.
//!
//! [`deep_merge`] folds a `source` document into a `target` **in place**; the
//! source is only borrowed. Use [`merged`] for a non-mutating copy.
//!
//! Key suffixes in `source` select how sequences are combined:
//!
//! | Key      | Effect on `target[key]`                                   |
//! |----------|-----------------------------------------------------------|
//! | `key+`   | append the source items that are not already present     |
//! | `key-`   | replace wholesale                                         |
//! | `key`    | mappings merge recursively; equal-length sequences merge  |
//! |          | index by index; anything else is replaced                 |
//!
//! During an index-wise merge a source element that is `null`, `""`, `[]` or
//! `{}` is a placeholder and leaves the target element untouched. Appending
//! with `+` deduplicates, which also gives set-union semantics.

use serde_json::{Map, Value};

/// Merge `source` into `target`, mutating `target`.
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => merge_maps(target, source),
        (Value::Array(target), Value::Array(source)) if target.len() == source.len() => {
            for (existing, incoming) in target.iter_mut().zip(source) {
                if is_placeholder(incoming) {
                    continue;
                }
                deep_merge(existing, incoming);
            }
        }
        (target, source) => *target = normalized(source),
    }
}

/// Merge `source` into a copy of `target`.
#[must_use]
pub fn merged(target: &Value, source: &Value) -> Value {
    let mut out = target.clone();
    deep_merge(&mut out, source);
    out
}

/// Returns true for values that act as "leave unchanged" markers.
#[must_use]
pub fn is_placeholder(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn merge_maps(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        if let Some(base) = key.strip_suffix('+') {
            append(target, base, value);
        } else if let Some(base) = key.strip_suffix('-') {
            target.insert(base.to_string(), normalized(value));
        } else {
            match target.get_mut(key) {
                Some(existing) => deep_merge(existing, value),
                None => {
                    target.insert(key.clone(), normalized(value));
                }
            }
        }
    }
}

fn append(target: &mut Map<String, Value>, key: &str, value: &Value) {
    let Value::Array(items) = value else {
        target.insert(key.to_string(), normalized(value));
        return;
    };

    match target.get_mut(key) {
        Some(Value::Array(existing)) => push_unique(existing, items),
        _ => {
            let mut fresh = Vec::with_capacity(items.len());
            push_unique(&mut fresh, items);
            target.insert(key.to_string(), Value::Array(fresh));
        }
    }
}

fn push_unique(existing: &mut Vec<Value>, items: &[Value]) {
    for item in items {
        if !existing.contains(item) {
            existing.push(item.clone());
        }
    }
}

/// Copy a source value, resolving suffix keys in nested mappings.
fn normalized(value: &Value) -> Value {
    match value {
        Value::Object(source) => {
            let mut out = Map::new();
            merge_maps(&mut out, source);
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{is_empty, recursive_diff};
    use serde_json::json;

    #[test]
    fn nested_mappings_merge() {
        let mut target = json!({"a": {"x": 1, "y": 2}, "b": 1});
        deep_merge(&mut target, &json!({"a": {"y": 3, "z": 4}}));
        assert_eq!(target, json!({"a": {"x": 1, "y": 3, "z": 4}, "b": 1}));
    }

    #[test]
    fn plus_suffix_appends_unique() {
        let mut target = json!({"labels": ["a", "b"]});
        deep_merge(&mut target, &json!({"labels+": ["b", "c", "c"]}));
        assert_eq!(target, json!({"labels": ["a", "b", "c"]}));
    }

    #[test]
    fn plus_suffix_on_missing_key_creates_sequence() {
        let mut target = json!({});
        deep_merge(&mut target, &json!({"labels+": ["a", "a"]}));
        assert_eq!(target, json!({"labels": ["a"]}));
    }

    #[test]
    fn minus_suffix_replaces() {
        let mut target = json!({"ports": [{"port": 80}, {"port": 443}]});
        deep_merge(&mut target, &json!({"ports-": [{"port": 8080}]}));
        assert_eq!(target, json!({"ports": [{"port": 8080}]}));
    }

    #[test]
    fn equal_length_sequences_merge_index_wise() {
        let mut target = json!({"c": [{"name": "a", "cpu": 1}, {"name": "b", "cpu": 1}]});
        deep_merge(&mut target, &json!({"c": [{}, {"cpu": 2}]}));
        assert_eq!(
            target,
            json!({"c": [{"name": "a", "cpu": 1}, {"name": "b", "cpu": 2}]})
        );
    }

    #[test]
    fn placeholders_are_skipped() {
        let mut target = json!([1, "two", [3], {"four": 4}, 5]);
        deep_merge(&mut target, &json!([null, "", [], {}, 6]));
        assert_eq!(target, json!([1, "two", [3], {"four": 4}, 6]));
    }

    #[test]
    fn different_length_sequences_replace() {
        let mut target = json!({"l": [1, 2, 3]});
        deep_merge(&mut target, &json!({"l": [9]}));
        assert_eq!(target, json!({"l": [9]}));
    }

    #[test]
    fn scalar_replaced_by_mapping() {
        let mut target = json!({"a": 1});
        deep_merge(&mut target, &json!({"a": {"b+": [1]}}));
        assert_eq!(target, json!({"a": {"b": [1]}}));
    }

    #[test]
    fn merged_leaves_inputs_untouched() {
        let target = json!({"a": 1});
        let source = json!({"b": 2});
        let out = merged(&target, &source);
        assert_eq!(out, json!({"a": 1, "b": 2}));
        assert_eq!(target, json!({"a": 1}));
        assert_eq!(source, json!({"b": 2}));
    }

    #[test]
    fn diff_consistent_with_merge_into_empty() {
        let docs = [
            json!({"name": "grafana", "parameters": {"x": 1}}),
            json!({"name": "grafana", "parameters": {"x": 2}}),
            json!({"name": "grafana", "parameters": {"x": 1}, "extra": [1, 2]}),
            json!({}),
        ];
        for a in &docs {
            for b in &docs {
                let same = merged(&json!({}), a) == merged(&json!({}), b);
                assert_eq!(is_empty(&recursive_diff(a, b)), same, "{a} vs {b}");
            }
        }
    }
}
