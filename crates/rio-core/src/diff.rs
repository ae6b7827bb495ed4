//! Structural difference between two JSON documents.
//!
//! [`recursive_diff`] walks two documents in parallel and keeps only the
//! paths where they disagree. Mappings are compared key by key at any depth;
//! sequences and scalars are leaves compared by equality. A disagreeing leaf
//! is annotated as `{"old": .., "new": ..}`, and a key present on one side
//! only carries just that side, so a missing key is never confused with an
//! explicit `null`.
//!
//! ```
//! use rio_core::diff::recursive_diff;
//! use serde_json::json;
//!
//! let old = json!({"name": "grafana", "parameters": {"x": 1, "y": 2}});
//! let new = json!({"name": "grafana", "parameters": {"x": 1, "y": 3}});
//!
//! assert_eq!(
//!     recursive_diff(&old, &new),
//!     json!({"parameters": {"y": {"old": 2, "new": 3}}})
//! );
//! ```

use serde_json::{Map, Value};

/// Compute the difference between `a` (observed) and `b` (desired).
///
/// The result is always an object; it is empty if and only if the two
/// documents are equal.
#[must_use]
pub fn recursive_diff(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => Value::Object(diff_maps(a, b)),
        _ if a == b => Value::Object(Map::new()),
        _ => annotate(Some(a), Some(b)),
    }
}

/// Compute the difference between `a` and `b` restricted to `fields`.
///
/// Only the listed top-level keys take part in the comparison; everything
/// else in either document is ignored.
#[must_use]
pub fn diff_fields(a: &Value, b: &Value, fields: &[&str]) -> Value {
    recursive_diff(&project(a, fields), &project(b, fields))
}

/// Keep only the listed top-level keys of a mapping.
///
/// Non-mapping documents are returned unchanged.
#[must_use]
pub fn project(doc: &Value, fields: &[&str]) -> Value {
    match doc {
        Value::Object(map) => Value::Object(
            fields
                .iter()
                .filter_map(|field| map.get(*field).map(|v| ((*field).to_string(), v.clone())))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Returns true if `diff` reports no differences.
#[must_use]
pub fn is_empty(diff: &Value) -> bool {
    match diff {
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

fn diff_maps(a: &Map<String, Value>, b: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();

    for (key, old) in a {
        match b.get(key) {
            Some(new) => {
                if let (Value::Object(old_map), Value::Object(new_map)) = (old, new) {
                    let nested = diff_maps(old_map, new_map);
                    if !nested.is_empty() {
                        out.insert(key.clone(), Value::Object(nested));
                    }
                } else if old != new {
                    out.insert(key.clone(), annotate(Some(old), Some(new)));
                }
            }
            None => {
                out.insert(key.clone(), annotate(Some(old), None));
            }
        }
    }

    for (key, new) in b {
        if !a.contains_key(key) {
            out.insert(key.clone(), annotate(None, Some(new)));
        }
    }

    out
}

fn annotate(old: Option<&Value>, new: Option<&Value>) -> Value {
    let mut leaf = Map::new();
    if let Some(old) = old {
        leaf.insert("old".to_string(), old.clone());
    }
    if let Some(new) = new {
        leaf.insert("new".to_string(), new.clone());
    }
    Value::Object(leaf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn samples() -> Vec<Value> {
        vec![
            json!(null),
            json!(0),
            json!("text"),
            json!([1, 2, {"a": 1}]),
            json!({}),
            json!({"name": "grafana", "packageVersion": "v2", "parameters": {"x": 1}}),
            json!({"a": {"b": {"c": {"d": [1, 2, 3]}}}, "e": null}),
        ]
    }

    #[test]
    fn diff_is_reflexive() {
        for doc in samples() {
            assert!(is_empty(&recursive_diff(&doc, &doc)), "non-empty for {doc}");
        }
    }

    #[test]
    fn empty_iff_equal() {
        let docs = samples();
        for a in &docs {
            for b in &docs {
                assert_eq!(is_empty(&recursive_diff(a, b)), a == b, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn changed_scalar_is_annotated() {
        let diff = recursive_diff(&json!({"runtime": "cloud"}), &json!({"runtime": "device"}));
        assert_eq!(diff, json!({"runtime": {"old": "cloud", "new": "device"}}));
    }

    #[test]
    fn missing_keys_carry_one_side() {
        let diff = recursive_diff(&json!({"a": 1}), &json!({"b": null}));
        assert_eq!(diff, json!({"a": {"old": 1}, "b": {"new": null}}));
    }

    #[test]
    fn nested_difference_keeps_only_changed_path() {
        let old = json!({"a": {"b": {"c": 1, "d": 2}}, "z": 0});
        let new = json!({"a": {"b": {"c": 1, "d": 5}}, "z": 0});
        assert_eq!(
            recursive_diff(&old, &new),
            json!({"a": {"b": {"d": {"old": 2, "new": 5}}}})
        );
    }

    #[test]
    fn sequences_are_leaves() {
        let diff = recursive_diff(&json!({"l": [1, 2]}), &json!({"l": [2, 1]}));
        assert_eq!(diff, json!({"l": {"old": [1, 2], "new": [2, 1]}}));
    }

    #[test]
    fn mapping_order_is_irrelevant() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": 2, "x": 1}"#).unwrap();
        assert!(is_empty(&recursive_diff(&a, &b)));
    }

    #[test]
    fn non_mapping_roots() {
        assert_eq!(
            recursive_diff(&json!(1), &json!("1")),
            json!({"old": 1, "new": "1"})
        );
    }

    #[test]
    fn diff_fields_ignores_unlisted_keys() {
        let observed = json!({"name": "net", "runtime": "cloud", "guid": "net-1", "phase": "Succeeded"});
        let desired = json!({"name": "net", "runtime": "cloud"});
        assert!(is_empty(&diff_fields(&observed, &desired, &["name", "runtime"])));

        let desired = json!({"name": "net", "runtime": "device"});
        assert_eq!(
            diff_fields(&observed, &desired, &["name", "runtime"]),
            json!({"runtime": {"old": "cloud", "new": "device"}})
        );
    }

    #[test]
    fn project_skips_missing_fields() {
        assert_eq!(
            project(&json!({"a": 1, "b": 2}), &["a", "c"]),
            json!({"a": 1})
        );
    }
}
