//! Small JSON utilities shared by the tool-dispatch layer.

use serde_json::Value;

fn is_empty_leaf(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

/// Drop empty leaves (null, `""`, `[]`, `{}`) from a JSON value,
/// recursively, so upstream services never see "present but empty"
/// parameters. A container whose children all strip away is itself
/// dropped by its parent. Idempotent.
pub fn strip_empty_leaves(v: &Value) -> Value {
    match v {
        Value::Object(m) => {
            let mut out = serde_json::Map::new();
            for (k, child) in m {
                let stripped = strip_empty_leaves(child);
                if !is_empty_leaf(&stripped) {
                    out.insert(k.clone(), stripped);
                }
            }
            Value::Object(out)
        }
        Value::Array(a) => {
            let out: Vec<Value> = a
                .iter()
                .map(strip_empty_leaves)
                .filter(|c| !is_empty_leaf(c))
                .collect();
            Value::Array(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn strips_nested_empties() {
        let v = json!({
            "url": "https://example.com",
            "search": "",
            "limit": 0,
            "scrapeOptions": {"formats": [], "headers": {}},
            "tags": ["a", "", null],
            "flag": false
        });
        assert_eq!(
            strip_empty_leaves(&v),
            json!({"url": "https://example.com", "limit": 0, "tags": ["a"], "flag": false})
        );
    }

    #[test]
    fn keeps_zero_and_false() {
        let v = json!({"n": 0, "b": false});
        assert_eq!(strip_empty_leaves(&v), v);
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::from),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::from),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn strip_is_idempotent(v in arb_json()) {
            let once = strip_empty_leaves(&v);
            let twice = strip_empty_leaves(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
