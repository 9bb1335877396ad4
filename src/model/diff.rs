//! Structural JSON diff (spec §4.2).
//!
//! Computes the minimal edit between two JSON trees: object-key
//! additions/removals/updates, and array element insertions/removals/updates,
//! each as a distinct shape. [`Diff::Array`] carries its own `kind` tag in
//! serialized form, which doubles as the marker the spec requires to tell an
//! array delta apart from an object delta whose keys happen to be numeric
//! strings.
//!
//! `apply(a, diff(a, b))` is guaranteed to be byte-equal under
//! [`crate::model::serialize::canonical_bytes`] to `b` (spec §8 property 3).
//! The algorithm is deterministic: no random tie-breaks, no hashmap iteration
//! order leaking into output (object keys are walked via a sorted
//! [`BTreeMap`] view of each side).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// A structural delta between two JSON values (spec §4.2).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diff {
    /// Both sides equal; nothing to do.
    Unchanged,
    /// One side's type or scalar value differs such that no finer-grained
    /// delta applies; carries the replacement value wholesale.
    Replace {
        /// The new value (from `b`).
        value: Value,
    },
    /// Both sides are JSON objects; per-key edits.
    Object(ObjectDiff),
    /// Both sides are JSON arrays; per-index edits.
    Array(ArrayDiff),
}

/// Per-key edits between two JSON objects (spec §4.2).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectDiff {
    /// Keys present in `b` but not `a`, with their values.
    pub added: BTreeMap<String, Value>,
    /// Keys present in `a` but not `b`.
    pub removed: BTreeMap<String, Value>,
    /// Keys present on both sides whose value changed, recursively diffed.
    pub updated: BTreeMap<String, Diff>,
}

impl ObjectDiff {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Per-index edits between two JSON arrays (spec §4.2, §9 "array reordering
/// ... can be a stub" — only index-aligned insert/remove/update is produced,
/// no move detection).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArrayDiff {
    /// Element-level edits, applied in order against the original array.
    pub ops: Vec<ArrayOp>,
}

/// A single array edit (spec §4.2: "array element insertions/removals").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ArrayOp {
    /// Insert `value` at `index`, shifting later elements right.
    Insert {
        /// Index the new element is inserted at.
        index: usize,
        /// The inserted value.
        value: Value,
    },
    /// Remove the element at `index`.
    Remove {
        /// Index of the removed element.
        index: usize,
    },
    /// Replace the element at `index` with a recursively-diffed value.
    Update {
        /// Index of the updated element.
        index: usize,
        /// The nested diff to apply at this index.
        diff: Box<Diff>,
    },
}

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

/// Compute the structural delta that transforms `a` into `b` (spec §4.2).
#[must_use]
pub fn diff(a: &Value, b: &Value) -> Diff {
    if a == b {
        return Diff::Unchanged;
    }
    match (a, b) {
        (Value::Object(ma), Value::Object(mb)) => {
            let mut added = BTreeMap::new();
            let mut removed = BTreeMap::new();
            let mut updated = BTreeMap::new();

            for (key, b_value) in mb {
                match ma.get(key) {
                    None => {
                        added.insert(key.clone(), b_value.clone());
                    }
                    Some(a_value) if a_value != b_value => {
                        updated.insert(key.clone(), diff(a_value, b_value));
                    }
                    Some(_) => {}
                }
            }
            for (key, a_value) in ma {
                if !mb.contains_key(key) {
                    removed.insert(key.clone(), a_value.clone());
                }
            }

            let object_diff = ObjectDiff {
                added,
                removed,
                updated,
            };
            if object_diff.is_empty() {
                Diff::Unchanged
            } else {
                Diff::Object(object_diff)
            }
        }
        (Value::Array(va), Value::Array(vb)) => Diff::Array(ArrayDiff { ops: diff_arrays(va, vb) }),
        _ => Diff::Replace { value: b.clone() },
    }
}

/// Index-aligned array diff: common prefix indices are diffed in place,
/// then the shorter side's tail is padded with inserts or the longer side's
/// tail is trimmed with removes. Deterministic and stub-simple per spec §9.
fn diff_arrays(a: &[Value], b: &[Value]) -> Vec<ArrayOp> {
    let common = a.len().min(b.len());
    let mut ops = Vec::new();

    for i in 0..common {
        if a[i] != b[i] {
            ops.push(ArrayOp::Update {
                index: i,
                diff: Box::new(diff(&a[i], &b[i])),
            });
        }
    }

    if b.len() > a.len() {
        for (offset, value) in b[common..].iter().enumerate() {
            ops.push(ArrayOp::Insert {
                index: common + offset,
                value: value.clone(),
            });
        }
    } else if a.len() > b.len() {
        // Remove from the back so indices stay valid as the array shrinks.
        for index in (common..a.len()).rev() {
            ops.push(ArrayOp::Remove { index });
        }
    }

    ops
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Apply a [`Diff`] produced by [`diff`] to `a`, yielding a value equal to
/// the original `b` (spec §8 property 3).
#[must_use]
pub fn apply(a: &Value, d: &Diff) -> Value {
    match d {
        Diff::Unchanged => a.clone(),
        Diff::Replace { value } => value.clone(),
        Diff::Object(object_diff) => {
            let Value::Object(mut map) = a.clone() else {
                return a.clone();
            };
            for key in object_diff.removed.keys() {
                map.remove(key);
            }
            for (key, value) in &object_diff.added {
                map.insert(key.clone(), value.clone());
            }
            for (key, nested) in &object_diff.updated {
                if let Some(current) = map.get(key) {
                    let new_value = apply(current, nested);
                    map.insert(key.clone(), new_value);
                }
            }
            Value::Object(map)
        }
        Diff::Array(array_diff) => {
            let Value::Array(mut items) = a.clone() else {
                return a.clone();
            };
            for op in &array_diff.ops {
                match op {
                    ArrayOp::Insert { index, value } => {
                        let index = (*index).min(items.len());
                        items.insert(index, value.clone());
                    }
                    ArrayOp::Remove { index } => {
                        if *index < items.len() {
                            items.remove(*index);
                        }
                    }
                    ArrayOp::Update { index, diff: nested } => {
                        if let Some(current) = items.get(*index) {
                            items[*index] = apply(current, nested);
                        }
                    }
                }
            }
            Value::Array(items)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::serialize::canonical_bytes;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn unchanged_for_equal_values() {
        let a = json!({"a": 1});
        assert_eq!(diff(&a, &a), Diff::Unchanged);
    }

    #[test]
    fn object_added_key() {
        let a = json!({"a": 1});
        let b = json!({"a": 1, "b": 2});
        let d = diff(&a, &b);
        assert!(matches!(&d, Diff::Object(o) if o.added.contains_key("b")));
        assert_eq!(canonical_bytes(&apply(&a, &d)), canonical_bytes(&b));
    }

    #[test]
    fn object_removed_key() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"a": 1});
        let d = diff(&a, &b);
        assert!(matches!(&d, Diff::Object(o) if o.removed.contains_key("b")));
        assert_eq!(canonical_bytes(&apply(&a, &d)), canonical_bytes(&b));
    }

    #[test]
    fn object_updated_key_nested() {
        let a = json!({"name": "Hello"});
        let b = json!({"name": "Hello, world!"});
        let d = diff(&a, &b);
        assert_eq!(canonical_bytes(&apply(&a, &d)), canonical_bytes(&b));
    }

    #[test]
    fn nested_object_diff() {
        let a = json!({"meta": {"x": 1, "y": 2}});
        let b = json!({"meta": {"x": 1, "y": 3}});
        let d = diff(&a, &b);
        assert_eq!(canonical_bytes(&apply(&a, &d)), canonical_bytes(&b));
    }

    #[test]
    fn array_insert_at_tail() {
        let a = json!([1, 2]);
        let b = json!([1, 2, 3]);
        let d = diff(&a, &b);
        assert!(matches!(&d, Diff::Array(_)));
        assert_eq!(canonical_bytes(&apply(&a, &d)), canonical_bytes(&b));
    }

    #[test]
    fn array_remove_from_tail() {
        let a = json!([1, 2, 3]);
        let b = json!([1, 2]);
        let d = diff(&a, &b);
        assert_eq!(canonical_bytes(&apply(&a, &d)), canonical_bytes(&b));
    }

    #[test]
    fn array_update_element() {
        let a = json!([1, 2, 3]);
        let b = json!([1, 9, 3]);
        let d = diff(&a, &b);
        assert_eq!(canonical_bytes(&apply(&a, &d)), canonical_bytes(&b));
    }

    #[test]
    fn scalar_replace() {
        let a = json!(1);
        let b = json!("one");
        let d = diff(&a, &b);
        assert_eq!(d, Diff::Replace { value: b.clone() });
        assert_eq!(apply(&a, &d), b);
    }

    #[test]
    fn diff_is_deterministic() {
        let a = json!({"b": 1, "a": 2, "c": {"z": 1, "y": 2}});
        let b = json!({"a": 3, "c": {"z": 9, "y": 2}, "d": 4});
        let d1 = diff(&a, &b);
        let d2 = diff(&a, &b);
        assert_eq!(d1, d2);
    }

    #[test]
    fn full_document_round_trip() {
        let a = json!({"_id": 1, "name": "fromA", "tags": ["x", "y"]});
        let b = json!({"_id": 1, "name": "fromB", "tags": ["x", "y", "z"], "extra": true});
        let d = diff(&a, &b);
        assert_eq!(canonical_bytes(&apply(&a, &d)), canonical_bytes(&b));
    }

    /// Arbitrary JSON value with bounded depth/width, for the round-trip
    /// property below.
    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z][a-z0-9]{0,6}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// `apply(a, diff(a, b))` is byte-equal under canonical serialization
        /// to `b`, for any pair of values (spec §8 property 3).
        #[test]
        fn apply_diff_round_trips(a in arb_json(), b in arb_json()) {
            let d = diff(&a, &b);
            let applied = apply(&a, &d);
            prop_assert_eq!(canonical_bytes(&applied), canonical_bytes(&b));
        }

        /// `diff` never depends on anything but its two arguments.
        #[test]
        fn diff_is_deterministic_for_any_pair(a in arb_json(), b in arb_json()) {
            prop_assert_eq!(diff(&a, &b), diff(&a, &b));
        }
    }
}
