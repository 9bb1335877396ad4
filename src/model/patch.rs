//! OT patch layer (spec §4.5, §9 "OT as a small algebra").
//!
//! A property edit is represented as a path-keyed operation carrying an
//! action tag: `Insert` (`{i: value}`), `Remove` (`{r: value}`) — a replace
//! is modeled as a `Remove` immediately followed by an `Insert` at the same
//! path, per spec. A [`Patch`] is the ordered sequence of such operations,
//! sorted deepest-path first (ties broken by path) so applying it in order
//! matches what [`super::diff::apply`] would do directly.
//!
//! Only property-level operations on JSON objects are required (spec §9:
//! "array reordering operations are supported by the underlying
//! representation but are not required by the document model").

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::diff::{self, Diff};

// ---------------------------------------------------------------------------
// Op / Patch
// ---------------------------------------------------------------------------

/// Bias for [`transform`] — which side's operation wins when two operations
/// touch the same path (spec §4.5, §4.4 `ours-prop`/`theirs-prop`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bias {
    /// The left-hand sequence's operation wins (spec's `ours-prop`).
    Left,
    /// The right-hand sequence's operation wins (spec's `theirs-prop`).
    Right,
}

impl Bias {
    /// The bias used to transform the other side against this one (spec
    /// §4.5 transform contract: `b' = transform(b, a, opposite(bias))`).
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// A single property-level edit at a path (spec §4.5).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Op {
    /// Property path from the document root, e.g. `["meta", "tags"]`.
    pub path: Vec<String>,
    /// The edit performed at `path`.
    pub action: Action,
}

/// The action tag of an [`Op`] (spec §4.5: `{i: value}` / `{r: value}`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// `{i: value}` — insert `value` at the op's path.
    Insert {
        /// The inserted value.
        value: Value,
    },
    /// `{r: value}` — remove the value at the op's path; `value` records
    /// what was there, so the operation can be transformed or inverted.
    Remove {
        /// The value that was removed.
        value: Value,
    },
}

impl Op {
    /// Depth of this operation's path (root properties have depth 1).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

/// An ordered sequence of [`Op`]s (spec §4.5).
///
/// The ordering is a deterministic total order — deepest path first, ties
/// broken by path so that composition is reproducible — matching the spec's
/// requirement that `apply(a, fromDiff(d)) = apply-diff(a, d)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// The ordered operations.
    pub ops: Vec<Op>,
}

impl Patch {
    /// An empty patch.
    #[must_use]
    pub fn empty() -> Self {
        Self { ops: Vec::new() }
    }

    fn push_sorted(&mut self, op: Op) {
        self.ops.push(op);
        self.sort();
    }

    fn sort(&mut self) {
        self.ops.sort_by(|a, b| {
            b.depth()
                .cmp(&a.depth())
                .then_with(|| b.path.cmp(&a.path))
        });
    }
}

// ---------------------------------------------------------------------------
// from_diff
// ---------------------------------------------------------------------------

/// Convert a structural [`Diff`] (spec §4.2) into an ordered [`Patch`] (spec
/// §4.5 step 2). `base` is the value the diff was computed against — needed
/// to recover the prior value for `Remove`/replace operations.
#[must_use]
pub fn from_diff(base: &Value, d: &Diff) -> Patch {
    let mut patch = Patch::empty();
    collect(base, d, &mut Vec::new(), &mut patch);
    patch.sort();
    patch
}

fn collect(base: &Value, d: &Diff, path: &mut Vec<String>, patch: &mut Patch) {
    match d {
        Diff::Unchanged => {}
        Diff::Replace { value } => {
            // Replace = remove old + insert new at the same path (spec §4.5).
            patch.push_sorted(Op {
                path: path.clone(),
                action: Action::Remove { value: base.clone() },
            });
            patch.push_sorted(Op {
                path: path.clone(),
                action: Action::Insert { value: value.clone() },
            });
        }
        Diff::Object(object_diff) => {
            for (key, value) in &object_diff.added {
                path.push(key.clone());
                patch.push_sorted(Op {
                    path: path.clone(),
                    action: Action::Insert { value: value.clone() },
                });
                path.pop();
            }
            for (key, value) in &object_diff.removed {
                path.push(key.clone());
                patch.push_sorted(Op {
                    path: path.clone(),
                    action: Action::Remove { value: value.clone() },
                });
                path.pop();
            }
            for (key, nested) in &object_diff.updated {
                path.push(key.clone());
                let child_base = base.get(key).cloned().unwrap_or(Value::Null);
                collect(&child_base, nested, path, patch);
                path.pop();
            }
        }
        Diff::Array(_) => {
            // Array reordering is a stub (spec §9): treat the whole array as
            // replaced rather than emitting per-index property operations.
            let new_value = diff::apply(base, d);
            patch.push_sorted(Op {
                path: path.clone(),
                action: Action::Remove { value: base.clone() },
            });
            patch.push_sorted(Op {
                path: path.clone(),
                action: Action::Insert { value: new_value },
            });
        }
    }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Apply a [`Patch`] to `base`, in the patch's own deterministic order.
#[must_use]
pub fn apply(base: &Value, patch: &Patch) -> Value {
    let mut result = base.clone();
    for op in &patch.ops {
        apply_op(&mut result, op);
    }
    result
}

fn apply_op(root: &mut Value, op: &Op) {
    match op.path.split_last() {
        None => {
            // Root-level replace (empty path): act directly on the root value.
            if let Action::Insert { value } = &op.action {
                *root = value.clone();
            }
        }
        Some((last_key, parent_path)) => {
            if let Some(parent) = navigate_mut(root, parent_path) {
                let Value::Object(map) = parent else { return };
                match &op.action {
                    Action::Insert { value } => {
                        map.insert(last_key.clone(), value.clone());
                    }
                    Action::Remove { .. } => {
                        map.remove(last_key);
                    }
                }
            }
        }
    }
}

fn navigate_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut current = root;
    for key in path {
        match current {
            Value::Object(map) => {
                current = map.entry(key.clone()).or_insert_with(|| Value::Object(Map::new()));
            }
            _ => return None,
        }
    }
    Some(current)
}

// ---------------------------------------------------------------------------
// string splice
// ---------------------------------------------------------------------------

/// Find matching [`Action::Insert`] operations at the same path in `ours`
/// and `theirs` whose values (and the value at that path in `base`) are all
/// strings, and replace `merged`'s value at that path with a character-level
/// splice of both sides' edits when the edited regions don't overlap (spec
/// §8 scenario B: a property merge's whole-value collision still honors both
/// sides' edits when they touch disjoint parts of the string).
///
/// Paths where the splice isn't applicable (non-string values, or edits that
/// overlap in the base string) are left as whichever bias already resolved
/// them in `merged`.
pub fn splice_conflicting_strings(base: &Value, ours: &Patch, theirs: &Patch, merged: &mut Value) {
    for op_ours in &ours.ops {
        let Action::Insert { value: ours_value } = &op_ours.action else { continue };
        let Some(ours_str) = ours_value.as_str() else { continue };
        let Some(op_theirs) = theirs.ops.iter().find(|op| op.path == op_ours.path) else { continue };
        let Action::Insert { value: theirs_value } = &op_theirs.action else { continue };
        let Some(theirs_str) = theirs_value.as_str() else { continue };
        let Some(base_str) = navigate(base, &op_ours.path).and_then(Value::as_str) else { continue };

        if let Some(spliced) = splice_strings(base_str, ours_str, theirs_str) {
            if let Some(target) = navigate_mut_existing(merged, &op_ours.path) {
                *target = Value::String(spliced);
            }
        }
    }
}

fn navigate<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for key in path {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

fn navigate_mut_existing<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut current = root;
    for key in path {
        current = current.as_object_mut()?.get_mut(key)?;
    }
    Some(current)
}

/// Splice two independent edits of `base` together when they touch disjoint
/// regions of it, `None` otherwise. Operates on `char`s, not bytes, so
/// multi-byte UTF-8 sequences never get split mid-character.
fn splice_strings(base: &str, ours: &str, theirs: &str) -> Option<String> {
    let base: Vec<char> = base.chars().collect();
    let ours: Vec<char> = ours.chars().collect();
    let theirs: Vec<char> = theirs.chars().collect();

    let (ours_prefix, ours_suffix) = edit_bounds(&base, &ours);
    let (theirs_prefix, theirs_suffix) = edit_bounds(&base, &theirs);
    let ours_removed_end = base.len() - ours_suffix;
    let theirs_removed_end = base.len() - theirs_suffix;

    let (first_prefix, first_removed_end, first_inserted, second_prefix, second_removed_end, second_inserted) =
        if ours_prefix <= theirs_prefix {
            (ours_prefix, ours_removed_end, &ours[ours_prefix..ours.len() - ours_suffix],
             theirs_prefix, theirs_removed_end, &theirs[theirs_prefix..theirs.len() - theirs_suffix])
        } else {
            (theirs_prefix, theirs_removed_end, &theirs[theirs_prefix..theirs.len() - theirs_suffix],
             ours_prefix, ours_removed_end, &ours[ours_prefix..ours.len() - ours_suffix])
        };

    if first_removed_end > second_prefix {
        // The two edited regions overlap: splicing would lose information.
        return None;
    }

    let mut result = Vec::with_capacity(base.len());
    result.extend_from_slice(&base[..first_prefix]);
    result.extend_from_slice(first_inserted);
    result.extend_from_slice(&base[first_removed_end..second_prefix]);
    result.extend_from_slice(second_inserted);
    result.extend_from_slice(&base[second_removed_end..]);
    Some(result.into_iter().collect())
}

/// The common-prefix/common-suffix bounds of `edited` against `base`: the
/// number of leading and trailing chars the two share, capped so they never
/// overlap each other.
fn edit_bounds(base: &[char], edited: &[char]) -> (usize, usize) {
    let prefix = common_prefix_len(base, edited);
    let suffix = common_suffix_len(base, edited, prefix);
    (prefix, suffix)
}

fn common_prefix_len(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn common_suffix_len(a: &[char], b: &[char], prefix: usize) -> usize {
    let max = a.len().min(b.len()).saturating_sub(prefix);
    let mut n = 0;
    while n < max && a[a.len() - 1 - n] == b[b.len() - 1 - n] {
        n += 1;
    }
    n
}

// ---------------------------------------------------------------------------
// transform
// ---------------------------------------------------------------------------

/// Transform `a` against `b` with the given bias (spec §4.5).
///
/// `transform(a, b, bias)` returns `a'` such that
/// `apply(apply(x, b), a') = apply(apply(x, a), b')` where
/// `b' = transform(b, a, opposite(bias))`.
///
/// Operations at disjoint paths commute unchanged. Operations at the same
/// path conflict: the `bias`-favored side's operation survives in `a'`, the
/// other side's conflicting operation is dropped (its effect is already
/// subsumed by whichever side wins).
#[must_use]
pub fn transform(a: &Patch, b: &Patch, bias: Bias) -> Patch {
    let mut ops = Vec::with_capacity(a.ops.len());
    for op in &a.ops {
        let conflicts = b.ops.iter().any(|other| other.path == op.path);
        if !conflicts || bias == Bias::Left {
            ops.push(op.clone());
        }
        // bias == Right and conflicts: `a`'s op is superseded by `b`'s, drop it.
    }
    let mut patch = Patch { ops };
    patch.sort();
    patch
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::diff::diff;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn from_diff_then_apply_matches_diff_apply() {
        let base = json!({"a": 1, "b": 2});
        let target = json!({"a": 1, "c": 3});
        let d = diff(&base, &target);
        let patch = from_diff(&base, &d);
        assert_eq!(apply(&base, &patch), diff::apply(&base, &d));
    }

    #[test]
    fn insert_and_remove_roundtrip() {
        let base = json!({"a": 1});
        let target = json!({"b": 2});
        let d = diff(&base, &target);
        let patch = from_diff(&base, &d);
        assert_eq!(apply(&base, &patch), target);
    }

    #[test]
    fn nested_property_patch() {
        let base = json!({"meta": {"x": 1, "y": 2}});
        let target = json!({"meta": {"x": 1, "y": 9}});
        let d = diff(&base, &target);
        let patch = from_diff(&base, &d);
        assert_eq!(apply(&base, &patch), target);
    }

    #[test]
    fn ordering_is_deepest_path_first() {
        let base = json!({"a": {"b": 1}, "c": 1});
        let target = json!({"a": {"b": 2}, "c": 2});
        let d = diff(&base, &target);
        let patch = from_diff(&base, &d);
        assert!(patch.ops[0].depth() >= patch.ops.last().unwrap().depth());
    }

    #[test]
    fn transform_disjoint_paths_commute_both_directions() {
        let base = json!({"a": 1, "b": 1});
        let ours = json!({"a": 9, "b": 1});
        let theirs = json!({"a": 1, "b": 9});

        let ops_ours = from_diff(&base, &diff(&base, &ours));
        let ops_theirs = from_diff(&base, &diff(&base, &theirs));

        let left = apply(&apply(&base, &ops_theirs), &transform(&ops_ours, &ops_theirs, Bias::Left));
        let right = apply(&apply(&base, &ops_ours), &transform(&ops_theirs, &ops_ours, Bias::Right));
        assert_eq!(left, right);
        assert_eq!(left, json!({"a": 9, "b": 9}));
    }

    #[test]
    fn transform_same_path_left_bias_wins() {
        let base = json!({"a": 1});
        let ours = json!({"a": 2});
        let theirs = json!({"a": 3});

        let ops_ours = from_diff(&base, &diff(&base, &ours));
        let ops_theirs = from_diff(&base, &diff(&base, &theirs));

        let merged = apply(
            &apply(&base, &ops_theirs),
            &transform(&ops_ours, &ops_theirs, Bias::Left),
        );
        assert_eq!(merged, ours);
    }

    #[test]
    fn transform_same_path_right_bias_keeps_theirs() {
        let base = json!({"a": 1});
        let ours = json!({"a": 2});
        let theirs = json!({"a": 3});

        let ops_ours = from_diff(&base, &diff(&base, &ours));
        let ops_theirs = from_diff(&base, &diff(&base, &theirs));

        let merged = apply(
            &apply(&base, &ops_theirs),
            &transform(&ops_ours, &ops_theirs, Bias::Right),
        );
        assert_eq!(merged, theirs);
    }

    #[test]
    fn bias_opposite() {
        assert_eq!(Bias::Left.opposite(), Bias::Right);
        assert_eq!(Bias::Right.opposite(), Bias::Left);
    }

    #[test]
    fn splice_strings_joins_disjoint_edits() {
        // spec §8 scenario B's worked example: a deletion on one side and an
        // append on the other, touching disjoint parts of the base string.
        let spliced = splice_strings("Hello, world!", "Hello, world! Hello, Nara!", "Hello");
        assert_eq!(spliced, Some("Hello Hello, Nara!".to_owned()));
    }

    #[test]
    fn splice_strings_none_when_edits_overlap() {
        let spliced = splice_strings("Hello, world!", "Hey, world!", "Hello, there!");
        assert_eq!(spliced, None);
    }

    #[test]
    fn splice_strings_handles_multibyte_chars_without_panicking() {
        let spliced = splice_strings("héllo, wörld!", "héllo, wörld! 日本語", "héllo");
        assert_eq!(spliced, Some("héllo 日本語".to_owned()));
    }

    #[test]
    fn splice_conflicting_strings_patches_merged_in_place() {
        let base = json!({"name": "Hello, world!"});
        let ours_value = json!({"name": "Hello, world! Hello, Nara!"});
        let theirs_value = json!({"name": "Hello"});

        let ops_ours = from_diff(&base, &diff(&base, &ours_value));
        let ops_theirs = from_diff(&base, &diff(&base, &theirs_value));

        let mut merged = theirs_value.clone();
        splice_conflicting_strings(&base, &ops_ours, &ops_theirs, &mut merged);
        assert_eq!(merged, json!({"name": "Hello Hello, Nara!"}));
    }

    /// A base object plus two edits of it that never touch the same key, so
    /// the diamond law is expected to hold regardless of which side's patch
    /// is transformed against the other.
    fn arb_diamond() -> impl Strategy<Value = (Value, Value, Value)> {
        prop::collection::vec(
            ("[a-z][a-z0-9]{0,5}", any::<i32>(), any::<i32>(), any::<i32>(), 0..3u8),
            2..8usize,
        )
        .prop_map(|entries| {
            let mut base = Map::new();
            let mut ours = Map::new();
            let mut theirs = Map::new();
            for (key, base_val, ours_val, theirs_val, side) in entries {
                base.insert(key.clone(), json!(base_val));
                match side {
                    0 => {
                        ours.insert(key.clone(), json!(ours_val));
                        theirs.insert(key.clone(), json!(base_val));
                    }
                    1 => {
                        ours.insert(key.clone(), json!(base_val));
                        theirs.insert(key.clone(), json!(theirs_val));
                    }
                    _ => {
                        ours.insert(key.clone(), json!(base_val));
                        theirs.insert(key.clone(), json!(base_val));
                    }
                }
            }
            (Value::Object(base), Value::Object(ours), Value::Object(theirs))
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// `transform` satisfies the OT diamond property for disjoint-path
        /// edits (spec §4.5, §9): applying both sides in either order, each
        /// transformed against the other, converges to the same result.
        #[test]
        fn transform_diamond_holds_for_disjoint_edits((base, ours, theirs) in arb_diamond()) {
            let patch_ours = from_diff(&base, &diff(&base, &ours));
            let patch_theirs = from_diff(&base, &diff(&base, &theirs));

            let ours_prime = transform(&patch_ours, &patch_theirs, Bias::Left);
            let theirs_prime = transform(&patch_theirs, &patch_ours, Bias::Right);

            let via_theirs_first = apply(&apply(&base, &patch_theirs), &ours_prime);
            let via_ours_first = apply(&apply(&base, &patch_ours), &theirs_prime);

            prop_assert_eq!(via_theirs_first, via_ours_first);
        }
    }
}
