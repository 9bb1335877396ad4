//! Conflict-resolution policy (spec §4.4).
//!
//! Maps a [`MergeCase`] plus a configured [`Strategy`] to a concrete
//! resolution. Non-conflict cases have one deterministic outcome; conflict
//! cases consult the strategy, falling back to a plain side pick for
//! `ours-prop`/`theirs-prop` when the property-level merge precondition
//! (both sides present JSON objects, spec §4.4 step-list preamble) doesn't
//! hold.

use serde_json::Value;

use crate::config::{Strategy, StrategyTag};
use crate::model::document::{ConflictOperation, FatDoc};
use crate::model::patch::{self, Bias};
use crate::model::{diff, MergeCase};

/// One side's document at a conflicting path, if present.
pub type Side<'a> = Option<(&'a FatDoc, &'a Value)>;

/// The resolved value for a path: either an existing side's content reused
/// as-is, or a freshly computed value from a property-level OT merge that
/// the caller must serialize and write as a new blob (spec §4.4 step 5).
#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedValue {
    /// Reuse an existing document unchanged (no new blob needed).
    Existing(FatDoc),
    /// A new value produced by merging `ours` and `theirs` property-by-property.
    Merged(Value),
}

/// The outcome of resolving a single path (spec §4.4).
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    /// The resolved operation, used in audit records and commit messages.
    pub operation: ConflictOperation,
    /// The resolved content, or `None` if the path should be deleted.
    pub value: Option<ResolvedValue>,
    /// The strategy tag that was consulted, present only for conflict
    /// cases ([`MergeCase::is_conflict`]).
    pub strategy_used: Option<StrategyTag>,
}

/// Resolve a single path's three-way merge (spec §4.4).
///
/// `base` is the common-ancestor JSON value, required only for property-level
/// merges; `ours`/`theirs` carry each side's [`FatDoc`] and parsed JSON value
/// when present.
#[must_use]
pub fn resolve(case: MergeCase, strategy: &Strategy, base: Option<&Value>, ours: Side<'_>, theirs: Side<'_>) -> Resolution {
    use MergeCase::{
        BothDeleted, BothInsertedDiffer, BothInsertedSame, BothUpdatedDiffer, BothUpdatedSame,
        OursDeletedTheirsRecreated, OursDeletedTheirsUpdated, OursFastForward, OursInserted,
        OursUnchangedTheirsDeleted, OursUpdatedTheirsDeleted, TheirsFastForward, TheirsInserted,
    };

    match case {
        TheirsInserted => deterministic(ConflictOperation::Insert, theirs),
        OursInserted => deterministic(ConflictOperation::Insert, ours),
        BothInsertedSame => deterministic(ConflictOperation::Insert, ours),
        BothInsertedDiffer => conflict(ConflictOperation::Insert, strategy, base, ours, theirs),

        BothDeleted | OursUnchangedTheirsDeleted => Resolution {
            operation: ConflictOperation::Delete,
            value: None,
            strategy_used: None,
        },
        OursDeletedTheirsRecreated => deterministic(ConflictOperation::Insert, theirs),

        OursUpdatedTheirsDeleted => conflict(ConflictOperation::Update, strategy, base, ours, theirs),
        OursDeletedTheirsUpdated => conflict(ConflictOperation::Update, strategy, base, ours, theirs),

        BothUpdatedSame => deterministic(ConflictOperation::Update, ours),
        TheirsFastForward => deterministic(ConflictOperation::Update, theirs),
        OursFastForward => deterministic(ConflictOperation::Update, ours),
        BothUpdatedDiffer => conflict(ConflictOperation::Update, strategy, base, ours, theirs),
    }
}

fn deterministic(operation: ConflictOperation, winner: Side<'_>) -> Resolution {
    Resolution {
        operation,
        value: winner.map(|(doc, _)| ResolvedValue::Existing(doc.clone())),
        strategy_used: None,
    }
}

fn conflict(operation: ConflictOperation, strategy: &Strategy, base: Option<&Value>, ours: Side<'_>, theirs: Side<'_>) -> Resolution {
    let ours_doc = ours.map(|(doc, _)| doc);
    let theirs_doc = theirs.map(|(doc, _)| doc);
    let tag = strategy.resolve_tag(ours_doc, theirs_doc);

    let prop_merge_possible = base.is_some() && ours.is_some() && theirs.is_some();

    match tag {
        StrategyTag::Ours => Resolution {
            operation,
            value: ours.map(|(doc, _)| ResolvedValue::Existing(doc.clone())),
            strategy_used: Some(tag),
        },
        StrategyTag::Theirs => Resolution {
            operation,
            value: theirs.map(|(doc, _)| ResolvedValue::Existing(doc.clone())),
            strategy_used: Some(tag),
        },
        StrategyTag::OursProp | StrategyTag::TheirsProp if !prop_merge_possible => {
            // Fall back to a plain side pick when there's no base object to
            // merge against (spec §4.4: property merges apply "only when
            // both sides are present JSON objects").
            let winner = if tag == StrategyTag::OursProp { ours } else { theirs };
            Resolution {
                operation,
                value: winner.map(|(doc, _)| ResolvedValue::Existing(doc.clone())),
                strategy_used: Some(tag),
            }
        }
        StrategyTag::OursProp | StrategyTag::TheirsProp => {
            let base = base.expect("checked by prop_merge_possible");
            let (_, ours_value) = ours.expect("checked by prop_merge_possible");
            let (_, theirs_value) = theirs.expect("checked by prop_merge_possible");

            let bias = if tag == StrategyTag::OursProp { Bias::Left } else { Bias::Right };
            let ops_ours = patch::from_diff(base, &diff::diff(base, ours_value));
            let ops_theirs = patch::from_diff(base, &diff::diff(base, theirs_value));
            let transformed = patch::transform(&ops_ours, &ops_theirs, bias);
            let mut merged = patch::apply(&patch::apply(base, &ops_theirs), &transformed);
            patch::splice_conflicting_strings(base, &ops_ours, &ops_theirs, &mut merged);

            Resolution {
                operation: ConflictOperation::UpdateMerge,
                value: Some(ResolvedValue::Merged(merged)),
                strategy_used: Some(tag),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use gitdocdb_git::GitOid;
    use serde_json::json;

    fn doc(c: char) -> FatDoc {
        FatDoc::json("1", "1.json", c.to_string().repeat(40).parse::<GitOid>().unwrap())
    }

    #[test]
    fn non_conflict_case_picks_theirs_inserted() {
        let theirs_doc = doc('a');
        let theirs_value = json!({"name": "fromB"});
        let resolution = resolve(
            MergeCase::TheirsInserted,
            &Strategy::default(),
            None,
            None,
            Some((&theirs_doc, &theirs_value)),
        );
        assert_eq!(resolution.operation, ConflictOperation::Insert);
        assert_eq!(resolution.value, Some(ResolvedValue::Existing(theirs_doc)));
        assert!(resolution.strategy_used.is_none());
    }

    #[test]
    fn both_deleted_resolves_to_delete() {
        let resolution = resolve(MergeCase::BothDeleted, &Strategy::default(), None, None, None);
        assert_eq!(resolution.operation, ConflictOperation::Delete);
        assert!(resolution.value.is_none());
    }

    #[test]
    fn conflict_ours_strategy_keeps_ours() {
        let ours_doc = doc('a');
        let theirs_doc = doc('b');
        let base_value = json!({"name": "base"});
        let ours_value = json!({"name": "ours"});
        let theirs_value = json!({"name": "theirs"});
        let resolution = resolve(
            MergeCase::BothUpdatedDiffer,
            &Strategy::Ours,
            Some(&base_value),
            Some((&ours_doc, &ours_value)),
            Some((&theirs_doc, &theirs_value)),
        );
        assert_eq!(resolution.value, Some(ResolvedValue::Existing(ours_doc)));
        assert_eq!(resolution.strategy_used, Some(StrategyTag::Ours));
    }

    #[test]
    fn conflict_ours_prop_merges_disjoint_properties() {
        let ours_doc = doc('a');
        let theirs_doc = doc('b');
        let base_value = json!({"a": 1, "b": 1});
        let ours_value = json!({"a": 9, "b": 1});
        let theirs_value = json!({"a": 1, "b": 9});
        let resolution = resolve(
            MergeCase::BothUpdatedDiffer,
            &Strategy::OursProp,
            Some(&base_value),
            Some((&ours_doc, &ours_value)),
            Some((&theirs_doc, &theirs_value)),
        );
        assert_eq!(resolution.operation, ConflictOperation::UpdateMerge);
        assert_eq!(
            resolution.value,
            Some(ResolvedValue::Merged(json!({"a": 9, "b": 9})))
        );
    }

    #[test]
    fn conflict_ours_prop_without_base_falls_back_to_ours() {
        let ours_doc = doc('a');
        let theirs_value = json!({"name": "theirs"});
        let resolution = resolve(
            MergeCase::OursDeletedTheirsUpdated,
            &Strategy::OursProp,
            None,
            None,
            Some((&doc('b'), &theirs_value)),
        );
        // ours is absent in this case (deleted), so OursProp falls back to
        // the ours side, which is also absent — no value.
        assert!(resolution.value.is_none());
        let _ = ours_doc;
    }

    #[test]
    fn conflict_custom_strategy_invokes_closure() {
        use std::sync::Arc;
        let strategy = Strategy::Custom(Arc::new(|_ours, _theirs| StrategyTag::Theirs));
        let ours_doc = doc('a');
        let theirs_doc = doc('b');
        let resolution = resolve(
            MergeCase::BothInsertedDiffer,
            &strategy,
            None,
            Some((&ours_doc, &json!({}))),
            Some((&theirs_doc, &json!({}))),
        );
        assert_eq!(resolution.value, Some(ResolvedValue::Existing(theirs_doc)));
    }
}
