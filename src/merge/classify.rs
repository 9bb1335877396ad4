//! Three-way merge classifier (spec §4.3).
//!
//! Given the base/ours/theirs state of a single path, [`classify`] produces
//! a [`MergeCase`] tag. Cases 4/5 and 16/17 of the spec's table describe
//! identical classifier situations with two resolver branches apiece (spec
//! §9 open question); this classifier emits one case per situation
//! ([`MergeCase::BothInsertedDiffer`], [`MergeCase::BothUpdatedDiffer`]) and
//! leaves the branch choice to [`super::resolve::resolve`].

use gitdocdb_git::GitOid;

use crate::model::MergeCase;

/// The state of a single path on one side of a merge (spec §4.3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathState {
    /// The path does not exist on this side.
    Absent,
    /// The path exists with the given blob content.
    Present {
        /// Blob object identifier of the content at this path.
        oid: GitOid,
    },
}

impl PathState {
    /// `true` if this side has content at the path.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }
}

/// Classify a single path's base/ours/theirs states into a [`MergeCase`]
/// (spec §4.3 table).
///
/// Edge case (spec §4.3): "a path with no base and no modification on one
/// side is treated as non-interacting" — callers should not invoke this for
/// paths where `ours == base == theirs`; such paths carry no change and are
/// skipped entirely by the sync engine before classification runs.
#[must_use]
pub fn classify(base: &PathState, ours: &PathState, theirs: &PathState) -> MergeCase {
    match (base, ours, theirs) {
        // --- base absent: both sides can only insert or stay absent. ---
        (PathState::Absent, PathState::Absent, PathState::Present { .. }) => {
            MergeCase::TheirsInserted // case 1
        }
        (PathState::Absent, PathState::Present { .. }, PathState::Absent) => {
            MergeCase::OursInserted // case 2
        }
        (PathState::Absent, PathState::Present { oid: ours_oid }, PathState::Present { oid: theirs_oid }) => {
            if ours_oid == theirs_oid {
                MergeCase::BothInsertedSame // case 3
            } else {
                MergeCase::BothInsertedDiffer // cases 4/5
            }
        }

        // --- base present: deletions and updates on either side. ---
        (PathState::Present { .. }, PathState::Absent, PathState::Absent) => {
            MergeCase::BothDeleted // case 6
        }
        (PathState::Present { oid: base_oid }, PathState::Present { oid: ours_oid }, PathState::Absent) => {
            if ours_oid == base_oid {
                MergeCase::OursUnchangedTheirsDeleted // cases 7/10
            } else {
                MergeCase::OursUpdatedTheirsDeleted // case 8 (conflict)
            }
        }
        (PathState::Present { oid: base_oid }, PathState::Absent, PathState::Present { oid: theirs_oid }) => {
            if theirs_oid == base_oid {
                MergeCase::OursDeletedTheirsRecreated // case 12
            } else {
                MergeCase::OursDeletedTheirsUpdated // case 9 (conflict)
            }
        }
        (
            PathState::Present { oid: base_oid },
            PathState::Present { oid: ours_oid },
            PathState::Present { oid: theirs_oid },
        ) => {
            if ours_oid == theirs_oid {
                MergeCase::BothUpdatedSame // case 13
            } else if ours_oid == base_oid {
                MergeCase::TheirsFastForward // case 14
            } else if theirs_oid == base_oid {
                MergeCase::OursFastForward // case 15
            } else {
                MergeCase::BothUpdatedDiffer // cases 16/17 (conflict)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
