//! Document-level data model (spec §3).
//!
//! [`FatDoc`] is the unit exchanged across sync boundaries; everything else
//! here is built from it — mutation results, changed-file records, conflict
//! records, merge-case tags, and the tagged [`SyncResult`] returned from a
//! sync run.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::StrategyTag;
use gitdocdb_git::GitOid;

// ---------------------------------------------------------------------------
// FatDoc
// ---------------------------------------------------------------------------

/// A document plus the metadata needed to exchange it across a sync boundary
/// (spec §3, glossary "FatDoc").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatDoc {
    /// The document's identifier (the reserved primary-key attribute).
    pub id: String,

    /// Storage name: the document's path within the working tree, including
    /// its extension (e.g. `"doc1.json"`).
    pub storage_name: String,

    /// Blob object identifier of the document's canonical content.
    pub oid: GitOid,

    /// Type tag for the stored content. `"json"` for the only implemented
    /// [`crate::config::SerializeFormat`]; other tags are reserved for
    /// `front-matter`/`yaml` storage.
    pub type_tag: String,
}

impl FatDoc {
    /// Construct a `FatDoc` for a JSON document.
    #[must_use]
    pub fn json(id: impl Into<String>, storage_name: impl Into<String>, oid: GitOid) -> Self {
        Self {
            id: id.into(),
            storage_name: storage_name.into(),
            oid,
            type_tag: "json".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// CommitDescriptor
// ---------------------------------------------------------------------------

/// Descriptor of the commit produced by a mutation (spec §3: "author,
/// committer, timestamp, message").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDescriptor {
    /// Commit author name.
    pub author: String,
    /// Commit committer name.
    pub committer: String,
    /// Commit timestamp, Unix seconds.
    pub timestamp: i64,
    /// Commit message.
    pub message: String,
}

// ---------------------------------------------------------------------------
// PutResult / DeleteResult
// ---------------------------------------------------------------------------

/// Outcome of a local `put` mutation (spec §3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResult {
    /// The document's identifier.
    pub id: String,
    /// The document's storage name.
    pub storage_name: String,
    /// Blob object identifier of the written content.
    pub oid: GitOid,
    /// Commit object identifier that recorded this write.
    pub commit_oid: GitOid,
    /// Descriptor of the commit that recorded this write.
    pub commit: CommitDescriptor,
}

/// Outcome of a local `delete` mutation (spec §3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    /// The document's identifier.
    pub id: String,
    /// The document's storage name.
    pub storage_name: String,
    /// Blob object identifier of the content that existed before deletion.
    pub oid: GitOid,
    /// Commit object identifier that recorded this delete.
    pub commit_oid: GitOid,
    /// Descriptor of the commit that recorded this delete.
    pub commit: CommitDescriptor,
}

// ---------------------------------------------------------------------------
// ChangedFile
// ---------------------------------------------------------------------------

/// A single path's change, as reported in a sync result (spec §3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangedFile {
    /// The path did not exist at the base and now does.
    Insert {
        /// The document as it now exists.
        new: FatDoc,
    },
    /// The path existed at the base and its content changed.
    Update {
        /// The document as it existed at the base.
        old: FatDoc,
        /// The document as it now exists.
        new: FatDoc,
    },
    /// The path existed at the base and no longer does.
    Delete {
        /// The document as it existed before deletion.
        old: FatDoc,
    },
}

impl ChangedFile {
    /// The path this change applies to (the storage name of whichever side
    /// is present).
    #[must_use]
    pub fn storage_name(&self) -> &str {
        match self {
            Self::Insert { new } | Self::Update { new, .. } => &new.storage_name,
            Self::Delete { old } => &old.storage_name,
        }
    }

    /// The conflict operation tag corresponding to this change's shape.
    #[must_use]
    pub const fn operation(&self) -> ConflictOperation {
        match self {
            Self::Insert { .. } => ConflictOperation::Insert,
            Self::Update { .. } => ConflictOperation::Update,
            Self::Delete { .. } => ConflictOperation::Delete,
        }
    }
}

// ---------------------------------------------------------------------------
// Conflict
// ---------------------------------------------------------------------------

/// The operation a [`Conflict`] or [`ChangedFile`] represents (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictOperation {
    /// The path was inserted.
    Insert,
    /// The path was updated.
    Update,
    /// Both sides merged at the property level (spec §4.4 audit record).
    UpdateMerge,
    /// The path was deleted.
    Delete,
}

impl fmt::Display for ConflictOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::UpdateMerge => write!(f, "update-merge"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A resolved conflict record (spec §3, §4.4 audit record).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The resulting document after resolution.
    pub fat_doc: FatDoc,
    /// The strategy tag that was applied to resolve this conflict.
    pub strategy: StrategyTag,
    /// The operation this conflict represents.
    pub operation: ConflictOperation,
}

impl Conflict {
    /// Render this conflict's contribution to a `resolve: …` commit message
    /// fragment (spec §4.4, §6: `resolve: <path>(<operation>,<short-oid>,<strategy>)`).
    #[must_use]
    pub fn commit_message_fragment(&self) -> String {
        format!(
            "resolve: {}({},{},{})",
            self.fat_doc.storage_name,
            self.operation,
            self.fat_doc.oid.short(),
            self.strategy
        )
    }
}

// ---------------------------------------------------------------------------
// MergeCase
// ---------------------------------------------------------------------------

/// One of the seventeen three-way merge patterns (spec §4.3).
///
/// Cases 4 and 5 both describe "both sides inserted the same path with
/// different content"; the spec's open question (§9) resolves them as the
/// same classifier output (`BothInsertedDiffer`) with the choice between an
/// `ours` or `theirs` default left to the resolver's configured strategy,
/// not to the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeCase {
    /// 1: absent at base, theirs inserted, ours absent.
    TheirsInserted,
    /// 2: absent at base, ours inserted, theirs absent.
    OursInserted,
    /// 3: absent at base, both inserted identical content.
    BothInsertedSame,
    /// 4/5: absent at base, both inserted different content — conflict.
    BothInsertedDiffer,
    /// 6: present at base, both deleted.
    BothDeleted,
    /// 8: present at base, ours updated, theirs deleted — conflict.
    OursUpdatedTheirsDeleted,
    /// 9/11: present at base, ours deleted, theirs updated — conflict. Case
    /// 11 ("symmetrical of 8") describes the identical (base present, ours
    /// absent, theirs present-and-changed) classifier situation as case 9;
    /// both collapse to this one output.
    OursDeletedTheirsUpdated,
    /// 7/10: present at base, ours unchanged, theirs deleted.
    OursUnchangedTheirsDeleted,
    /// 12: present at base, ours deleted, theirs deleted-then-recreated.
    OursDeletedTheirsRecreated,
    /// 13: present at base, both updated to identical content.
    BothUpdatedSame,
    /// 14: present at base, ours unchanged from base, theirs updated
    /// (fast-forward — theirs wins).
    TheirsFastForward,
    /// 15: present at base, theirs unchanged from base, ours updated (ours
    /// wins).
    OursFastForward,
    /// 16/17: present at base, both updated to different content —
    /// conflict. Cases 16 and 17 describe the identical classifier
    /// situation with two resolver branches distinguished only by the
    /// configured strategy's default (same open-question resolution as
    /// [`Self::BothInsertedDiffer`]; see spec §9).
    BothUpdatedDiffer,
}

impl MergeCase {
    /// Whether this case requires the resolver (spec §4.3: "Conflict cases
    /// (4,5,8,9,11,12,16,17) defer to the resolver").
    #[must_use]
    pub const fn is_conflict(self) -> bool {
        matches!(
            self,
            Self::BothInsertedDiffer
                | Self::OursUpdatedTheirsDeleted
                | Self::OursDeletedTheirsUpdated
                | Self::OursDeletedTheirsRecreated
                | Self::BothUpdatedDiffer
        )
    }
}

// ---------------------------------------------------------------------------
// DuplicatedFile
// ---------------------------------------------------------------------------

/// A path duplicated during a combine-unrelated-histories run (spec §4.8).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicatedFile {
    /// The document kept at its original path (the remote's value, per
    /// spec §4.8 step 2).
    pub original: FatDoc,
    /// The document moved to `<original-id>-from-<local-db-id>`.
    pub duplicate: FatDoc,
}

// ---------------------------------------------------------------------------
// SyncResult
// ---------------------------------------------------------------------------

/// The outcome of a single sync run (spec §3, §4.7).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncResult {
    /// Local and remote tips were already equal; nothing to do.
    Nop,
    /// Remote was an ancestor of local; local commits were pushed.
    Push {
        /// Commits pushed to the remote.
        commits: Vec<GitOid>,
        /// Local changes introduced by this push (normally empty; included
        /// for symmetry with the other variants).
        local_changes: Vec<ChangedFile>,
    },
    /// Local was an ancestor of remote; the remote tip was checked out.
    FastForwardMerge {
        /// Commits fast-forwarded into the local branch.
        commits: Vec<GitOid>,
        /// Remote changes now reflected locally.
        remote_changes: Vec<ChangedFile>,
    },
    /// Histories diverged without conflicts; a merge commit was created and
    /// pushed.
    MergeAndPush {
        /// Commits involved in the merge (local tip, remote tip, merge commit).
        commits: Vec<GitOid>,
        /// Changes that originated locally.
        local_changes: Vec<ChangedFile>,
        /// Changes that originated remotely.
        remote_changes: Vec<ChangedFile>,
    },
    /// Histories diverged with conflicts; conflicts were resolved, a merge
    /// commit was created, and it was pushed.
    ResolveConflictsAndPush {
        /// Commits involved in the merge (local tip, remote tip, merge commit).
        commits: Vec<GitOid>,
        /// Changes that originated locally.
        local_changes: Vec<ChangedFile>,
        /// Changes that originated remotely.
        remote_changes: Vec<ChangedFile>,
        /// Resolved conflict records, one per conflicting path.
        conflicts: Vec<Conflict>,
    },
    /// Local and remote had no common ancestor; histories were combined
    /// (spec §4.8).
    CombineDatabase {
        /// Commits involved in the combine (graft commit, combined merge
        /// commit).
        commits: Vec<GitOid>,
        /// Changes that originated locally.
        local_changes: Vec<ChangedFile>,
        /// Changes that originated remotely.
        remote_changes: Vec<ChangedFile>,
        /// Paths duplicated to avoid colliding identities.
        duplicates: Vec<DuplicatedFile>,
    },
    /// The sync task was canceled before completion (spec §4.6 coalescing).
    Canceled,
}

impl SyncResult {
    /// Short tag name, matching the `type` discriminant used in JSON.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Push { .. } => "push",
            Self::FastForwardMerge { .. } => "fast-forward-merge",
            Self::MergeAndPush { .. } => "merge-and-push",
            Self::ResolveConflictsAndPush { .. } => "resolve-conflicts-and-push",
            Self::CombineDatabase { .. } => "combine-database",
            Self::Canceled => "canceled",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(c: char) -> GitOid {
        c.to_string().repeat(40).parse().unwrap()
    }

    #[test]
    fn fat_doc_json_constructor_sets_type_tag() {
        let doc = FatDoc::json("1", "1.json", oid('a'));
        assert_eq!(doc.type_tag, "json");
        assert_eq!(doc.storage_name, "1.json");
    }

    #[test]
    fn changed_file_storage_name_and_operation() {
        let insert = ChangedFile::Insert {
            new: FatDoc::json("1", "1.json", oid('a')),
        };
        assert_eq!(insert.storage_name(), "1.json");
        assert_eq!(insert.operation(), ConflictOperation::Insert);

        let delete = ChangedFile::Delete {
            old: FatDoc::json("2", "2.json", oid('b')),
        };
        assert_eq!(delete.storage_name(), "2.json");
        assert_eq!(delete.operation(), ConflictOperation::Delete);
    }

    #[test]
    fn changed_file_serde_tag() {
        let update = ChangedFile::Update {
            old: FatDoc::json("1", "1.json", oid('a')),
            new: FatDoc::json("1", "1.json", oid('b')),
        };
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"type\":\"update\""));
    }

    #[test]
    fn conflict_commit_message_fragment() {
        let conflict = Conflict {
            fat_doc: FatDoc::json("1", "1.json", oid('a')),
            strategy: StrategyTag::OursProp,
            operation: ConflictOperation::UpdateMerge,
        };
        let fragment = conflict.commit_message_fragment();
        assert_eq!(
            fragment,
            format!("resolve: 1.json(update-merge,{},ours-prop)", oid('a').short())
        );
    }

    #[test]
    fn merge_case_is_conflict() {
        assert!(MergeCase::BothInsertedDiffer.is_conflict());
        assert!(MergeCase::BothUpdatedDiffer.is_conflict());
        assert!(!MergeCase::TheirsFastForward.is_conflict());
        assert!(!MergeCase::BothDeleted.is_conflict());
    }

    #[test]
    fn sync_result_kind_matches_json_tag() {
        let result = SyncResult::Nop;
        assert_eq!(result.kind(), "nop");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"type\":\"nop\""));

        let combine = SyncResult::CombineDatabase {
            commits: vec![],
            local_changes: vec![],
            remote_changes: vec![],
            duplicates: vec![],
        };
        assert_eq!(combine.kind(), "combine-database");
    }
}
