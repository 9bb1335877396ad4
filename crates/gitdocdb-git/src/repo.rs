//! The [`GitRepo`] trait — the single abstraction boundary between the core
//! database crate and git.
//!
//! `gitdocdb` interacts with git exclusively through this trait. The trait is
//! object-safe so callers can use `&dyn GitRepo` or `Box<dyn GitRepo>`, which
//! is how `Database` holds it: one repository handle shared across every
//! task the task queue runs.
//!
//! Method groups, and the spec section each backs:
//!
//! | Group        | Methods                                      | Spec section |
//! |--------------|-----------------------------------------------|--------------|
//! | Refs         | `read_ref`, `write_ref`, `atomic_ref_update`  | §4.6, §5     |
//! | Rev-parse    | `rev_parse`, `rev_parse_opt`                  | §4.7         |
//! | Object read  | `read_blob`, `read_tree`, `read_commit`       | §3, §4.1     |
//! | Object write | `write_blob`, `create_commit`                | §3, §6       |
//! | Tree editing | `edit_tree`                                  | §4.7 step 5  |
//! | Ancestry     | `is_ancestor`, `merge_base`                   | §4.3, §4.7   |
//! | Remote       | `fetch`, `push_branch`                        | §4.7, §4.8   |

use crate::error::GitError;
use crate::types::{CommitInfo, GitOid, RefEdit, RefName, TreeEdit, TreeEntry};

/// The git abstraction trait used by the `gitdocdb` core.
///
/// Implementations may be backed by `gix` (the only backend provided here)
/// or a test double. No maw-style working-tree/checkout surface is exposed:
/// the core never manipulates a working tree directly, it only ever reads
/// and writes blobs, trees, and commits (spec §1 Non-goals: no partial-tree
/// synchronization, and document mutations write one blob per document, not
/// a working-tree edit).
///
/// # Object safety
///
/// This trait is object-safe: no generic methods, no `Self` in return
/// position outside of `Result`. Callers may use `&dyn GitRepo` or
/// `Box<dyn GitRepo>`.
pub trait GitRepo: Send + Sync {
    // -----------------------------------------------------------------------
    // Refs
    // -----------------------------------------------------------------------

    /// Resolve a ref to its OID, returning `None` if the ref does not exist.
    fn read_ref(&self, name: &RefName) -> Result<Option<GitOid>, GitError>;

    /// Create or overwrite a ref unconditionally.
    fn write_ref(&self, name: &RefName, oid: GitOid, log_message: &str) -> Result<(), GitError>;

    /// Atomically apply a batch of ref updates with compare-and-swap semantics.
    ///
    /// All updates succeed or all fail. Each [`RefEdit`] carries an expected
    /// old OID; if any ref's current value differs, the entire transaction is
    /// aborted and [`GitError::RefConflict`] is returned. This is the
    /// mechanism behind invariant 1 in spec §3: exactly one write transaction
    /// commits `HEAD` at a time.
    fn atomic_ref_update(&self, edits: &[RefEdit]) -> Result<(), GitError>;

    // -----------------------------------------------------------------------
    // Rev-parse
    // -----------------------------------------------------------------------

    /// Resolve a revision specification (e.g. `"HEAD"`, a branch name, an
    /// OID) to an OID. Returns [`GitError::NotFound`] if unresolvable.
    fn rev_parse(&self, spec: &str) -> Result<GitOid, GitError>;

    /// Like [`rev_parse`](Self::rev_parse) but returns `None` instead of an
    /// error when the spec cannot be resolved.
    fn rev_parse_opt(&self, spec: &str) -> Result<Option<GitOid>, GitError>;

    // -----------------------------------------------------------------------
    // Object read
    // -----------------------------------------------------------------------

    /// Read the contents of a blob object.
    fn read_blob(&self, oid: GitOid) -> Result<Vec<u8>, GitError>;

    /// Read the entries of a tree object (one level deep, not recursive).
    fn read_tree(&self, oid: GitOid) -> Result<Vec<TreeEntry>, GitError>;

    /// Read a commit object's metadata.
    fn read_commit(&self, oid: GitOid) -> Result<CommitInfo, GitError>;

    // -----------------------------------------------------------------------
    // Object write
    // -----------------------------------------------------------------------

    /// Write a blob to the object store and return its OID.
    ///
    /// Called with the bytes produced by the canonical serializer (spec
    /// §4.1) — this is the only path by which a document's content enters
    /// the object store, so `blob_oid(serialize(x))` (invariant 3, spec §3)
    /// is exactly this function's return value.
    fn write_blob(&self, data: &[u8]) -> Result<GitOid, GitError>;

    /// Create a commit object and update a ref to point to it.
    fn create_commit(
        &self,
        tree: GitOid,
        parents: &[GitOid],
        message: &str,
        update_ref: Option<&RefName>,
    ) -> Result<GitOid, GitError>;

    // -----------------------------------------------------------------------
    // Tree editing
    // -----------------------------------------------------------------------

    /// Apply a set of edits to an existing tree and return the OID of the new
    /// tree. Edits may insert, update, or remove entries at arbitrary paths;
    /// intermediate trees are created or updated as needed. This is how the
    /// sync engine builds a merge tree in-memory (spec §4.7 step 5) without
    /// ever checking out a working copy.
    fn edit_tree(&self, base: GitOid, edits: &[TreeEdit]) -> Result<GitOid, GitError>;

    // -----------------------------------------------------------------------
    // Ancestry
    // -----------------------------------------------------------------------

    /// Check if `ancestor` is an ancestor of `descendant` (or equal to it).
    fn is_ancestor(&self, ancestor: GitOid, descendant: GitOid) -> Result<bool, GitError>;

    /// Find the best common ancestor (merge base) of two commits. Returns
    /// `None` if the commits have no common ancestor — the combine-path
    /// trigger in spec §4.8.
    fn merge_base(&self, a: GitOid, b: GitOid) -> Result<Option<GitOid>, GitError>;

    // -----------------------------------------------------------------------
    // Remote
    // -----------------------------------------------------------------------

    /// Fetch the tip of `branch` from `remote`, returning its OID.
    ///
    /// Does not modify any local branch ref; the caller compares the
    /// returned OID against local `HEAD` (spec §4.7 step 2).
    fn fetch(&self, remote: &str, branch: &str) -> Result<GitOid, GitError>;

    /// Push `local_ref` to `remote_ref` on `remote`.
    ///
    /// Returns [`GitError::PushRejected`] if the remote ref moved since the
    /// last fetch (non-fast-forward) — the sync engine's retry loop matches
    /// on this variant specifically (spec §4.7 step 6).
    fn push_branch(
        &self,
        remote: &str,
        local_ref: &str,
        remote_ref: &str,
        expected_remote_oid: Option<GitOid>,
    ) -> Result<(), GitError>;
}
