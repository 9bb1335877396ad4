//! An in-memory [`GitRepo`] test double.
//!
//! Content-addressed like real git, but hashed with a cheap non-cryptographic
//! digest instead of SHA-1 — nothing here is ever compared against a real
//! repository, so collision resistance beyond "good enough for a test fixture"
//! isn't needed. Gated behind the `testing` feature so it never ships in a
//! release build of this crate; `gitdocdb`'s own test suite pulls it in as a
//! dev-dependency feature.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use crate::error::GitError;
use crate::repo::GitRepo;
use crate::types::{CommitInfo, EntryMode, GitOid, RefEdit, RefName, TreeEdit, TreeEntry};

fn content_oid(kind: &str, bytes: &[u8]) -> GitOid {
    let mut out = [0u8; 20];
    for (i, chunk) in out.chunks_mut(8).enumerate() {
        let mut hasher = DefaultHasher::new();
        kind.hash(&mut hasher);
        i.hash(&mut hasher);
        bytes.hash(&mut hasher);
        let digest = hasher.finish().to_be_bytes();
        chunk.copy_from_slice(&digest[..chunk.len()]);
    }
    GitOid::from_bytes(out)
}

#[derive(Clone)]
struct StoredTree(Vec<TreeEntry>);

#[derive(Default)]
struct Store {
    blobs: HashMap<GitOid, Vec<u8>>,
    trees: HashMap<GitOid, StoredTree>,
    commits: HashMap<GitOid, CommitInfo>,
    refs: HashMap<String, GitOid>,
}

/// An in-memory [`GitRepo`]. One instance is one repository; clone the
/// `Arc<dyn GitRepo>` handle to share it, not the repo itself.
///
/// [`InMemoryRepo::set_remote`] links a single named remote so
/// [`GitRepo::fetch`]/[`GitRepo::push_branch`] have something to talk to —
/// enough to drive [`crate::GitRepo`] through a real two-repository sync
/// without a filesystem or network.
#[derive(Default)]
pub struct InMemoryRepo {
    store: Mutex<Store>,
    remote: Mutex<Option<Arc<InMemoryRepo>>>,
}

impl InMemoryRepo {
    /// Create an empty repository (no refs, just the well-known empty tree).
    #[must_use]
    pub fn new() -> Self {
        let mut store = Store::default();
        store.trees.insert(GitOid::EMPTY_TREE, StoredTree(Vec::new()));
        Self {
            store: Mutex::new(store),
            remote: Mutex::new(None),
        }
    }

    /// Link `remote` as the repository `fetch`/`push_branch` operate
    /// against, regardless of the remote name/URL string passed to those
    /// methods.
    pub fn set_remote(&self, remote: Arc<InMemoryRepo>) {
        *self.remote.lock().unwrap() = Some(remote);
    }
}

impl GitRepo for InMemoryRepo {
    fn read_ref(&self, name: &RefName) -> Result<Option<GitOid>, GitError> {
        Ok(self.store.lock().unwrap().refs.get(name.as_str()).copied())
    }

    fn write_ref(&self, name: &RefName, oid: GitOid, _log_message: &str) -> Result<(), GitError> {
        self.store.lock().unwrap().refs.insert(name.as_str().to_owned(), oid);
        Ok(())
    }

    fn atomic_ref_update(&self, edits: &[RefEdit]) -> Result<(), GitError> {
        let mut store = self.store.lock().unwrap();
        for edit in edits {
            let current = store.refs.get(edit.name.as_str()).copied().unwrap_or(GitOid::ZERO);
            if current != edit.expected_old_oid {
                return Err(GitError::RefConflict {
                    ref_name: edit.name.as_str().to_owned(),
                    message: format!("expected {}, found {current}", edit.expected_old_oid),
                });
            }
        }
        for edit in edits {
            store.refs.insert(edit.name.as_str().to_owned(), edit.new_oid);
        }
        Ok(())
    }

    fn rev_parse(&self, spec: &str) -> Result<GitOid, GitError> {
        self.rev_parse_opt(spec)?.ok_or_else(|| GitError::NotFound {
            message: format!("cannot resolve `{spec}`"),
        })
    }

    fn rev_parse_opt(&self, spec: &str) -> Result<Option<GitOid>, GitError> {
        let store = self.store.lock().unwrap();
        if let Some(oid) = store.refs.get(spec).copied() {
            return Ok(Some(oid));
        }
        if let Ok(oid) = spec.parse::<GitOid>() {
            if store.commits.contains_key(&oid) {
                return Ok(Some(oid));
            }
        }
        Ok(None)
    }

    fn read_blob(&self, oid: GitOid) -> Result<Vec<u8>, GitError> {
        self.store
            .lock()
            .unwrap()
            .blobs
            .get(&oid)
            .cloned()
            .ok_or_else(|| GitError::NotFound { message: format!("no blob {oid}") })
    }

    fn read_tree(&self, oid: GitOid) -> Result<Vec<TreeEntry>, GitError> {
        self.store
            .lock()
            .unwrap()
            .trees
            .get(&oid)
            .map(|tree| tree.0.clone())
            .ok_or_else(|| GitError::NotFound { message: format!("no tree {oid}") })
    }

    fn read_commit(&self, oid: GitOid) -> Result<CommitInfo, GitError> {
        self.store
            .lock()
            .unwrap()
            .commits
            .get(&oid)
            .cloned()
            .ok_or_else(|| GitError::NotFound { message: format!("no commit {oid}") })
    }

    fn write_blob(&self, data: &[u8]) -> Result<GitOid, GitError> {
        let oid = content_oid("blob", data);
        self.store.lock().unwrap().blobs.insert(oid, data.to_owned());
        Ok(oid)
    }

    fn create_commit(
        &self,
        tree: GitOid,
        parents: &[GitOid],
        message: &str,
        update_ref: Option<&RefName>,
    ) -> Result<GitOid, GitError> {
        let mut store = self.store.lock().unwrap();
        if !store.trees.contains_key(&tree) {
            return Err(GitError::NotFound { message: format!("no tree {tree}") });
        }
        let mut key = tree.to_string();
        for parent in parents {
            key.push(' ');
            key.push_str(&parent.to_string());
        }
        key.push('\n');
        key.push_str(message);
        let oid = content_oid("commit", key.as_bytes());
        store.commits.insert(
            oid,
            CommitInfo {
                tree_oid: tree,
                parents: parents.to_vec(),
                message: message.to_owned(),
                author: "gitdocdb".to_owned(),
                committer: "gitdocdb".to_owned(),
                time: 0,
            },
        );
        if let Some(name) = update_ref {
            store.refs.insert(name.as_str().to_owned(), oid);
        }
        Ok(oid)
    }

    fn edit_tree(&self, base: GitOid, edits: &[TreeEdit]) -> Result<GitOid, GitError> {
        let mut store = self.store.lock().unwrap();
        let root = apply_edits(&mut store, base, edits)?;
        Ok(root)
    }

    fn is_ancestor(&self, ancestor: GitOid, descendant: GitOid) -> Result<bool, GitError> {
        let store = self.store.lock().unwrap();
        let mut frontier = vec![descendant];
        let mut seen = std::collections::HashSet::new();
        while let Some(oid) = frontier.pop() {
            if oid == ancestor {
                return Ok(true);
            }
            if !seen.insert(oid) {
                continue;
            }
            if let Some(info) = store.commits.get(&oid) {
                frontier.extend(info.parents.iter().copied());
            }
        }
        Ok(false)
    }

    fn merge_base(&self, a: GitOid, b: GitOid) -> Result<Option<GitOid>, GitError> {
        let store = self.store.lock().unwrap();
        let ancestors_of = |start: GitOid| {
            let mut seen = std::collections::HashSet::new();
            let mut frontier = vec![start];
            while let Some(oid) = frontier.pop() {
                if !seen.insert(oid) {
                    continue;
                }
                if let Some(info) = store.commits.get(&oid) {
                    frontier.extend(info.parents.iter().copied());
                }
            }
            seen
        };
        let a_ancestors = ancestors_of(a);
        let mut frontier = vec![b];
        let mut seen = std::collections::HashSet::new();
        while let Some(oid) = frontier.pop() {
            if a_ancestors.contains(&oid) {
                return Ok(Some(oid));
            }
            if !seen.insert(oid) {
                continue;
            }
            if let Some(info) = store.commits.get(&oid) {
                frontier.extend(info.parents.iter().copied());
            }
        }
        Ok(None)
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<GitOid, GitError> {
        let Some(linked) = self.remote.lock().unwrap().clone() else {
            return Err(GitError::FetchFailed {
                remote: remote.to_owned(),
                message: "no remote linked".to_owned(),
            });
        };
        let branch_ref = RefName::new(&format!("refs/heads/{branch}")).map_err(|e| GitError::FetchFailed {
            remote: remote.to_owned(),
            message: e.to_string(),
        })?;
        let oid = linked.read_ref(&branch_ref)?.ok_or_else(|| GitError::FetchFailed {
            remote: remote.to_owned(),
            message: format!("remote has no branch '{branch}'"),
        })?;
        let remote_store = linked.store.lock().unwrap();
        let mut local_store = self.store.lock().unwrap();
        copy_reachable(&remote_store, &mut local_store, oid);
        Ok(oid)
    }

    fn push_branch(
        &self,
        remote: &str,
        local_ref: &str,
        remote_ref: &str,
        expected_remote_oid: Option<GitOid>,
    ) -> Result<(), GitError> {
        let Some(linked) = self.remote.lock().unwrap().clone() else {
            return Err(GitError::PushFailed {
                remote: remote.to_owned(),
                message: "no remote linked".to_owned(),
            });
        };
        let local_ref_name = RefName::new(local_ref).map_err(|e| GitError::PushFailed {
            remote: remote.to_owned(),
            message: e.to_string(),
        })?;
        let commit = self.read_ref(&local_ref_name)?.ok_or_else(|| GitError::PushFailed {
            remote: remote.to_owned(),
            message: format!("no such local ref '{local_ref}'"),
        })?;
        let remote_ref_name = RefName::new(remote_ref).map_err(|e| GitError::PushFailed {
            remote: remote.to_owned(),
            message: e.to_string(),
        })?;

        let expected = expected_remote_oid.unwrap_or(GitOid::ZERO);
        let current = linked.read_ref(&remote_ref_name)?.unwrap_or(GitOid::ZERO);
        if current != expected {
            return Err(GitError::PushRejected {
                remote: remote.to_owned(),
                message: format!("expected remote at {expected}, found {current}"),
            });
        }

        {
            let local_store = self.store.lock().unwrap();
            let mut remote_store = linked.store.lock().unwrap();
            copy_reachable(&local_store, &mut remote_store, commit);
        }
        linked.write_ref(&remote_ref_name, commit, "push")
    }
}

fn copy_reachable(from: &Store, to: &mut Store, commit: GitOid) {
    if to.commits.contains_key(&commit) {
        return;
    }
    let Some(info) = from.commits.get(&commit).cloned() else {
        return;
    };
    copy_tree(from, to, info.tree_oid);
    for parent in info.parents.clone() {
        copy_reachable(from, to, parent);
    }
    to.commits.insert(commit, info);
}

fn copy_tree(from: &Store, to: &mut Store, tree: GitOid) {
    if to.trees.contains_key(&tree) {
        return;
    }
    let Some(stored) = from.trees.get(&tree).cloned() else {
        return;
    };
    for entry in &stored.0 {
        if entry.mode == EntryMode::Tree {
            copy_tree(from, to, entry.oid);
        } else if let Some(blob) = from.blobs.get(&entry.oid) {
            to.blobs.entry(entry.oid).or_insert_with(|| blob.clone());
        }
    }
    to.trees.insert(tree, stored);
}

fn apply_edits(store: &mut Store, base: GitOid, edits: &[TreeEdit]) -> Result<GitOid, GitError> {
    let mut entries: Vec<TreeEntry> = store
        .trees
        .get(&base)
        .ok_or_else(|| GitError::NotFound { message: format!("no tree {base}") })?
        .0
        .clone();

    for edit in edits {
        match edit {
            TreeEdit::Upsert { path, mode, oid } => upsert_path(store, &mut entries, path, *mode, *oid)?,
            TreeEdit::Remove { path } => remove_path(store, &mut entries, path),
        }
    }
    write_tree(store, entries)
}

fn write_tree(store: &mut Store, mut entries: Vec<TreeEntry>) -> Result<GitOid, GitError> {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let mut key = String::new();
    for entry in &entries {
        key.push_str(&format!("{:?} {} {}\n", entry.mode, entry.name, entry.oid));
    }
    let oid = content_oid("tree", key.as_bytes());
    store.trees.insert(oid, StoredTree(entries));
    Ok(oid)
}

fn upsert_path(store: &mut Store, entries: &mut Vec<TreeEntry>, path: &str, mode: EntryMode, oid: GitOid) -> Result<(), GitError> {
    match path.split_once('/') {
        None => {
            entries.retain(|e| e.name != path);
            entries.push(TreeEntry { name: path.to_owned(), mode, oid });
            Ok(())
        }
        Some((head, rest)) => {
            let child_tree = entries
                .iter()
                .find(|e| e.name == head)
                .map(|e| e.oid)
                .unwrap_or(GitOid::EMPTY_TREE);
            if !store.trees.contains_key(&child_tree) {
                store.trees.insert(child_tree, StoredTree(Vec::new()));
            }
            let mut child_entries = store.trees.get(&child_tree).unwrap().0.clone();
            upsert_path(store, &mut child_entries, rest, mode, oid)?;
            let new_child_oid = write_tree(store, child_entries)?;
            entries.retain(|e| e.name != head);
            entries.push(TreeEntry {
                name: head.to_owned(),
                mode: EntryMode::Tree,
                oid: new_child_oid,
            });
            Ok(())
        }
    }
}

fn remove_path(store: &mut Store, entries: &mut Vec<TreeEntry>, path: &str) {
    match path.split_once('/') {
        None => entries.retain(|e| e.name != path),
        Some((head, rest)) => {
            let Some(child_tree) = entries.iter().find(|e| e.name == head).map(|e| e.oid) else {
                return;
            };
            let Some(stored) = store.trees.get(&child_tree) else {
                return;
            };
            let mut child_entries = stored.0.clone();
            remove_path(store, &mut child_entries, rest);
            entries.retain(|e| e.name != head);
            if !child_entries.is_empty() {
                if let Ok(new_child_oid) = write_tree(store, child_entries) {
                    entries.push(TreeEntry {
                        name: head.to_owned(),
                        mode: EntryMode::Tree,
                        oid: new_child_oid,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn write_blob_then_read_back() {
        let repo = InMemoryRepo::new();
        let oid = repo.write_blob(b"hello").unwrap();
        assert_eq!(repo.read_blob(oid).unwrap(), b"hello");
    }

    #[test]
    fn edit_tree_upsert_and_remove_round_trip() {
        let repo = InMemoryRepo::new();
        let blob = repo.write_blob(b"{}").unwrap();
        let tree = repo
            .edit_tree(
                GitOid::EMPTY_TREE,
                &[TreeEdit::Upsert {
                    path: "a/b.json".to_owned(),
                    mode: EntryMode::Blob,
                    oid: blob,
                }],
            )
            .unwrap();
        let root = repo.read_tree(tree).unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].name, "a");

        let removed = repo.edit_tree(tree, &[TreeEdit::Remove { path: "a/b.json".to_owned() }]).unwrap();
        assert!(repo.read_tree(removed).unwrap().is_empty());
    }

    #[test]
    fn atomic_ref_update_rejects_stale_expected_oid() {
        let repo = InMemoryRepo::new();
        let name = RefName::from_str("refs/heads/main").unwrap();
        let commit = repo.create_commit(GitOid::EMPTY_TREE, &[], "init", None).unwrap();
        let err = repo
            .atomic_ref_update(&[RefEdit {
                name,
                new_oid: commit,
                expected_old_oid: commit,
            }])
            .unwrap_err();
        assert!(matches!(err, GitError::RefConflict { .. }));
    }

    #[test]
    fn fetch_without_linked_remote_fails() {
        let repo = InMemoryRepo::new();
        let err = repo.fetch("origin", "main").unwrap_err();
        assert!(matches!(err, GitError::FetchFailed { .. }));
    }

    #[test]
    fn fetch_copies_reachable_objects_from_linked_remote() {
        let remote = Arc::new(InMemoryRepo::new());
        let main = RefName::from_str("refs/heads/main").unwrap();
        let commit = remote.create_commit(GitOid::EMPTY_TREE, &[], "seed", Some(&main)).unwrap();

        let local = InMemoryRepo::new();
        local.set_remote(Arc::clone(&remote));
        let fetched = local.fetch("origin", "main").unwrap();

        assert_eq!(fetched, commit);
        assert_eq!(local.read_commit(commit).unwrap().message, "seed");
    }

    #[test]
    fn push_branch_rejects_when_remote_moved_past_expected() {
        let remote = Arc::new(InMemoryRepo::new());
        let main = RefName::from_str("refs/heads/main").unwrap();
        let surprise = remote.create_commit(GitOid::EMPTY_TREE, &[], "surprise", Some(&main)).unwrap();

        let local = InMemoryRepo::new();
        local.set_remote(Arc::clone(&remote));
        local.create_commit(GitOid::EMPTY_TREE, &[], "local work", Some(&main)).unwrap();

        let err = local
            .push_branch("origin", "refs/heads/main", "refs/heads/main", None)
            .unwrap_err();
        assert!(matches!(err, GitError::PushRejected { .. }));
        assert_eq!(remote.read_ref(&main).unwrap(), Some(surprise));
    }

    #[test]
    fn push_branch_advances_linked_remote_and_copies_objects() {
        let remote = Arc::new(InMemoryRepo::new());
        let local = InMemoryRepo::new();
        local.set_remote(Arc::clone(&remote));

        let main = RefName::from_str("refs/heads/main").unwrap();
        let blob = local.write_blob(b"{}").unwrap();
        let tree = local
            .edit_tree(
                GitOid::EMPTY_TREE,
                &[TreeEdit::Upsert { path: "a.json".to_owned(), mode: EntryMode::Blob, oid: blob }],
            )
            .unwrap();
        let commit = local.create_commit(tree, &[], "push me", Some(&main)).unwrap();

        local.push_branch("origin", "refs/heads/main", "refs/heads/main", None).unwrap();

        assert_eq!(remote.read_ref(&main).unwrap(), Some(commit));
        assert_eq!(remote.read_commit(commit).unwrap().tree_oid, tree);
        assert_eq!(remote.read_blob(blob).unwrap(), b"{}");
    }
}
