//! Combine-unrelated-histories path (spec §4.8).
//!
//! Reached from [`crate::sync_engine::SyncEngine`] when a sync attempt finds
//! no merge base between the local and remote tips and
//! `combineDbStrategy = combine-head-with-theirs`. Grafts the two histories
//! together, renames locally-colliding paths, and hands the caller a single
//! commit ready to push (the push itself, and the ref update of
//! [`RefName`] happen here too, since step 4 requires the local branch to
//! already point at the combined commit before the push is attempted).

use std::collections::BTreeMap;

use gitdocdb_git::{EntryMode, GitOid, GitRepo, RefEdit, RefName, TreeEdit};

use crate::error::DbError;
use crate::model::document::{ChangedFile, DuplicatedFile, FatDoc};
use crate::model::SyncResult;

/// Marker directory excluded from document paths (spec §6).
const METADATA_DIR: &str = ".gitddb";
/// Path of the database identity marker within `.gitddb/`.
const IDENTITY_PATH: &str = ".gitddb/identity";

/// Result of the combine path: the commit now pointed at by the local ref,
/// and the [`SyncResult::CombineDatabase`] to surface to the caller.
pub struct CombineOutcome {
    /// The commit the local ref now points at (already written, not yet
    /// necessarily pushed — the caller pushes it).
    pub combined_commit: GitOid,
    /// The result to report once the push succeeds.
    pub result: SyncResult,
}

/// Run the combine path (spec §4.8).
///
/// # Errors
/// Propagates any [`GitError`](gitdocdb_git::GitError) from the underlying
/// repository, wrapped as [`DbError::Git`].
pub fn run(repo: &dyn GitRepo, local_ref: &RefName, local: GitOid, remote: GitOid) -> Result<CombineOutcome, DbError> {
    let local_tree = tree_root(repo, local)?;
    let remote_tree = tree_root(repo, remote)?;
    let remote_commit_tree = repo.read_commit(remote)?.tree_oid;

    let local_db_id = read_db_id(repo, local)?.unwrap_or_else(|| local.short());

    let mut edits = Vec::new();
    let mut duplicates = Vec::new();

    for (path, &oid) in &local_tree {
        match remote_tree.get(path) {
            None => edits.push(TreeEdit::Upsert {
                path: path.clone(),
                mode: EntryMode::Blob,
                oid,
            }),
            Some(&remote_oid) if remote_oid == oid => {}
            Some(&remote_oid) => {
                let duplicate_path = duplicate_path(path, &local_db_id);
                edits.push(TreeEdit::Upsert {
                    path: duplicate_path.clone(),
                    mode: EntryMode::Blob,
                    oid,
                });
                duplicates.push(DuplicatedFile {
                    original: fat_doc(path, remote_oid),
                    duplicate: fat_doc(&duplicate_path, oid),
                });
            }
        }
    }

    // Step 1: graft remote's history in as a prior parent of local's root,
    // preserving local's own tree untouched.
    let local_tree_oid = repo.read_commit(local)?.tree_oid;
    let graft_commit = repo.create_commit(
        local_tree_oid,
        &[remote],
        "combine database head with theirs\n",
        None,
    )?;

    // Step 2-4: the combined tree starts from remote's tree (so the remote
    // value wins at every original path, and the local database identifier
    // is replaced by the remote's automatically), plus local-only paths and
    // renamed duplicates.
    let merged_tree = if edits.is_empty() {
        remote_commit_tree
    } else {
        repo.edit_tree(remote_commit_tree, &edits)?
    };

    let combined_commit = repo.create_commit(
        merged_tree,
        &[graft_commit, remote],
        "combine database head with theirs\n",
        Some(local_ref),
    )?;

    repo.atomic_ref_update(&[RefEdit {
        name: local_ref.clone(),
        new_oid: combined_commit,
        expected_old_oid: local,
    }])?;

    let merged_snapshot = tree_root(repo, combined_commit)?;
    let local_changes = changed_files(&local_tree, &merged_snapshot)?;
    let remote_changes = changed_files(&remote_tree, &merged_snapshot)?;

    Ok(CombineOutcome {
        combined_commit,
        result: SyncResult::CombineDatabase {
            commits: vec![graft_commit, combined_commit],
            local_changes,
            remote_changes,
            duplicates,
        },
    })
}

fn duplicate_path(path: &str, local_db_id: &str) -> String {
    match path.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-from-{local_db_id}.{ext}"),
        None => format!("{path}-from-{local_db_id}"),
    }
}

fn read_db_id(repo: &dyn GitRepo, commit: GitOid) -> Result<Option<String>, DbError> {
    let tree = repo.read_commit(commit)?.tree_oid;
    let Some(entry) = find_path(repo, tree, IDENTITY_PATH)? else {
        return Ok(None);
    };
    let bytes = repo.read_blob(entry)?;
    Ok(Some(String::from_utf8_lossy(&bytes).trim().to_owned()))
}

fn find_path(repo: &dyn GitRepo, tree: GitOid, path: &str) -> Result<Option<GitOid>, DbError> {
    let Some((head, rest)) = path.split_once('/') else {
        return Ok(repo
            .read_tree(tree)?
            .into_iter()
            .find(|entry| entry.name == path)
            .map(|entry| entry.oid));
    };
    let Some(child) = repo.read_tree(tree)?.into_iter().find(|entry| entry.name == head) else {
        return Ok(None);
    };
    find_path(repo, child.oid, rest)
}

fn tree_root(repo: &dyn GitRepo, commit: GitOid) -> Result<BTreeMap<String, GitOid>, DbError> {
    let info = repo.read_commit(commit)?;
    walk_tree(repo, info.tree_oid, String::new())
}

fn walk_tree(repo: &dyn GitRepo, tree: GitOid, prefix: String) -> Result<BTreeMap<String, GitOid>, DbError> {
    let mut out = BTreeMap::new();
    for entry in repo.read_tree(tree)? {
        if prefix.is_empty() && entry.name == METADATA_DIR {
            continue;
        }
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        match entry.mode {
            EntryMode::Tree => out.extend(walk_tree(repo, entry.oid, path)?),
            _ => {
                out.insert(path, entry.oid);
            }
        }
    }
    Ok(out)
}

fn changed_files(before: &BTreeMap<String, GitOid>, after: &BTreeMap<String, GitOid>) -> Result<Vec<ChangedFile>, DbError> {
    let mut out = Vec::new();
    let mut paths: Vec<&String> = before.keys().chain(after.keys()).collect();
    paths.sort_unstable();
    paths.dedup();

    for path in paths {
        let old_oid = before.get(path).copied();
        let new_oid = after.get(path).copied();
        match (old_oid, new_oid) {
            (None, Some(new)) => out.push(ChangedFile::Insert { new: fat_doc(path, new) }),
            (Some(old), None) => out.push(ChangedFile::Delete { old: fat_doc(path, old) }),
            (Some(old), Some(new)) if old != new => out.push(ChangedFile::Update {
                old: fat_doc(path, old),
                new: fat_doc(path, new),
            }),
            _ => {}
        }
    }
    Ok(out)
}

fn fat_doc(path: &str, oid: GitOid) -> FatDoc {
    let id = path.rsplit_once('.').map_or(path, |(stem, _)| stem).to_owned();
    FatDoc::json(id, path.to_owned(), oid)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use gitdocdb_git::testing::InMemoryRepo;
    use std::str::FromStr;

    #[test]
    fn duplicate_path_inserts_suffix_before_extension() {
        assert_eq!(duplicate_path("1.json", "b"), "1-from-b.json");
        assert_eq!(duplicate_path("nested/2.json", "b"), "nested/2-from-b.json");
    }

    #[test]
    fn duplicate_path_without_extension_appends_suffix() {
        assert_eq!(duplicate_path("README", "b"), "README-from-b");
    }

    fn commit_with(repo: &InMemoryRepo, parents: &[GitOid], files: &[(&str, &str)]) -> GitOid {
        let mut edits = Vec::new();
        for (path, content) in files {
            let blob = repo.write_blob(content.as_bytes()).unwrap();
            edits.push(TreeEdit::Upsert {
                path: (*path).to_owned(),
                mode: EntryMode::Blob,
                oid: blob,
            });
        }
        let base_tree = parents.first().map_or(GitOid::EMPTY_TREE, |p| repo.read_commit(*p).unwrap().tree_oid);
        let tree = repo.edit_tree(base_tree, &edits).unwrap();
        repo.create_commit(tree, parents, "test commit", None).unwrap()
    }

    #[test]
    fn run_grafts_and_renames_colliding_paths() {
        let repo = InMemoryRepo::new();
        let local_ref = RefName::from_str("refs/heads/main").unwrap();

        let local = commit_with(&repo, &[], &[(IDENTITY_PATH, "local-db"), ("1.json", "{\"a\":1}"), ("only-local.json", "{}")]);
        repo.write_ref(&local_ref, local, "local").unwrap();

        let remote = commit_with(&repo, &[], &[(IDENTITY_PATH, "remote-db"), ("1.json", "{\"a\":2}"), ("only-remote.json", "{}")]);

        let outcome = run(&repo, &local_ref, local, remote).unwrap();

        match &outcome.result {
            SyncResult::CombineDatabase { duplicates, commits, .. } => {
                assert_eq!(commits.len(), 2);
                assert_eq!(duplicates.len(), 1);
                assert_eq!(duplicates[0].duplicate.storage_name, "1-from-local-db.json");
            }
            other => panic!("expected CombineDatabase, got {other:?}"),
        }

        assert_eq!(repo.read_ref(&local_ref).unwrap(), Some(outcome.combined_commit));

        let merged_tree = repo.read_commit(outcome.combined_commit).unwrap().tree_oid;
        let names: Vec<String> = repo.read_tree(merged_tree).unwrap().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&"1.json".to_owned()));
        assert!(names.contains(&"1-from-local-db.json".to_owned()));
        assert!(names.contains(&"only-local.json".to_owned()));
        assert!(names.contains(&"only-remote.json".to_owned()));
    }
}
