//! Sync engine (spec §4.7): fetch → classify → resolve → write → push.
//!
//! [`SyncEngine::run`] drives one full sync attempt through the state
//! sequence `fetching → classifying → resolving → writing → pushing`,
//! returning the terminal [`SyncResult`]. The task queue (§4.6) is what
//! serializes these attempts against a database's other tasks; this module
//! only knows about one attempt at a time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use serde_json::Value;
use tokio::time::sleep;

use gitdocdb_git::{EntryMode, GitError, GitOid, GitRepo, RefEdit, RefName, TreeEdit};

use crate::combine;
use crate::config::SyncOptions;
use crate::error::DbError;
use crate::events::{Event, EventBus, TaskMeta};
use crate::merge::classify::{self, PathState};
use crate::merge::resolve::{self, ResolvedValue};
use crate::model::document::{ChangedFile, Conflict, FatDoc};
use crate::model::{MergeCase, SyncResult};
use crate::task_queue::{CancelToken, TaskId, TaskKind};

/// Marker directory excluded from document sync (spec §6: "a database
/// identity marker lives under `.gitddb/`, not synchronized through document
/// APIs").
const METADATA_DIR: &str = ".gitddb";

/// Drives one sync attempt for a single database (spec §4.7).
pub struct SyncEngine {
    repo: Arc<dyn GitRepo>,
    options: SyncOptions,
    local_ref: RefName,
    remote_branch: String,
    events: EventBus,
}

impl SyncEngine {
    /// Build a sync engine bound to `local_ref` (typically `refs/heads/main`)
    /// tracking `remote_branch` on the configured remote. `events` is the
    /// same bus the owning [`crate::Database`] publishes its lifecycle
    /// events on.
    #[must_use]
    pub fn new(repo: Arc<dyn GitRepo>, options: SyncOptions, local_ref: RefName, remote_branch: String, events: EventBus) -> Self {
        Self {
            repo,
            options,
            local_ref,
            remote_branch,
            events,
        }
    }

    /// Run one sync attempt to completion (spec §4.7 protocol steps 1-7).
    ///
    /// `task_id` correlates the `change`/`localChange`/`remoteChange`/
    /// `combine` events this run emits with the task queue's own
    /// `start`/`complete` events for the same task (spec §6).
    ///
    /// # Errors
    /// Returns [`DbError::NoMergeBaseFound`] if the histories are unrelated
    /// and `combineDbStrategy = throw-error`; [`DbError::SyncWorkerFetch`] if
    /// fetch retries are exhausted; [`DbError::PushWorker`] for non-retriable
    /// push failures; and propagates [`GitError`]s wrapped as [`DbError::Git`].
    pub async fn run(&self, cancel: &CancelToken, task_id: TaskId) -> Result<SyncResult, DbError> {
        let mut attempts_left = self.options.retry + 1;
        loop {
            match self.attempt(cancel).await {
                Ok(outcome) => {
                    self.emit_outcome(task_id, &outcome);
                    return Ok(outcome);
                }
                Err(AttemptError::StalePush) if attempts_left > 1 => {
                    attempts_left -= 1;
                    tracing::info!(remaining = attempts_left, "push rejected, retrying sync");
                }
                Err(AttemptError::StalePush) => {
                    return Err(DbError::PushWorker {
                        detail: "push rejected after exhausting retry budget".to_owned(),
                    });
                }
                Err(AttemptError::Db(err)) => return Err(err),
            }
            if cancel.is_canceled() {
                return Ok(SyncResult::Canceled);
            }
        }
    }

    /// Emit `localChange`/`remoteChange`/`combine`/`change` for a completed
    /// attempt (spec §6). `Nop` and `Canceled` carry no changes to report.
    fn emit_outcome(&self, task_id: TaskId, outcome: &SyncResult) {
        let meta = TaskMeta {
            task_id,
            timestamp: SystemTime::now(),
            kind: TaskKind::Sync,
        };

        match outcome {
            SyncResult::Push { local_changes, .. } => {
                self.events.emit(Event::LocalChange(meta.clone(), local_changes.clone()));
            }
            SyncResult::FastForwardMerge { remote_changes, .. } => {
                self.events.emit(Event::RemoteChange(meta.clone(), remote_changes.clone()));
            }
            SyncResult::MergeAndPush { local_changes, remote_changes, .. }
            | SyncResult::ResolveConflictsAndPush { local_changes, remote_changes, .. } => {
                self.events.emit(Event::LocalChange(meta.clone(), local_changes.clone()));
                self.events.emit(Event::RemoteChange(meta.clone(), remote_changes.clone()));
            }
            SyncResult::CombineDatabase { local_changes, remote_changes, duplicates, .. } => {
                self.events.emit(Event::LocalChange(meta.clone(), local_changes.clone()));
                self.events.emit(Event::RemoteChange(meta.clone(), remote_changes.clone()));
                self.events.emit(Event::Combine(meta.clone(), duplicates.clone()));
            }
            SyncResult::Nop | SyncResult::Canceled => {}
        }

        self.events.emit(Event::Change(meta, outcome.clone()));
    }

    async fn attempt(&self, cancel: &CancelToken) -> Result<SyncResult, AttemptError> {
        let remote_tip = self.fetch_with_retry(cancel).await?;
        let local_tip = self.repo.rev_parse_opt(self.local_ref.as_str())?;

        match local_tip {
            None => {
                // Nothing local yet: adopt the remote tip wholesale.
                self.fast_forward_local(remote_tip)?;
                let changes = self.changed_files(GitOid::EMPTY_TREE, remote_tip)?;
                Ok(SyncResult::FastForwardMerge {
                    commits: vec![remote_tip],
                    remote_changes: changes,
                })
            }
            Some(local) if local == remote_tip => Ok(SyncResult::Nop),
            Some(local) if self.repo.is_ancestor(remote_tip, local)? => {
                self.push(local, remote_tip)?;
                let changes = self.changed_files(remote_tip, local)?;
                Ok(SyncResult::Push {
                    commits: vec![local],
                    local_changes: changes,
                })
            }
            Some(local) if self.repo.is_ancestor(local, remote_tip)? => {
                self.fast_forward_local(remote_tip)?;
                let changes = self.changed_files(local, remote_tip)?;
                Ok(SyncResult::FastForwardMerge {
                    commits: vec![remote_tip],
                    remote_changes: changes,
                })
            }
            Some(local) => self.merge_diverged(local, remote_tip),
        }
    }

    async fn fetch_with_retry(&self, cancel: &CancelToken) -> Result<GitOid, AttemptError> {
        let mut attempts_left = self.options.retry + 1;
        loop {
            if cancel.is_canceled() {
                return Err(AttemptError::Db(DbError::DatabaseClosing));
            }
            match self.repo.fetch(&self.options.remote_url, &self.remote_branch) {
                Ok(oid) => return Ok(oid),
                Err(err) if attempts_left > 1 => {
                    attempts_left -= 1;
                    tracing::warn!(error = %err, remaining = attempts_left, "fetch failed, retrying");
                    sleep(std::time::Duration::from_millis(self.options.retry_interval_ms)).await;
                }
                Err(err) => {
                    return Err(AttemptError::Db(DbError::SyncWorkerFetch {
                        detail: err.to_string(),
                    }))
                }
            }
        }
    }

    fn merge_diverged(&self, local: GitOid, remote: GitOid) -> Result<SyncResult, AttemptError> {
        let Some(base) = self.repo.merge_base(local, remote)? else {
            return match self.options.combine_db_strategy {
                crate::config::CombineDbStrategy::ThrowError => Err(AttemptError::Db(DbError::NoMergeBaseFound)),
                crate::config::CombineDbStrategy::CombineHeadWithTheirs => {
                    combine::run(self.repo.as_ref(), &self.local_ref, local, remote)
                        .map_err(AttemptError::Db)
                        .and_then(|outcome| {
                            self.push(outcome.combined_commit, remote).map(|()| outcome.result)
                        })
                }
            };
        };

        let base_tree = self.tree_root(base)?;
        let ours_tree = self.tree_root(local)?;
        let theirs_tree = self.tree_root(remote)?;

        let mut paths: Vec<&String> = base_tree
            .keys()
            .chain(ours_tree.keys())
            .chain(theirs_tree.keys())
            .collect();
        paths.sort_unstable();
        paths.dedup();

        let mut edits = Vec::new();
        let mut conflicts = Vec::new();
        let mut any_change = false;

        for path in paths {
            let base_oid = base_tree.get(path).copied();
            let ours_oid = ours_tree.get(path).copied();
            let theirs_oid = theirs_tree.get(path).copied();

            if ours_oid == base_oid && theirs_oid == base_oid {
                continue; // non-interacting (spec §4.3 edge case)
            }

            let case = classify::classify(&state(base_oid), &state(ours_oid), &state(theirs_oid));
            any_change = true;
            self.resolve_path(path, case, base_oid, ours_oid, theirs_oid, &mut edits, &mut conflicts)?;
        }

        if !any_change {
            return Ok(SyncResult::Nop);
        }

        let merged_tree = if edits.is_empty() {
            ours_tree_oid(self.repo.as_ref(), local)?
        } else {
            let base_for_edits = ours_tree_oid(self.repo.as_ref(), local)?;
            self.repo.edit_tree(base_for_edits, &edits)?
        };

        let message = if conflicts.is_empty() {
            "merge".to_owned()
        } else {
            conflicts
                .iter()
                .map(Conflict::commit_message_fragment)
                .collect::<Vec<_>>()
                .join(", ")
        };

        let merge_commit = self
            .repo
            .create_commit(merged_tree, &[local, remote], &message, Some(&self.local_ref))?;

        self.push(merge_commit, remote)?;

        let local_changes = self.changed_files_for(&base_tree, &ours_tree)?;
        let remote_changes = self.changed_files_for(&base_tree, &theirs_tree)?;

        Ok(if conflicts.is_empty() {
            SyncResult::MergeAndPush {
                commits: vec![merge_commit],
                local_changes,
                remote_changes,
            }
        } else {
            SyncResult::ResolveConflictsAndPush {
                commits: vec![merge_commit],
                local_changes,
                remote_changes,
                conflicts,
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_path(
        &self,
        path: &str,
        case: MergeCase,
        base_oid: Option<GitOid>,
        ours_oid: Option<GitOid>,
        theirs_oid: Option<GitOid>,
        edits: &mut Vec<TreeEdit>,
        conflicts: &mut Vec<Conflict>,
    ) -> Result<(), AttemptError> {
        let base_value = base_oid.map(|oid| self.read_json(oid)).transpose()?;
        let ours_doc = ours_oid.map(|oid| self.fat_doc(path, oid)).transpose()?;
        let theirs_doc = theirs_oid.map(|oid| self.fat_doc(path, oid)).transpose()?;
        let ours_value = ours_oid.map(|oid| self.read_json(oid)).transpose()?;
        let theirs_value = theirs_oid.map(|oid| self.read_json(oid)).transpose()?;

        let strategy = crate::config::Strategy::from_tag(self.options.conflict_resolution_strategy);
        let resolution = resolve::resolve(
            case,
            &strategy,
            base_value.as_ref(),
            ours_doc.as_ref().zip(ours_value.as_ref()),
            theirs_doc.as_ref().zip(theirs_value.as_ref()),
        );

        let resolved_doc = match resolution.value {
            None => {
                edits.push(TreeEdit::Remove { path: path.to_owned() });
                None
            }
            Some(ResolvedValue::Existing(doc)) => {
                edits.push(TreeEdit::Upsert {
                    path: path.to_owned(),
                    mode: EntryMode::Blob,
                    oid: doc.oid,
                });
                Some(doc)
            }
            Some(ResolvedValue::Merged(value)) => {
                let bytes = crate::model::serialize::canonical_bytes(&value);
                let oid = self.repo.write_blob(&bytes)?;
                edits.push(TreeEdit::Upsert {
                    path: path.to_owned(),
                    mode: EntryMode::Blob,
                    oid,
                });
                Some(self.fat_doc(path, oid)?)
            }
        };

        if let Some(strategy_used) = resolution.strategy_used {
            let fat_doc = resolved_doc.unwrap_or_else(|| FatDoc::json(path, path, base_oid.unwrap_or(GitOid::ZERO)));
            conflicts.push(Conflict {
                fat_doc,
                strategy: strategy_used,
                operation: resolution.operation,
            });
        }
        Ok(())
    }

    fn fast_forward_local(&self, target: GitOid) -> Result<(), AttemptError> {
        let current = self.repo.rev_parse_opt(self.local_ref.as_str())?.unwrap_or(GitOid::ZERO);
        self.repo.atomic_ref_update(&[RefEdit {
            name: self.local_ref.clone(),
            new_oid: target,
            expected_old_oid: current,
        }])?;
        Ok(())
    }

    fn push(&self, commit: GitOid, expected_remote: GitOid) -> Result<(), AttemptError> {
        match self.repo.push_branch(
            &self.options.remote_url,
            self.local_ref.as_str(),
            &format!("refs/heads/{}", self.remote_branch),
            Some(expected_remote),
        ) {
            Ok(()) => Ok(()),
            Err(GitError::PushRejected { .. }) => Err(AttemptError::StalePush),
            Err(other) => Err(AttemptError::Db(other.into())),
        }
        .map(|()| {
            tracing::info!(commit = %commit, "pushed sync commit");
        })
    }

    fn tree_root(&self, commit: GitOid) -> Result<BTreeMap<String, GitOid>, AttemptError> {
        let info = self.repo.read_commit(commit)?;
        Ok(self.walk_tree(info.tree_oid, String::new())?)
    }

    fn walk_tree(&self, tree: GitOid, prefix: String) -> Result<BTreeMap<String, GitOid>, GitError> {
        let mut out = BTreeMap::new();
        for entry in self.repo.read_tree(tree)? {
            if prefix.is_empty() && entry.name == METADATA_DIR {
                continue;
            }
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            match entry.mode {
                EntryMode::Tree => out.extend(self.walk_tree(entry.oid, path)?),
                _ => {
                    out.insert(path, entry.oid);
                }
            }
        }
        Ok(out)
    }

    fn read_json(&self, oid: GitOid) -> Result<Value, AttemptError> {
        let bytes = self.repo.read_blob(oid)?;
        serde_json::from_slice(&bytes)
            .map_err(|err| AttemptError::Db(DbError::Json(err)))
    }

    fn fat_doc(&self, path: &str, oid: GitOid) -> Result<FatDoc, AttemptError> {
        let id = path.rsplit_once('.').map_or(path, |(stem, _)| stem).to_owned();
        Ok(FatDoc::json(id, path.to_owned(), oid))
    }

    fn changed_files(&self, before: GitOid, after: GitOid) -> Result<Vec<ChangedFile>, AttemptError> {
        let before_tree = if before == GitOid::EMPTY_TREE {
            BTreeMap::new()
        } else {
            self.tree_root(before)?
        };
        let after_tree = self.tree_root(after)?;
        self.changed_files_for(&before_tree, &after_tree)
    }

    fn changed_files_for(
        &self,
        before: &BTreeMap<String, GitOid>,
        after: &BTreeMap<String, GitOid>,
    ) -> Result<Vec<ChangedFile>, AttemptError> {
        let mut out = Vec::new();
        let mut paths: Vec<&String> = before.keys().chain(after.keys()).collect();
        paths.sort_unstable();
        paths.dedup();

        for path in paths {
            let old_oid = before.get(path).copied();
            let new_oid = after.get(path).copied();
            match (old_oid, new_oid) {
                (None, Some(new)) => out.push(ChangedFile::Insert {
                    new: self.fat_doc(path, new)?,
                }),
                (Some(old), None) => out.push(ChangedFile::Delete {
                    old: self.fat_doc(path, old)?,
                }),
                (Some(old), Some(new)) if old != new => out.push(ChangedFile::Update {
                    old: self.fat_doc(path, old)?,
                    new: self.fat_doc(path, new)?,
                }),
                _ => {}
            }
        }
        Ok(out)
    }
}

fn ours_tree_oid(repo: &dyn GitRepo, commit: GitOid) -> Result<GitOid, AttemptError> {
    Ok(repo.read_commit(commit)?.tree_oid)
}

fn state(oid: Option<GitOid>) -> PathState {
    match oid {
        Some(oid) => PathState::Present { oid },
        None => PathState::Absent,
    }
}

enum AttemptError {
    StalePush,
    Db(DbError),
}

impl From<GitError> for AttemptError {
    fn from(err: GitError) -> Self {
        Self::Db(err.into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_maps_option_to_path_state() {
        assert_eq!(state(None), PathState::Absent);
        let oid = "a".repeat(40).parse::<GitOid>().unwrap();
        assert_eq!(state(Some(oid)), PathState::Present { oid });
    }
}
