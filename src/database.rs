//! Public database handle (spec §3 "Lifecycle", §4.6–§4.9).
//!
//! [`Database`] is the façade callers open, mutate, sync, and close. It owns
//! the [`TaskQueue`] every mutating operation is serialized through
//! (invariant 1, spec §3: "exactly one write transaction executes at a time
//! per database"), the [`EventBus`] lifecycle events are published on, and —
//! once [`Database::attach_sync`] is called — the [`SyncEngine`] and, if
//! `live`, the [`LiveScheduler`] driving it on a timer.
//!
//! A task's body only ever reports `Result<(), DbError>` to the queue (spec
//! §4.6 treats task outcomes as pass/fail); a typed return value like
//! [`PutResult`] or [`SyncResult`] is threaded back out through a oneshot
//! channel the closure captures, separate from the queue's own completion
//! signal.

use std::sync::{Arc, OnceLock};

use tokio::sync::oneshot;

use gitdocdb_git::{EntryMode, GitOid, GitRepo, RefName, TreeEdit};

use crate::config::{OpenOptions, SyncOptions};
use crate::error::DbError;
use crate::events::{Event, EventBus};
use crate::model::document::{CommitDescriptor, DeleteResult, PutResult, SyncResult};
use crate::model::serialize;
use crate::scheduler::LiveScheduler;
use crate::sync_engine::SyncEngine;
use crate::task_queue::{TaskKind, TaskOutcome, TaskQueue};

const DEFAULT_BRANCH: &str = "main";

/// The author/committer identity recorded on every commit this crate writes.
/// Spec §3's `CommitDescriptor` treats author/committer as opaque strings;
/// a real deployment would plumb a configured identity through `OpenOptions`,
/// but that knob isn't part of the closed configuration set in spec §6.
const COMMITTER_NAME: &str = "gitdocdb";

/// An open database (spec §3 "Lifecycle").
pub struct Database {
    repo: Arc<dyn GitRepo>,
    options: OpenOptions,
    local_ref: RefName,
    queue: TaskQueue,
    events: EventBus,
    sync_engine: OnceLock<Arc<SyncEngine>>,
    scheduler: OnceLock<LiveScheduler>,
}

impl Database {
    /// Open a database backed by `repo`, creating the initial identity
    /// commit if the local branch doesn't exist yet.
    ///
    /// # Errors
    /// Returns an `OpenOptions` validation error, or propagates repository
    /// errors as [`DbError::Git`].
    pub fn open(repo: Arc<dyn GitRepo>, options: OpenOptions) -> Result<Self, DbError> {
        options.validate()?;
        let local_ref = RefName::new(&format!("refs/heads/{DEFAULT_BRANCH}"))
            .map_err(|err| DbError::InvalidRepositoryURL { detail: err.to_string() })?;

        if repo.read_ref(&local_ref)?.is_none() {
            let identity = format!(r#"{{"db_name":{:?},"schema_version":{}}}"#, options.db_name, options.schema_version);
            let blob = repo.write_blob(identity.as_bytes())?;
            let tree = repo.edit_tree(
                GitOid::EMPTY_TREE,
                &[TreeEdit::Upsert {
                    path: ".gitddb/identity".to_owned(),
                    mode: EntryMode::Blob,
                    oid: blob,
                }],
            )?;
            repo.create_commit(tree, &[], "open database", Some(&local_ref))?;
        }

        let events = EventBus::new();
        Ok(Self {
            repo,
            options,
            local_ref,
            queue: TaskQueue::new(events.clone()),
            events,
            sync_engine: OnceLock::new(),
            scheduler: OnceLock::new(),
        })
    }

    /// Subscribe to lifecycle events (spec §6 "Events").
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Read-only task statistics.
    #[must_use]
    pub fn stats(&self) -> &crate::task_queue::Stats {
        self.queue.stats()
    }

    /// Attach a sync binding, validating `options` and starting a
    /// [`LiveScheduler`] if `options.live` is set. May be called at most once
    /// per database.
    ///
    /// # Errors
    /// Returns [`DbError::UndefinedSync`] if a sync binding is already
    /// attached, or any [`SyncOptions::validate`] error.
    pub fn attach_sync(&self, options: SyncOptions) -> Result<(), DbError> {
        options.validate()?;
        let live = options.live;
        let interval_ms = options.interval_ms;
        let retry_interval_ms = options.retry_interval_ms;

        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&self.repo),
            options,
            self.local_ref.clone(),
            DEFAULT_BRANCH.to_owned(),
            self.events.clone(),
        ));
        self.sync_engine.set(Arc::clone(&engine)).map_err(|_| DbError::UndefinedSync)?;

        if live {
            // `validate()` guarantees `interval_ms` is `Some` whenever `live`
            // is set (spec §4.7).
            let interval_ms = interval_ms.unwrap_or(crate::config::MINIMUM_INTERVAL_MS);
            let scheduler = LiveScheduler::start(
                TaskQueue::new(self.events.clone()),
                engine,
                interval_ms,
                retry_interval_ms,
                self.events.clone(),
            );
            let _ = self.scheduler.set(scheduler);
        }
        Ok(())
    }

    /// Insert or update a single document (spec §3, §4.1).
    ///
    /// Serializes `value` canonically, writes it as a blob at
    /// `<id><extension>`, and commits with a single parent (the prior
    /// `HEAD`).
    ///
    /// # Errors
    /// Returns [`DbError::UndefinedDocumentId`] if `id` is empty,
    /// [`DbError::InvalidIdCharacter`] if `id` contains a character outside
    /// alphanumerics, `-`, and `_`, [`DbError::InvalidJsonObject`] if `value`
    /// does not serialize to a JSON object, and propagates repository errors
    /// as [`DbError::Git`].
    pub async fn put(&self, id: impl Into<String>, value: serde_json::Value) -> Result<PutResult, DbError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DbError::UndefinedDocumentId);
        }
        validate_id(&id)?;
        if !value.is_object() {
            return Err(DbError::InvalidJsonObject { id: Some(id) });
        }
        let storage_name = format!("{id}{}", self.options.serialize.extension());

        let repo = Arc::clone(&self.repo);
        let local_ref = self.local_ref.clone();
        let (result_tx, result_rx) = oneshot::channel();
        let task_storage_name = storage_name.clone();
        let outcome = self
            .queue
            .enqueue_and_wait(TaskKind::Put, move |_cancel, _task_id| {
                Box::pin(async move {
                    let outcome = put_document(repo.as_ref(), &local_ref, &task_storage_name, &value);
                    let result = outcome.as_ref().map(|(_, commit_oid, descriptor)| (*commit_oid, descriptor.clone()));
                    let _ = result_tx.send(result.map_err(|err: DbError| err.to_string()));
                    outcome.map(|_| ())
                })
            })
            .await?;
        task_result(outcome)?;

        let oid = current_entry_oid(self.repo.as_ref(), &self.local_ref, &storage_name)?;
        let (commit_oid, commit) = result_rx
            .await
            .map_err(|_| DbError::CannotGetEntry { path: storage_name.clone() })?
            .map_err(|detail| DbError::InvalidConflictState { detail })?;

        Ok(PutResult {
            id,
            storage_name,
            oid,
            commit_oid,
            commit,
        })
    }

    /// Remove a single document (spec §3, §4.1).
    ///
    /// # Errors
    /// Returns [`DbError::UndefinedDocumentId`] if `id` is empty,
    /// [`DbError::InvalidIdCharacter`] if `id` contains a character outside
    /// alphanumerics, `-`, and `_`, [`DbError::CannotGetEntry`] if no such
    /// document exists, and propagates repository errors as [`DbError::Git`].
    pub async fn delete(&self, id: impl Into<String>) -> Result<DeleteResult, DbError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DbError::UndefinedDocumentId);
        }
        validate_id(&id)?;
        let storage_name = format!("{id}{}", self.options.serialize.extension());
        let existing_oid = current_entry_oid(self.repo.as_ref(), &self.local_ref, &storage_name)?;

        let repo = Arc::clone(&self.repo);
        let local_ref = self.local_ref.clone();
        let (result_tx, result_rx) = oneshot::channel();
        let task_storage_name = storage_name.clone();
        let outcome = self
            .queue
            .enqueue_and_wait(TaskKind::Delete, move |_cancel, _task_id| {
                Box::pin(async move {
                    let outcome = delete_document(repo.as_ref(), &local_ref, &task_storage_name);
                    let result = outcome.as_ref().map(|(commit_oid, descriptor)| (*commit_oid, descriptor.clone()));
                    let _ = result_tx.send(result.map_err(|err: DbError| err.to_string()));
                    outcome.map(|_| ())
                })
            })
            .await?;
        task_result(outcome)?;

        let (commit_oid, commit) = result_rx
            .await
            .map_err(|_| DbError::CannotGetEntry { path: storage_name.clone() })?
            .map_err(|detail| DbError::InvalidConflictState { detail })?;

        Ok(DeleteResult {
            id,
            storage_name,
            oid: existing_oid,
            commit_oid,
            commit,
        })
    }

    /// Run a sync attempt against the attached remote (spec §4.7).
    ///
    /// # Errors
    /// Returns [`DbError::UndefinedSync`] if [`Database::attach_sync`] has
    /// not been called, and propagates [`SyncEngine::run`] errors.
    pub async fn sync(&self) -> Result<SyncResult, DbError> {
        let engine = Arc::clone(self.sync_engine.get().ok_or(DbError::UndefinedSync)?);
        let (result_tx, result_rx) = oneshot::channel();
        let outcome = self
            .queue
            .enqueue_and_wait(TaskKind::Sync, move |cancel, task_id| {
                Box::pin(async move {
                    let result = engine.run(&cancel, task_id).await;
                    let _ = result_tx.send(result.as_ref().map(Clone::clone).map_err(ToString::to_string));
                    result.map(|_| ())
                })
            })
            .await?;

        match outcome {
            TaskOutcome::Canceled => Ok(SyncResult::Canceled),
            TaskOutcome::Completed(Ok(())) => result_rx
                .await
                .map_err(|_| DbError::InvalidConflictState { detail: "sync task dropped its result".to_owned() })?
                .map_err(|detail| DbError::InvalidConflictState { detail }),
            TaskOutcome::Completed(Err(err)) => Err(err),
        }
    }

    /// Close the database. Cancels pending tasks and permanently stops the
    /// live scheduler, if any; the currently running task is left to finish.
    pub async fn close(&self) {
        self.queue.close().await;
        if let Some(scheduler) = self.scheduler.get() {
            scheduler.cancel().await;
        }
    }
}

/// Allowed document id characters: alphanumerics, `-`, `_` (spec §7
/// `InvalidIdCharacter`). Matches the character class named in
/// [`DbError::InvalidIdCharacter`]'s message.
fn validate_id(id: &str) -> Result<(), DbError> {
    if id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(())
    } else {
        Err(DbError::InvalidIdCharacter { id: id.to_owned() })
    }
}

fn put_document(
    repo: &dyn GitRepo,
    local_ref: &RefName,
    storage_name: &str,
    value: &serde_json::Value,
) -> Result<(GitOid, GitOid, CommitDescriptor), DbError> {
    let bytes = serialize::canonical_bytes(value);
    let blob = repo.write_blob(&bytes)?;
    let current = repo.rev_parse_opt(local_ref.as_str())?;
    let base_tree = match current {
        Some(oid) => repo.read_commit(oid)?.tree_oid,
        None => GitOid::EMPTY_TREE,
    };
    let tree = repo.edit_tree(
        base_tree,
        &[TreeEdit::Upsert {
            path: storage_name.to_owned(),
            mode: EntryMode::Blob,
            oid: blob,
        }],
    )?;
    let parents = current.map_or_else(Vec::new, |oid| vec![oid]);
    let message = format!("put {storage_name}");
    let commit = repo.create_commit(tree, &parents, &message, Some(local_ref))?;
    let info = repo.read_commit(commit)?;
    Ok((
        blob,
        commit,
        CommitDescriptor {
            author: COMMITTER_NAME.to_owned(),
            committer: COMMITTER_NAME.to_owned(),
            timestamp: info.time,
            message: info.message,
        },
    ))
}

fn delete_document(repo: &dyn GitRepo, local_ref: &RefName, storage_name: &str) -> Result<(GitOid, CommitDescriptor), DbError> {
    let current = repo.rev_parse(local_ref.as_str())?;
    let base_tree = repo.read_commit(current)?.tree_oid;
    let tree = repo.edit_tree(base_tree, &[TreeEdit::Remove { path: storage_name.to_owned() }])?;
    let message = format!("delete {storage_name}");
    let commit = repo.create_commit(tree, &[current], &message, Some(local_ref))?;
    let info = repo.read_commit(commit)?;
    Ok((
        commit,
        CommitDescriptor {
            author: COMMITTER_NAME.to_owned(),
            committer: COMMITTER_NAME.to_owned(),
            timestamp: info.time,
            message: info.message,
        },
    ))
}

fn current_entry_oid(repo: &dyn GitRepo, local_ref: &RefName, storage_name: &str) -> Result<GitOid, DbError> {
    let commit_oid = repo.rev_parse(local_ref.as_str())?;
    let info = repo.read_commit(commit_oid)?;
    repo.read_tree(info.tree_oid)?
        .into_iter()
        .find(|entry| entry.name == storage_name)
        .map(|entry| entry.oid)
        .ok_or_else(|| DbError::CannotGetEntry {
            path: storage_name.to_owned(),
        })
}

fn task_result(outcome: TaskOutcome) -> Result<(), DbError> {
    match outcome {
        TaskOutcome::Completed(result) => result,
        TaskOutcome::Canceled => Err(DbError::DatabaseClosing),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
