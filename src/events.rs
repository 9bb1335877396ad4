//! Sync lifecycle events (spec §4.6, §6 "Events", §9 "Cyclic event wiring").
//!
//! Every event carries a [`TaskMeta`] record so subscribers can correlate a
//! task's `start` with its eventual `complete`/`error`/`canceled`. Delivery
//! is a `tokio::sync::broadcast` channel rather than a list of registered
//! callbacks, so subscribers hold only a receiver — never a strong reference
//! back into the database — which sidesteps the cyclic-ownership hazard spec
//! §9 calls out.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::broadcast;

use crate::error::DbError;
use crate::model::document::{ChangedFile, DuplicatedFile, SyncResult};
use crate::task_queue::{TaskId, TaskKind};

/// Capacity of the broadcast channel. A lagging subscriber that falls this
/// far behind sees [`broadcast::error::RecvError::Lagged`] and should
/// resubscribe; the sync engine itself never blocks on subscriber backlog.
const CHANNEL_CAPACITY: usize = 256;

/// Identifies which task produced an event (spec §6: `{taskId, timestamp, kind}`).
#[derive(Clone, Debug)]
pub struct TaskMeta {
    /// The task's unique identifier.
    pub task_id: TaskId,
    /// Wall-clock time the event was emitted.
    pub timestamp: SystemTime,
    /// The task's kind.
    pub kind: TaskKind,
}

/// A lifecycle event emitted by the task queue or sync engine (spec §6).
#[derive(Clone, Debug)]
pub enum Event {
    /// A task began running.
    Start(TaskMeta),
    /// A sync task produced its [`SyncResult`].
    Change(TaskMeta, SyncResult),
    /// Documents changed on the local side.
    LocalChange(TaskMeta, Vec<ChangedFile>),
    /// Documents changed on the remote side.
    RemoteChange(TaskMeta, Vec<ChangedFile>),
    /// Unrelated-histories combination produced duplicate paths.
    Combine(TaskMeta, Vec<DuplicatedFile>),
    /// A task completed successfully.
    Complete(TaskMeta),
    /// A task failed. `DbError` doesn't implement `Clone`, so it's shared.
    Error(TaskMeta, Arc<DbError>),
    /// A task was canceled before or during its run.
    Canceled(TaskMeta),
    /// The live scheduler paused.
    Paused(TaskMeta),
    /// The live scheduler resumed.
    Active(TaskMeta),
}

/// A fan-out publisher for [`Event`]s (spec §6).
///
/// Cheap to clone: every clone shares the same underlying channel, so the
/// database handle, the task queue, and the sync engine can each hold one
/// without coordinating ownership.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with no subscribers yet.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to future events. Events emitted before this call are not
    /// replayed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. A send with no subscribers is not an error — the
    /// sync engine runs the same whether or not anyone is listening.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
