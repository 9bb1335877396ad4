//! Single-writer serial task executor (spec §4.6).
//!
//! One [`TaskQueue`] is bound to one database instance. Tasks run strictly in
//! enqueue order, except that consecutive `sync`/`push` requests coalesce: at
//! most one of each kind may sit pending behind the running task, and any
//! further duplicate is resolved `canceled` immediately (spec §4.6, §5).
//!
//! The queue itself doesn't know what a task *does* — callers hand it a
//! boxed future constructor that receives a [`CancelToken`] to poll at its
//! own suspension points (spec: "cancellation is cooperative ... polls a
//! cancel flag at each suspension point").

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, oneshot};

use crate::error::DbError;
use crate::events::{Event, EventBus, TaskMeta};

/// Unique identifier for a task, monotonically increasing within a queue.
pub type TaskId = u64;

/// The kind of work a task performs (spec §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Insert or update a single document.
    Put,
    /// Remove a single document.
    Delete,
    /// Push local commits to the remote.
    Push,
    /// Full fetch/merge/push cycle.
    Sync,
    /// Housekeeping work not directly requested by a caller.
    Internal,
}

impl TaskKind {
    /// Whether tasks of this kind coalesce when one is already pending
    /// (spec §4.6: only `sync` and `push` do).
    const fn coalesces(self) -> bool {
        matches!(self, Self::Push | Self::Sync)
    }
}

/// A cooperative cancellation flag, cloned into the closure a task runs.
#[derive(Clone, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// `true` once [`TaskQueue::close`] or a coalescing cancellation has
    /// fired. Callers check this at every suspension point.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a single task's run.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The task ran to completion.
    Completed(Result<(), DbError>),
    /// The task was canceled before it started, or observed cancellation at
    /// a suspension point before producing any commit.
    Canceled,
}

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), DbError>> + Send>>;
type TaskFn = Box<dyn FnOnce(CancelToken, TaskId) -> TaskFuture + Send>;

struct Queued {
    id: TaskId,
    kind: TaskKind,
    cancel: CancelToken,
    run: TaskFn,
    result_tx: oneshot::Sender<TaskOutcome>,
}

enum Command {
    Enqueue(Queued),
    Close,
}

/// Read-only view of accumulated task statistics (spec §4.6: "statistics are
/// accumulated ... visible through a read-only view").
#[derive(Debug, Default)]
pub struct Stats {
    put: AtomicU64,
    delete: AtomicU64,
    push: AtomicU64,
    sync: AtomicU64,
    internal: AtomicU64,
    canceled: AtomicU64,
}

impl Stats {
    fn record_kind(&self, kind: TaskKind) {
        let counter = match kind {
            TaskKind::Put => &self.put,
            TaskKind::Delete => &self.delete,
            TaskKind::Push => &self.push,
            TaskKind::Sync => &self.sync,
            TaskKind::Internal => &self.internal,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_canceled(&self) {
        self.canceled.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of tasks of `kind` that have run (successfully or not).
    #[must_use]
    pub fn count(&self, kind: TaskKind) -> u64 {
        match kind {
            TaskKind::Put => self.put.load(Ordering::Relaxed),
            TaskKind::Delete => self.delete.load(Ordering::Relaxed),
            TaskKind::Push => self.push.load(Ordering::Relaxed),
            TaskKind::Sync => self.sync.load(Ordering::Relaxed),
            TaskKind::Internal => self.internal.load(Ordering::Relaxed),
        }
    }

    /// Number of tasks resolved `canceled`, whether by coalescing or close.
    #[must_use]
    pub fn cancel_count(&self) -> u64 {
        self.canceled.load(Ordering::Relaxed)
    }
}

/// The serial task executor bound to one database (spec §4.6).
pub struct TaskQueue {
    commands: mpsc::UnboundedSender<Command>,
    stats: Arc<Stats>,
    next_id: Arc<AtomicU64>,
    closing: Arc<AtomicBool>,
}

impl TaskQueue {
    /// Start a new queue, spawning its background executor task.
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Stats::default());
        tokio::spawn(run(rx, Arc::clone(&stats), events));
        Self {
            commands: tx,
            stats,
            next_id: Arc::new(AtomicU64::new(1)),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Read-only statistics view.
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Enqueue a task. `run` receives a [`CancelToken`] once the task starts
    /// running and must check it at every suspension point.
    ///
    /// # Errors
    /// Returns [`DbError::DatabaseClosing`] if [`TaskQueue::close`] has
    /// already been called.
    pub async fn enqueue<F>(&self, kind: TaskKind, run: F) -> Result<TaskId, DbError>
    where
        F: FnOnce(CancelToken, TaskId) -> TaskFuture + Send + 'static,
    {
        if self.closing.load(Ordering::SeqCst) {
            return Err(DbError::DatabaseClosing);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (result_tx, _result_rx) = oneshot::channel();
        let queued = Queued {
            id,
            kind,
            cancel: CancelToken::new(),
            run: Box::new(run),
            result_tx,
        };
        self.commands
            .send(Command::Enqueue(queued))
            .map_err(|_| DbError::DatabaseClosing)?;
        Ok(id)
    }

    /// Like [`enqueue`](Self::enqueue) but awaits and returns the task's
    /// outcome.
    ///
    /// # Errors
    /// See [`enqueue`](Self::enqueue).
    pub async fn enqueue_and_wait<F>(&self, kind: TaskKind, run: F) -> Result<TaskOutcome, DbError>
    where
        F: FnOnce(CancelToken, TaskId) -> TaskFuture + Send + 'static,
    {
        if self.closing.load(Ordering::SeqCst) {
            return Err(DbError::DatabaseClosing);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (result_tx, result_rx) = oneshot::channel();
        let queued = Queued {
            id,
            kind,
            cancel: CancelToken::new(),
            run: Box::new(run),
            result_tx,
        };
        self.commands
            .send(Command::Enqueue(queued))
            .map_err(|_| DbError::DatabaseClosing)?;
        result_rx.await.map_err(|_| DbError::DatabaseClosing)
    }

    /// Cancel every pending (not yet started) task and refuse further
    /// enqueues. The currently running task, if any, is left to finish
    /// cooperatively observing the closing signal at its own pace.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Close);
    }
}

async fn run(mut commands: mpsc::UnboundedReceiver<Command>, stats: Arc<Stats>, events: EventBus) {
    let mut pending: VecDeque<Queued> = VecDeque::new();
    let mut closing = false;

    loop {
        if pending.is_empty() && !closing {
            match commands.recv().await {
                Some(Command::Enqueue(task)) => enqueue(&mut pending, &stats, &events, task),
                Some(Command::Close) => closing = true,
                None => return,
            }
            continue;
        }

        while let Ok(command) = commands.try_recv() {
            match command {
                Command::Enqueue(task) if !closing => enqueue(&mut pending, &stats, &events, task),
                Command::Enqueue(task) => resolve_canceled(task, &stats, &events),
                Command::Close => {
                    closing = true;
                    for task in pending.drain(..) {
                        resolve_canceled(task, &stats, &events);
                    }
                }
            }
        }

        let Some(task) = pending.pop_front() else {
            if closing {
                return;
            }
            continue;
        };
        run_task(task, &stats, &events).await;
    }
}

fn enqueue(pending: &mut VecDeque<Queued>, stats: &Arc<Stats>, events: &EventBus, task: Queued) {
    if task.kind.coalesces() && pending.iter().any(|queued| queued.kind == task.kind) {
        resolve_canceled(task, stats, events);
        return;
    }
    pending.push_back(task);
}

fn resolve_canceled(task: Queued, stats: &Arc<Stats>, events: &EventBus) {
    stats.record_canceled();
    events.emit(Event::Canceled(task_meta(&task)));
    let _ = task.result_tx.send(TaskOutcome::Canceled);
}

async fn run_task(task: Queued, stats: &Arc<Stats>, events: &EventBus) {
    let meta = task_meta(&task);
    stats.record_kind(task.kind);
    events.emit(Event::Start(meta.clone()));

    let future = (task.run)(task.cancel.clone(), task.id);
    let result = future.await;

    let outcome = if task.cancel.is_canceled() && result.is_err() {
        events.emit(Event::Canceled(meta));
        TaskOutcome::Canceled
    } else {
        match &result {
            Ok(()) => events.emit(Event::Complete(meta)),
            Err(err) => events.emit(Event::Error(meta, Arc::new(clone_error_message(err)))),
        }
        TaskOutcome::Completed(result)
    };
    let _ = task.result_tx.send(outcome);
}

fn task_meta(task: &Queued) -> TaskMeta {
    TaskMeta {
        task_id: task.id,
        timestamp: SystemTime::now(),
        kind: task.kind,
    }
}

// `DbError` isn't `Clone` (it wraps foreign error types); events need an
// owned, shareable copy, so render it down to its display form.
fn clone_error_message(err: &DbError) -> DbError {
    DbError::InvalidConflictState {
        detail: err.to_string(),
    }
}

impl Queued {
    #[cfg(test)]
    fn test_stub(id: TaskId, kind: TaskKind) -> (Self, oneshot::Receiver<TaskOutcome>) {
        let (result_tx, result_rx) = oneshot::channel();
        (
            Self {
                id,
                kind,
                cancel: CancelToken::new(),
                run: Box::new(|_cancel, _id| Box::pin(async { Ok(()) })),
                result_tx,
            },
            result_rx,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_and_push_coalesce_but_put_does_not() {
        assert!(TaskKind::Sync.coalesces());
        assert!(TaskKind::Push.coalesces());
        assert!(!TaskKind::Put.coalesces());
        assert!(!TaskKind::Delete.coalesces());
        assert!(!TaskKind::Internal.coalesces());
    }

    #[test]
    fn enqueue_coalescing_cancels_second_pending_sync() {
        let stats = Arc::new(Stats::default());
        let events = EventBus::new();
        let mut pending = VecDeque::new();

        let (first, _first_rx) = Queued::test_stub(1, TaskKind::Sync);
        enqueue(&mut pending, &stats, &events, first);
        assert_eq!(pending.len(), 1);

        let (second, second_rx) = Queued::test_stub(2, TaskKind::Sync);
        enqueue(&mut pending, &stats, &events, second);
        // second coalesces away: still only one pending, and it was canceled.
        assert_eq!(pending.len(), 1);
        assert_eq!(stats.cancel_count(), 1);
        assert!(matches!(
            second_rx.try_recv(),
            Ok(TaskOutcome::Canceled)
        ));
    }

    #[test]
    fn put_tasks_never_coalesce() {
        let stats = Arc::new(Stats::default());
        let events = EventBus::new();
        let mut pending = VecDeque::new();

        let (first, _rx1) = Queued::test_stub(1, TaskKind::Put);
        let (second, _rx2) = Queued::test_stub(2, TaskKind::Put);
        enqueue(&mut pending, &stats, &events, first);
        enqueue(&mut pending, &stats, &events, second);
        assert_eq!(pending.len(), 2);
        assert_eq!(stats.cancel_count(), 0);
    }

    #[tokio::test]
    async fn enqueue_after_close_is_rejected() {
        let queue = TaskQueue::new(EventBus::new());
        queue.close().await;
        // give the background actor a chance to observe the close command.
        tokio::task::yield_now().await;
        let result = queue.enqueue(TaskKind::Put, |_cancel, _id| Box::pin(async { Ok(()) })).await;
        assert!(matches!(result, Err(DbError::DatabaseClosing)));
    }

    #[tokio::test]
    async fn a_task_runs_and_completes() {
        let queue = TaskQueue::new(EventBus::new());
        let outcome = queue
            .enqueue_and_wait(TaskKind::Put, |_cancel, _id| Box::pin(async { Ok(()) }))
            .await
            .unwrap();
        assert!(matches!(outcome, TaskOutcome::Completed(Ok(()))));
        assert_eq!(queue.stats().count(TaskKind::Put), 1);
    }

    #[tokio::test]
    async fn ten_consecutive_syncs_coalesce_to_few_completions() {
        // Scenario D (spec §8): at least one completes, at least six cancel.
        let queue = Arc::new(TaskQueue::new(EventBus::new()));
        let mut joins = Vec::new();
        for _ in 0..10 {
            let queue = Arc::clone(&queue);
            joins.push(tokio::spawn(async move {
                queue
                    .enqueue_and_wait(TaskKind::Sync, |_cancel, _id| Box::pin(async { Ok(()) }))
                    .await
            }));
        }
        let mut completed = 0_u64;
        let mut canceled = 0_u64;
        for join in joins {
            match join.await.unwrap().unwrap() {
                TaskOutcome::Completed(_) => completed += 1,
                TaskOutcome::Canceled => canceled += 1,
            }
        }
        assert!(completed >= 1);
        assert!(canceled >= 6);
        assert_eq!(queue.stats().cancel_count(), canceled);
    }
}
