//! Live scheduler (spec §4.9).
//!
//! Owns a periodic timer scoped to one sync binding. `stopped → running ⇄
//! paused`: [`LiveScheduler::start`] creates a running scheduler directly
//! (there is no idle "stopped-but-constructed" state — a database only
//! builds one of these when `SyncOptions.live` is true), [`pause`](LiveScheduler::pause)
//! and [`resume`](LiveScheduler::resume) toggle between running and paused,
//! and [`cancel`](LiveScheduler::cancel) is the one-way transition to
//! stopped. Each firing enqueues a single `sync` task through the task
//! queue, whose own coalescing rule (spec §4.6) is what "if one is already
//! pending, the firing is coalesced" rides on — the scheduler itself does
//! not track in-flight sync tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::MINIMUM_INTERVAL_MS;
use crate::error::DbError;
use crate::events::{Event, EventBus, TaskMeta};
use crate::sync_engine::SyncEngine;
use crate::task_queue::{TaskKind, TaskQueue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Running,
    Paused,
    Stopped,
}

struct Shared {
    state: Mutex<State>,
    interval_ms: Mutex<u64>,
    retry_interval_ms: u64,
    queue: TaskQueue,
    sync_engine: Arc<SyncEngine>,
    events: EventBus,
}

/// `paused`/`active` carry the same `{taskId, timestamp, kind}` envelope as
/// every other event (spec §6), but aren't produced by any one task; `kind`
/// is `Internal` and `task_id` is a sentinel with no corresponding task.
fn scheduler_meta() -> TaskMeta {
    TaskMeta {
        task_id: 0,
        timestamp: std::time::SystemTime::now(),
        kind: TaskKind::Internal,
    }
}

/// A running live-sync timer for one sync binding (spec §4.9).
pub struct LiveScheduler {
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

impl LiveScheduler {
    /// Start a live scheduler, firing every `interval_ms` milliseconds.
    ///
    /// The caller is expected to have already validated `interval_ms` via
    /// [`crate::config::SyncOptions::validate`].
    #[must_use]
    pub fn start(queue: TaskQueue, sync_engine: Arc<SyncEngine>, interval_ms: u64, retry_interval_ms: u64, events: EventBus) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Running),
            interval_ms: Mutex::new(interval_ms),
            retry_interval_ms,
            queue,
            sync_engine,
            events,
        });
        let handle = tokio::spawn(run(Arc::clone(&shared)));
        Self { shared, handle }
    }

    /// Stop future firings. Returns `true` if this call transitioned the
    /// scheduler from running to paused, `false` if it was already paused or
    /// stopped.
    pub async fn pause(&self) -> bool {
        let mut state = self.shared.state.lock().await;
        if *state == State::Running {
            *state = State::Paused;
            self.shared.events.emit(Event::Paused(scheduler_meta()));
            true
        } else {
            false
        }
    }

    /// Re-arm a paused (or already-running) scheduler. If `interval_ms` is
    /// `Some`, it must exceed both [`MINIMUM_INTERVAL_MS`] and the binding's
    /// `retryInterval`; otherwise the current interval is kept.
    ///
    /// Returns `true` if this call transitioned the scheduler from paused to
    /// running, `false` if it was already running. Does nothing (and returns
    /// `false`) if the scheduler has been [`cancel`](Self::cancel)ed.
    ///
    /// # Errors
    /// Returns [`DbError::IntervalTooSmall`] or
    /// [`DbError::SyncIntervalLessThanOrEqualToRetryInterval`] if the
    /// requested interval is invalid; the scheduler's state is unchanged in
    /// that case.
    pub async fn resume(&self, interval_ms: Option<u64>) -> Result<bool, DbError> {
        if let Some(ms) = interval_ms {
            if ms < MINIMUM_INTERVAL_MS {
                return Err(DbError::IntervalTooSmall {
                    interval_ms: ms,
                    minimum_ms: MINIMUM_INTERVAL_MS,
                });
            }
            if ms <= self.shared.retry_interval_ms {
                return Err(DbError::SyncIntervalLessThanOrEqualToRetryInterval {
                    interval_ms: ms,
                    retry_interval_ms: self.shared.retry_interval_ms,
                });
            }
            *self.shared.interval_ms.lock().await = ms;
        }

        let mut state = self.shared.state.lock().await;
        let transitioned = *state == State::Paused;
        if *state != State::Stopped {
            *state = State::Running;
        }
        if transitioned {
            self.shared.events.emit(Event::Active(scheduler_meta()));
        }
        Ok(transitioned)
    }

    /// Permanently stop this binding's scheduler. Idempotent.
    pub async fn cancel(&self) {
        *self.shared.state.lock().await = State::Stopped;
    }
}

impl Drop for LiveScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(shared: Arc<Shared>) {
    loop {
        let interval_ms = *shared.interval_ms.lock().await;
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;

        let state = *shared.state.lock().await;
        match state {
            State::Stopped => return,
            State::Paused => continue,
            State::Running => fire(&shared).await,
        }
    }
}

async fn fire(shared: &Shared) {
    let sync_engine = Arc::clone(&shared.sync_engine);
    let enqueued = shared
        .queue
        .enqueue(TaskKind::Sync, move |cancel, task_id| {
            Box::pin(async move { sync_engine.run(&cancel, task_id).await.map(|_| ()) })
        })
        .await;
    if let Err(err) = enqueued {
        tracing::warn!(error = %err, "live scheduler could not enqueue sync task");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
