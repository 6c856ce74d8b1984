//! Delayed-task scheduler
//!
//! Generic "run an action after a delay" primitive with idempotent
//! cancellation. Each scheduled task gets a handle whose state machine is
//! `Pending -> {Fired | Cancelled}`, both terminal.
//!
//! Cancellation races resolve in favor of "already fired wins": the worker
//! transitions the handle to `Fired` under the state lock before running the
//! action, so a concurrent `cancel` observing a terminal state is a no-op.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, trace};
use uuid::Uuid;

/// Opaque identifier of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(Uuid);

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Fired,
    Cancelled,
}

struct TaskEntry {
    state: TaskState,
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// Schedules actions to run after a delay, decoupled from the caller
#[derive(Clone, Default)]
pub struct DelayedScheduler {
    tasks: Arc<Mutex<HashMap<Uuid, TaskEntry>>>,
}

impl DelayedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action` to run after `delay`; returns a handle immediately.
    ///
    /// The action runs asynchronously on a spawned task. Panics in the action
    /// are contained to that task.
    pub fn schedule<F, Fut>(&self, delay: Duration, action: F) -> TaskHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        self.tasks.lock().unwrap().insert(
            id,
            TaskEntry {
                state: TaskState::Pending,
                cancel_tx: Some(cancel_tx),
            },
        );

        let tasks = Arc::clone(&self.tasks);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    // Claim the fire under the lock: a cancel arriving after
                    // this point observes a terminal state and no-ops
                    let fire = {
                        let mut tasks = tasks.lock().unwrap();
                        match tasks.get_mut(&id) {
                            Some(entry) if entry.state == TaskState::Pending => {
                                entry.state = TaskState::Fired;
                                entry.cancel_tx = None;
                                true
                            }
                            _ => false,
                        }
                    };
                    if fire {
                        metrics::counter!("tally_tasks_fired_total").increment(1);
                        trace!(task = %id, "Scheduled task firing");
                        action().await;
                    }
                }
                _ = cancel_rx => {
                    // State already set to Cancelled by the canceller
                    trace!(task = %id, "Scheduled task cancelled before firing");
                }
            }
        });

        debug!(task = %id, delay_ms = delay.as_millis() as u64, "Scheduled delayed task");
        TaskHandle(id)
    }

    /// Prevent a not-yet-fired task from firing.
    ///
    /// Idempotent: cancelling an already-fired, already-cancelled or unknown
    /// handle is a no-op, never an error — the canceller cannot always know
    /// the current state of the handle at call time.
    pub fn cancel(&self, handle: TaskHandle) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(entry) = tasks.get_mut(&handle.0) {
            if entry.state == TaskState::Pending {
                entry.state = TaskState::Cancelled;
                if let Some(tx) = entry.cancel_tx.take() {
                    // Worker may already be gone; the state transition above
                    // is what prevents the fire
                    let _ = tx.send(());
                }
                metrics::counter!("tally_tasks_cancelled_total").increment(1);
                debug!(task = %handle, "Cancelled scheduled task");
            }
        }
    }

    /// Drop the bookkeeping entry for a terminal handle.
    ///
    /// Entries stay queryable after reaching `Fired`/`Cancelled` until the
    /// owner forgets them; long-lived owners must do so or the task map grows
    /// with every handle ever scheduled. A pending or unknown handle is a
    /// no-op; cancel first to discard a pending task.
    pub fn forget(&self, handle: TaskHandle) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(entry) = tasks.get(&handle.0) {
            if entry.state != TaskState::Pending {
                tasks.remove(&handle.0);
                trace!(task = %handle, "Dropped terminal task entry");
            }
        }
    }

    /// Current state of a handle, or None for an unknown one
    pub fn query(&self, handle: TaskHandle) -> Option<TaskState> {
        self.tasks
            .lock()
            .unwrap()
            .get(&handle.0)
            .map(|entry| entry.state)
    }

    /// Number of tasks currently pending
    pub fn pending_count(&self) -> usize {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.state == TaskState::Pending)
            .count()
    }

    /// Number of task entries currently tracked, terminal ones included
    pub fn tracked_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}
