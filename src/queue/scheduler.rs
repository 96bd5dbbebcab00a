//! Rate-limited scheduler.
//!
//! Owns the slot budget, the ordered buffer and the set of release timers.
//! Executing a task takes one slot; a timer armed at the same moment returns
//! it after the window and drains whatever is still buffered.
//!
//! ```text
//!   submit ──► buffer ──► execute_ready ──► task() ──► handle settled
//!                ▲             │
//!                │             └─► arm timer ──(window)──► release_slot
//!                └──────────────────────────────────────────────┘
//! ```
//!
//! All state lives behind one mutex. Task bodies run outside it, but only one
//! thread at a time holds the drainer role, so tasks of one queue never run
//! concurrently and leave the buffer strictly in submission order.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::buffer::TaskBuffer;
use super::handle::{completion_pair, Completer, CompletionHandle};
use crate::types::{Error, QueueConfig, QueueId, Result, TaskError, TaskId};

/// Counters describing everything the queue has done since construction.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks accepted into the buffer.
    pub submitted: u64,
    /// Tasks that ran and returned a value.
    pub succeeded: u64,
    /// Tasks that ran and returned an error.
    pub failed: u64,
    /// Tasks that ran and panicked.
    pub panicked: u64,
    /// Buffered tasks rejected by `close()`.
    pub cancelled: u64,
    /// Submissions refused because the queue was already closed.
    pub rejected_closed: u64,
    /// Largest buffer length observed.
    pub peak_pending: usize,
}

impl QueueStats {
    /// Tasks that were invoked, whatever their outcome.
    pub fn executed(&self) -> u64 {
        self.succeeded + self.failed + self.panicked
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Panicked => self.panicked += 1,
            Outcome::Cancelled => self.cancelled += 1,
            Outcome::Deferred => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
    Panicked,
    Cancelled,
    /// Invoked; the outcome is recorded when its future completes.
    Deferred,
}

impl<T, E> From<&std::thread::Result<std::result::Result<T, E>>> for Outcome {
    fn from(result: &std::thread::Result<std::result::Result<T, E>>) -> Self {
        match result {
            Ok(Ok(_)) => Outcome::Succeeded,
            Ok(Err(_)) => Outcome::Failed,
            Err(_) => Outcome::Panicked,
        }
    }
}

enum Dispatch {
    Run(Arc<Shared>),
    Cancel,
}

type Job = Box<dyn FnOnce(Dispatch) -> Outcome + Send>;

/// A buffered task with its completer, type-erased so one buffer holds
/// tasks of any result type.
struct PendingTask {
    id: TaskId,
    job: Job,
}

impl PendingTask {
    fn new<F, T, E>(id: TaskId, task: F, completer: Completer<T, E>) -> Self
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let job: Job = Box::new(move |dispatch| match dispatch {
            Dispatch::Cancel => {
                completer.settle(Err(TaskError::Cancelled));
                Outcome::Cancelled
            }
            Dispatch::Run(_) => {
                let result = panic::catch_unwind(AssertUnwindSafe(task));
                let outcome = Outcome::from(&result);
                completer.settle(task_result(result));
                outcome
            }
        });
        Self { id, job }
    }

    /// The closure is invoked when the slot is taken; the future it returns
    /// runs on the queue's runtime and settles the handle when it completes.
    fn new_async<F, Fut, T, E>(id: TaskId, task: F, completer: Completer<T, E>) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let task_id = id.clone();
        let job: Job = Box::new(move |dispatch| match dispatch {
            Dispatch::Cancel => {
                completer.settle(Err(TaskError::Cancelled));
                Outcome::Cancelled
            }
            Dispatch::Run(shared) => {
                let fut = match panic::catch_unwind(AssertUnwindSafe(task)) {
                    Ok(fut) => fut,
                    Err(payload) => {
                        completer.settle(Err(TaskError::Panicked(panic_message(&*payload))));
                        return Outcome::Panicked;
                    }
                };
                let runtime = shared.runtime.clone();
                runtime.spawn(async move {
                    let result = AssertUnwindSafe(fut).catch_unwind().await;
                    let outcome = Outcome::from(&result);
                    completer.settle(task_result(result));
                    shared.log_outcome(&task_id, outcome);
                    shared.lock().stats.record(outcome);
                });
                Outcome::Deferred
            }
        });
        Self { id, job }
    }

    fn run(self, shared: Arc<Shared>) -> Outcome {
        (self.job)(Dispatch::Run(shared))
    }

    fn cancel(self) -> Outcome {
        (self.job)(Dispatch::Cancel)
    }
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

fn task_result<T, E>(
    result: std::thread::Result<std::result::Result<T, E>>,
) -> std::result::Result<T, TaskError<E>> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskError::Failed(err)),
        Err(payload) => Err(TaskError::Panicked(panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Mutable queue state. Only touched with `Shared::state` locked.
#[derive(Debug)]
struct QueueState {
    /// Free slots, `0..=max_slots`.
    capacity: u32,
    buffer: TaskBuffer<PendingTask>,
    /// One entry per occupied slot whose release timer has not fired.
    timers: HashSet<u64>,
    next_timer: u64,
    /// Some thread is currently popping and running tasks.
    draining: bool,
    closed: bool,
    stats: QueueStats,
}

#[derive(Debug)]
struct Shared {
    id: QueueId,
    max_slots: u32,
    window: Duration,
    runtime: Handle,
    shutdown: CancellationToken,
    state: Mutex<QueueState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Task bodies never run under the lock, so poisoning cannot leave
        // the state half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run buffered tasks while slots are free. Returns immediately if another
    /// thread is already draining; that thread will see the new work.
    fn execute_ready(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }
        let _unwind = DrainerGuard { shared: self };

        loop {
            let next = {
                let mut state = self.lock();
                // Cleared under the same lock as the check so a concurrent
                // release never finds a drainer that is already leaving.
                if state.closed || state.capacity == 0 {
                    state.draining = false;
                    return;
                }
                match state.buffer.pop() {
                    Some(task) => {
                        state.capacity -= 1;
                        self.arm_release_timer(&mut state);
                        task
                    }
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            let task_id = next.id.clone();
            let outcome = next.run(Arc::clone(self));
            self.log_outcome(&task_id, outcome);
            self.lock().stats.record(outcome);
        }
    }

    fn log_outcome(&self, task_id: &TaskId, outcome: Outcome) {
        match outcome {
            Outcome::Panicked => {
                tracing::warn!(queue_id = %self.id, task_id = %task_id, "task_panicked");
            }
            Outcome::Deferred => {
                tracing::debug!(queue_id = %self.id, task_id = %task_id, "task_started");
            }
            _ => {
                tracing::debug!(queue_id = %self.id, task_id = %task_id, ?outcome, "task_executed");
            }
        }
    }

    /// Occupy the slot just taken for `window`, starting now.
    fn arm_release_timer(self: &Arc<Self>, state: &mut QueueState) {
        let timer_id = state.next_timer;
        state.next_timer += 1;
        state.timers.insert(timer_id);

        let deadline = tokio::time::Instant::now() + self.window;
        let shared = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => shared.release_slot(timer_id),
            }
        });
    }

    fn release_slot(self: &Arc<Self>, timer_id: u64) {
        {
            let mut state = self.lock();
            if state.closed || !state.timers.remove(&timer_id) {
                return;
            }
            state.capacity += 1;
            debug_assert!(state.capacity <= self.max_slots);
            tracing::debug!(
                queue_id = %self.id,
                capacity = state.capacity,
                pending = state.buffer.len(),
                "slot_released"
            );
        }
        self.execute_ready();
    }
}

/// Fail fast on a runtime built without `enable_time`: release timers
/// would otherwise panic inside their spawned task and never return a slot.
fn ensure_timer_driver(runtime: &Handle) -> Result<()> {
    let _entered = runtime.enter();
    panic::catch_unwind(|| drop(tokio::time::sleep(Duration::ZERO))).map_err(|_| {
        Error::internal("tokio runtime has no timer driver; build it with enable_time()")
    })
}

/// Releases the drainer role if a panic unwinds out of `execute_ready`
/// (e.g. dropping an undeliverable value panics).
struct DrainerGuard<'a> {
    shared: &'a Shared,
}

impl Drop for DrainerGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.shared.lock().draining = false;
        }
    }
}

/// Task queue that keeps at most `max_slots` executions inside any window
/// measured from each execution's start.
///
/// Cloning is cheap and every clone drives the same queue.
#[derive(Debug, Clone)]
pub struct RateLimitedQueue {
    shared: Arc<Shared>,
}

impl RateLimitedQueue {
    /// Create a queue on the current tokio runtime.
    pub fn new(max_slots: u32, window: Duration) -> Result<Self> {
        Self::from_config(&QueueConfig::new(max_slots, window))
    }

    /// Create a queue on the current tokio runtime from configuration.
    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            Error::internal(format!("rate-limited queue needs a tokio runtime: {e}"))
        })?;
        Self::with_runtime(config, runtime)
    }

    /// Create a queue whose release timers run on `runtime`. Usable from
    /// threads outside the runtime.
    pub fn with_runtime(config: &QueueConfig, runtime: Handle) -> Result<Self> {
        config.validate()?;
        ensure_timer_driver(&runtime)?;
        let id = QueueId::new();
        tracing::debug!(
            queue_id = %id,
            max_slots = config.max_slots,
            window = ?config.window,
            "queue_created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                max_slots: config.max_slots,
                window: config.window,
                runtime,
                shutdown: CancellationToken::new(),
                state: Mutex::new(QueueState {
                    capacity: config.max_slots,
                    buffer: TaskBuffer::new(),
                    timers: HashSet::new(),
                    next_timer: 0,
                    draining: false,
                    closed: false,
                    stats: QueueStats::default(),
                }),
            }),
        })
    }

    /// Submit a task for execution as soon as a slot allows.
    ///
    /// With a free slot the task runs before this call returns. Otherwise it
    /// waits in the buffer behind every earlier submission. After `close()`
    /// the task is never run and the handle resolves to [`TaskError::Closed`].
    pub fn submit<F, T, E>(&self, task: F) -> CompletionHandle<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.enqueue(|id, completer| PendingTask::new(id, task, completer))
    }

    /// Submit an asynchronous task.
    ///
    /// `task` is called when its slot is taken, in the same order and at the
    /// same moment a synchronous task would run. The returned future is
    /// spawned on the queue's runtime and its output settles the handle. The
    /// slot is released one window after the call, however long the future
    /// takes; `close()` does not cancel futures that already started.
    pub fn submit_async<F, Fut, T, E>(&self, task: F) -> CompletionHandle<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.enqueue(|id, completer| PendingTask::new_async(id, task, completer))
    }

    fn enqueue<T, E>(
        &self,
        wrap: impl FnOnce(TaskId, Completer<T, E>) -> PendingTask,
    ) -> CompletionHandle<T, E> {
        let task_id = TaskId::new();
        let (handle, completer) = completion_pair(task_id.clone());

        {
            let mut state = self.shared.lock();
            if state.closed {
                state.stats.rejected_closed += 1;
                drop(state);
                tracing::debug!(queue_id = %self.shared.id, task_id = %task_id, "submit_rejected_closed");
                completer.settle(Err(TaskError::Closed));
                return handle;
            }

            state.buffer.push(wrap(task_id.clone(), completer));
            state.stats.submitted += 1;
            state.stats.peak_pending = state.stats.peak_pending.max(state.buffer.len());
            tracing::debug!(
                queue_id = %self.shared.id,
                task_id = %task_id,
                capacity = state.capacity,
                pending = state.buffer.len(),
                "task_submitted"
            );
        }

        self.shared.execute_ready();
        handle
    }

    /// Close the queue: cancel every release timer and reject every buffered
    /// task with [`TaskError::Cancelled`]. Tasks already running finish
    /// normally. Returns how many tasks this call cancelled; repeated calls
    /// return 0.
    pub fn close(&self) -> usize {
        let cancelled: Vec<PendingTask> = {
            let mut state = self.shared.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            state.timers.clear();
            self.shared.shutdown.cancel();
            state.buffer.drain().collect()
        };

        let count = cancelled.len();
        let mut stats = QueueStats::default();
        for task in cancelled {
            stats.record(task.cancel());
        }
        self.shared.lock().stats.cancelled += stats.cancelled;

        tracing::info!(queue_id = %self.shared.id, cancelled = count, "queue_closed");
        count
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Slots free right now.
    pub fn available_slots(&self) -> u32 {
        self.shared.lock().capacity
    }

    /// Tasks waiting for a slot.
    pub fn pending_len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// Occupied slots whose release timer has not fired yet.
    pub fn outstanding_timers(&self) -> usize {
        self.shared.lock().timers.len()
    }

    pub fn max_slots(&self) -> u32 {
        self.shared.max_slots
    }

    pub fn window(&self) -> Duration {
        self.shared.window
    }

    pub fn id(&self) -> &QueueId {
        &self.shared.id
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.lock().stats.clone()
    }
}
