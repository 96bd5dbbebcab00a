//! Completion handle returned by `submit`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::types::{TaskError, TaskId};

/// Outcome delivered to a submitter.
pub type TaskResult<T, E> = Result<T, TaskError<E>>;

/// Caller-visible future for one submitted task.
///
/// Resolves exactly once: with the task's value, its error, a panic report,
/// or a cancellation. The handle may already be settled when `submit`
/// returns (the task ran inline); awaiting it is always correct.
#[derive(Debug)]
#[must_use = "dropping a handle discards the task's outcome, not the task"]
pub struct CompletionHandle<T, E> {
    id: TaskId,
    rx: oneshot::Receiver<TaskResult<T, E>>,
}

impl<T, E> CompletionHandle<T, E> {
    pub(crate) fn new(id: TaskId, rx: oneshot::Receiver<TaskResult<T, E>>) -> Self {
        Self { id, rx }
    }

    /// Identifier used in this task's log events.
    pub fn id(&self) -> &TaskId {
        &self.id
    }
}

impl<T, E> Future for CompletionHandle<T, E> {
    type Output = TaskResult<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped unsettled: the queue state went away with the runtime.
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Sending half kept next to the buffered task.
#[derive(Debug)]
pub(crate) struct Completer<T, E> {
    tx: oneshot::Sender<TaskResult<T, E>>,
}

impl<T, E> Completer<T, E> {
    pub(crate) fn new(tx: oneshot::Sender<TaskResult<T, E>>) -> Self {
        Self { tx }
    }

    /// Settle the handle. A dropped handle is not an error; the outcome is discarded.
    pub(crate) fn settle(self, outcome: TaskResult<T, E>) {
        let _ = self.tx.send(outcome);
    }
}

/// Create a linked handle/completer pair for a new task.
pub(crate) fn completion_pair<T, E>(id: TaskId) -> (CompletionHandle<T, E>, Completer<T, E>) {
    let (tx, rx) = oneshot::channel();
    (CompletionHandle::new(id, rx), Completer::new(tx))
}
