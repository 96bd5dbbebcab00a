//! Application error types.
//!
//! Two families live here:
//! - [`Error`]: crate-level failures (bad configuration, missing runtime, I/O).
//! - [`TaskError`]: the outcome a submitter sees when its task did not
//!   produce a value.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for queue construction and configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid arguments or configuration (zero slots, zero window, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal errors (e.g. no async runtime to drive release timers).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Why a submitted task did not resolve with a value.
///
/// `E` is the task's own error type, passed through untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError<E> {
    /// The task ran and returned an error.
    #[error("task failed: {0}")]
    Failed(E),

    /// The task ran and panicked. Carries the panic message when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The queue was closed before the task got a slot.
    #[error("queue closed, task has been cancelled")]
    Cancelled,

    /// The task was submitted after the queue had been closed.
    #[error("queue is closed, task rejected")]
    Closed,
}

impl<E> TaskError<E> {
    /// True when the task never ran (cancelled by close, or rejected after it).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled | TaskError::Closed)
    }

    /// The task's own error, if it ran and failed.
    pub fn into_failure(self) -> Option<E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }
}
