//! Core types for the queue.
//!
//! - **IDs**: Strongly-typed identifiers (TaskId, QueueId)
//! - **Errors**: Crate and per-task error types with thiserror derives
//! - **Config**: Configuration structures for the queue and logging

mod config;
mod errors;
mod ids;

pub use config::{Config, ObservabilityConfig, QueueConfig};
pub use errors::{Error, Result, TaskError};
pub use ids::{QueueId, TaskId};
