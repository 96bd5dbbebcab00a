//! # rl-queue - Rate-Limited Task Execution Queue
//!
//! Runs submitted work strictly in submission order while keeping at most
//! `N` tasks inside a fixed window measured from each task's start:
//! - Tasks run inline on `submit` while slots are free
//! - Each execution occupies its slot for exactly one window
//! - Outcomes are delivered through per-task completion handles
//! - `close()` cancels release timers and rejects everything still buffered
//!
//! ## Architecture
//!
//! ```text
//!                    ┌─────────────────────────────────┐
//!   submit(task) →   │        RateLimitedQueue         │
//!                    │  ┌──────────┐  ┌─────────────┐  │
//!                    │  │  Task    │  │  Release    │  │
//!                    │  │  Buffer  │  │  Timers     │  │
//!                    │  └──────────┘  └─────────────┘  │
//!                    └───────────────┬─────────────────┘
//!                                    ↓
//!                           CompletionHandle
//! ```
//!
//! ```no_run
//! # async fn demo() -> rl_queue::Result<()> {
//! use std::time::Duration;
//! use rl_queue::RateLimitedQueue;
//!
//! let queue = RateLimitedQueue::new(20, Duration::from_secs(31))?;
//! let handle = queue.submit(|| Ok::<_, std::io::Error>("sent"));
//! assert_eq!(handle.await.ok(), Some("sent"));
//! queue.close();
//! # Ok(())
//! # }
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod queue;
pub mod types;

// Internal utilities
pub mod observability;

pub use queue::{CompletionHandle, QueueStats, RateLimitedQueue, TaskBuffer, TaskResult};
pub use types::{Config, Error, QueueConfig, Result, TaskError, TaskId};
