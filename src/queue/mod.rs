//! Rate-limited task queue.
//!
//! Two pieces, leaf first:
//! - [`TaskBuffer`]: FIFO of tasks waiting for a slot.
//! - [`RateLimitedQueue`]: slot budget, release timers, execution and shutdown.
//!
//! Every [`RateLimitedQueue::submit`] returns a [`CompletionHandle`] that
//! settles exactly once.

mod buffer;
mod handle;
mod scheduler;

pub use buffer::TaskBuffer;
pub use handle::{CompletionHandle, TaskResult};
pub use scheduler::{QueueStats, RateLimitedQueue};
