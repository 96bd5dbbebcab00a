//! Ordered task buffer.
//!
//! Plain FIFO with an exact length. NOT synchronized - owned by the queue
//! state and only touched while the queue's lock is held.

use std::collections::VecDeque;

/// FIFO of items awaiting execution. Insertion order is execution order.
#[derive(Debug)]
pub struct TaskBuffer<T> {
    items: VecDeque<T>,
}

impl<T> TaskBuffer<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Append at the tail.
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove and return the head, `None` when empty.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Take every buffered item, head first, leaving the buffer empty.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }
}

impl<T> Default for TaskBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
