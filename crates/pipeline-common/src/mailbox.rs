//! # Stage Mailbox
//!
//! An unbounded queue with a non-blocking receive side. Used for out-of-band
//! control messages flowing against the data direction (e.g. a downstream
//! stage asking the intake stage to reconfigure). The receiver drains it
//! opportunistically at the top of its loop, so sends must never block.

use std::collections::VecDeque;
use std::sync::Mutex;

/// An unbounded multi-producer queue with non-blocking receive.
pub struct Mailbox<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueue a message. Never blocks.
    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push_back(item);
    }

    /// Take the oldest pending message, if any.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().unwrap().pop_front()
    }

    /// Whether any message is pending.
    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
