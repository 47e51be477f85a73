//! # Bounded Stage Queue
//!
//! A small blocking queue used as the handoff point between pipeline stages.
//! With a capacity of one it degenerates into a mailbox slot: the producer
//! cannot enqueue a second item until the consumer has taken the first, which
//! gives strict back-to-back backpressure across stages and bounds the amount
//! of in-flight data.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// A bounded multi-producer, multi-consumer blocking queue.
///
/// `push` blocks while the queue is full; `pop` blocks while it is empty.
/// Unlike `std::sync::mpsc` channels, both ends are `&self` and can be shared
/// behind one `Arc`, so a stage thread can consume from one queue and produce
/// into the next without channel-half bookkeeping.
pub struct SyncQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> SyncQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueue an item, blocking until there is room.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock().unwrap();
        while items.len() >= self.capacity {
            items = self.not_full.wait(items).unwrap();
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
    }

    /// Dequeue an item, blocking until one is available.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock().unwrap();
        let item = loop {
            match items.pop_front() {
                Some(item) => break item,
                None => items = self.not_empty.wait(items).unwrap(),
            }
        };
        drop(items);
        self.not_full.notify_one();
        item
    }

    /// Dequeue an item if one is immediately available.
    pub fn try_pop(&self) -> Option<T> {
        let mut items = self.items.lock().unwrap();
        let item = items.pop_front();
        if item.is_some() {
            drop(items);
            self.not_full.notify_one();
        }
        item
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_push_pop_order() {
        let q = SyncQueue::new(4);
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), 1);
        assert_eq!(q.pop(), 2);
        assert_eq!(q.pop(), 3);
    }

    #[test]
    fn test_single_slot_backpressure() {
        let q = Arc::new(SyncQueue::new(1));
        q.push(10u32);

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                // Blocks until the consumer takes the first item.
                q.push(20u32);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 1, "second push must wait for the consumer");

        assert_eq!(q.pop(), 10);
        producer.join().unwrap();
        assert_eq!(q.pop(), 20);
    }

    #[test]
    fn test_pop_blocks_until_item() {
        let q = Arc::new(SyncQueue::new(1));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(20));
        q.push(7u8);
        assert_eq!(consumer.join().unwrap(), 7);
    }

    #[test]
    fn test_try_pop_empty() {
        let q: SyncQueue<u8> = SyncQueue::new(1);
        assert_eq!(q.try_pop(), None);
    }
}
