// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Locked FIFO task queues.
//!
//! One type serves the per-processor ready queues, the global injection
//! queue and the done queue. Owners pop from the head, producers push to
//! the tail, thieves pop from the head of a victim.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Mutex-protected FIFO with an unlocked size hint.
///
/// `count` is written under the same lock as the queue but read without
/// it by the load balancer, so it can be stale by the time it is used.
pub(crate) struct Deque<T> {
    items: Mutex<VecDeque<T>>,
    count: AtomicUsize,
}

impl<T> Deque<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            count: AtomicUsize::new(0),
        }
    }

    pub fn push_tail(&self, item: T) {
        let mut q = self.items.lock().unwrap();
        q.push_back(item);
        self.count.store(q.len(), Ordering::Relaxed);
    }

    pub fn pop_head(&self) -> Option<T> {
        let mut q = self.items.lock().unwrap();
        let item = q.pop_front();
        self.count.store(q.len(), Ordering::Relaxed);
        item
    }

    /// Approximate length, read without taking the lock.
    pub fn len_hint(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Exact length under the lock.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}
