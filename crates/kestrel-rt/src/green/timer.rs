// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Delayed wakeups for sleeping tasks.
//!
//! Min-heap of deadlines owned by the runtime. Tasks arm entries from their
//! own processor; only the monitor thread fires them.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::task::Task;

/// Identity of one armed timer. Compared against the task's slot before
/// firing so a timer outlived by its sleep does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(pub(crate) u64);

struct Entry {
    deadline: Instant,
    id: TimerId,
    task: Arc<Task>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Earlier deadline first; equal deadlines fire in arm order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.id.0.cmp(&other.id.0))
    }
}

pub(crate) struct TimerQueue {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    next_id: AtomicU64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Arm a wakeup for `task` after `delay`. Returns true if this is now
    /// the earliest deadline, meaning the monitor should re-plan its wait.
    pub fn arm(&self, task: &Arc<Task>, delay: Duration) -> bool {
        let id = TimerId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        task.arm_timer(id);
        let entry = Entry {
            deadline: Instant::now() + delay,
            id,
            task: task.clone(),
        };
        let mut heap = self.heap.lock().unwrap();
        let earliest = heap
            .peek()
            .map_or(true, |Reverse(head)| entry.deadline < head.deadline);
        heap.push(Reverse(entry));
        earliest
    }

    /// Remove every entry due at `now` whose task still holds that timer.
    pub fn expired(&self, now: Instant) -> Vec<Arc<Task>> {
        let mut due = Vec::new();
        let mut heap = self.heap.lock().unwrap();
        while heap
            .peek()
            .is_some_and(|Reverse(head)| head.deadline <= now)
        {
            let Some(Reverse(entry)) = heap.pop() else {
                break;
            };
            if entry.task.take_timer(entry.id) {
                due.push(entry.task);
            }
        }
        due
    }

    /// Time until the earliest deadline, if any.
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.heap
            .lock()
            .unwrap()
            .peek()
            .map(|Reverse(head)| head.deadline.saturating_duration_since(now))
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    /// Drop every entry. Used at teardown to release task references.
    pub fn clear(&self) {
        self.heap.lock().unwrap().clear();
    }
}
