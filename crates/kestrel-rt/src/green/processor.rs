// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Processors and the thread binding that tells a caller where it runs.
//!
//! A processor is one OS thread with a private ready deque and a resident
//! idle task. The idle task is the thread's native stack: the scheduler
//! loop runs on it and every task switch goes through it.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::arena::TaskKey;
use super::deque::Deque;
use super::scheduler::Shared;
use super::task::{Task, TaskId};
use crate::error::RuntimeError;

pub(crate) struct Processor {
    pub id: usize,
    pub ready: Deque<TaskKey>,
    pub idle: Arc<Task>,
    /// Id of the task on this processor right now; the idle id when none.
    current: AtomicU64,
    pub counters: Counters,
}

impl Processor {
    pub fn new(id: usize, idle_id: TaskId) -> Self {
        Self {
            id,
            ready: Deque::new(),
            idle: Arc::new(Task::idle(idle_id)),
            current: AtomicU64::new(idle_id.as_u64()),
            counters: Counters::default(),
        }
    }

    pub fn set_current(&self, id: TaskId) {
        self.current.store(id.as_u64(), Ordering::Relaxed);
    }

    pub fn current(&self) -> TaskId {
        TaskId(self.current.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> ProcessorStats {
        let c = &self.counters;
        ProcessorStats {
            id: self.id,
            current: self.current().as_u64(),
            queued: self.ready.len_hint(),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            yields: c.yields.load(Ordering::Relaxed),
            suspends: c.suspends.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            stolen: c.stolen.load(Ordering::Relaxed),
            drained: c.drained.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub dispatched: AtomicU64,
    pub yields: AtomicU64,
    pub suspends: AtomicU64,
    pub completed: AtomicU64,
    pub stolen: AtomicU64,
    pub drained: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Snapshot of one processor's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ProcessorStats {
    pub id: usize,
    /// Id of the task running at snapshot time; the idle task's id if none.
    pub current: u64,
    /// Approximate ready-deque length.
    pub queued: usize,
    pub dispatched: u64,
    pub yields: u64,
    pub suspends: u64,
    pub completed: u64,
    /// Tasks taken from siblings.
    pub stolen: u64,
    /// Tasks pulled from the global deque.
    pub drained: u64,
}

/// What the calling thread is, as far as a runtime is concerned.
pub(crate) enum Here {
    /// Inside a task body on processor `id`.
    Task {
        shared: Arc<Shared>,
        id: usize,
        task: Arc<Task>,
    },
    /// On processor `id`'s idle context, outside any task.
    Idle { shared: Arc<Shared>, id: usize },
    /// Not a processor thread.
    Unbound,
}

impl Here {
    pub fn shared(&self) -> Option<&Arc<Shared>> {
        match self {
            Here::Task { shared, .. } | Here::Idle { shared, .. } => Some(shared),
            Here::Unbound => None,
        }
    }

    pub fn processor(&self) -> Option<usize> {
        match self {
            Here::Task { id, .. } | Here::Idle { id, .. } => Some(*id),
            Here::Unbound => None,
        }
    }

    /// Processor id if this thread belongs to `shared`.
    pub fn processor_of(&self, shared: &Arc<Shared>) -> Option<usize> {
        self.shared()
            .filter(|s| Arc::ptr_eq(s, shared))
            .and_then(|_| self.processor())
    }

    /// The running task, or the processor's idle task outside any task.
    pub fn task(&self) -> Option<Arc<Task>> {
        match self {
            Here::Task { task, .. } => Some(task.clone()),
            Here::Idle { shared, id } => Some(shared.processors[*id].idle.clone()),
            Here::Unbound => None,
        }
    }
}

struct Binding {
    shared: Arc<Shared>,
    id: usize,
    current: Option<Arc<Task>>,
}

thread_local! {
    static BINDING: RefCell<Option<Binding>> = const { RefCell::new(None) };
}

// The accessors below are never inlined: task code can migrate between
// threads across a yield, so a thread-local address must not be cached in
// a caller's frame.

/// Attach the calling thread to processor `id` of `shared`.
#[inline(never)]
pub(crate) fn bind(shared: Arc<Shared>, id: usize) -> Result<(), RuntimeError> {
    BINDING.with(|b| {
        let mut b = b.borrow_mut();
        if let Some(existing) = b.as_ref() {
            return Err(RuntimeError::AlreadyBound(existing.id));
        }
        *b = Some(Binding {
            shared,
            id,
            current: None,
        });
        Ok(())
    })
}

/// Detach the calling thread if it is bound to `shared`.
#[inline(never)]
pub(crate) fn unbind(shared: &Arc<Shared>) {
    BINDING.with(|b| {
        let mut b = b.borrow_mut();
        if b.as_ref().is_some_and(|x| Arc::ptr_eq(&x.shared, shared)) {
            *b = None;
        }
    });
}

#[inline(never)]
pub(crate) fn here() -> Here {
    BINDING.with(|b| match b.borrow().as_ref() {
        None => Here::Unbound,
        Some(Binding {
            shared,
            id,
            current: Some(task),
        }) => Here::Task {
            shared: shared.clone(),
            id: *id,
            task: task.clone(),
        },
        Some(Binding {
            shared,
            id,
            current: None,
        }) => Here::Idle {
            shared: shared.clone(),
            id: *id,
        },
    })
}

/// Record the task about to run on this thread (`None` back on idle).
#[inline(never)]
pub(crate) fn set_running(task: Option<Arc<Task>>) {
    BINDING.with(|b| {
        if let Some(binding) = b.borrow_mut().as_mut() {
            binding.current = task;
        }
    });
}
