// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! M:N scheduler core.
//!
//! N processors each own a ready deque. A pass on a processor balances
//! load, pops the head of its deque and switches to it; the task runs until
//! it yields, suspends or returns, and control comes back here on the
//! processor's native stack. When a pass finds nothing to run the processor
//! parks for at most the poll interval.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, trace};

use super::arena::{Arena, TaskKey};
use super::balance;
use super::continuation::{Resumed, Stack, Switch};
use super::deque::Deque;
use super::processor::{self, Counters, Processor};
use super::reactor::Reactor;
use super::task::{panic_message, Task, TaskHandle, TaskId, TaskState, UserData};
use super::timer::TimerQueue;
use crate::config::RuntimeConfig;
use crate::error::{fatal, RuntimeError, SpawnError};

/// Where a new task is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    /// Tail of this processor's ready deque. Only used from that processor.
    Local(usize),
    /// The global deque, picked up by whichever processor balances next.
    Global,
}

/// State shared by processors, the monitor thread and external callers.
pub(crate) struct Shared {
    pub config: RuntimeConfig,
    pub processors: Vec<Processor>,
    tasks: Mutex<Arena<Arc<Task>>>,
    /// Injection queue: resumed tasks and tasks created off-processor.
    pub global: Deque<TaskKey>,
    /// Finished tasks waiting to be reclaimed.
    done: Deque<TaskKey>,
    next_id: AtomicU64,
    created: AtomicU64,
    shutdown: AtomicBool,
    pub timers: TimerQueue,
    pub reactor: Reactor,
    /// Notify parked processors that new work is available.
    work_available: (Mutex<bool>, Condvar),
}

impl Shared {
    pub fn new(config: RuntimeConfig) -> Result<Arc<Self>, RuntimeError> {
        let n = config.resolved_processors();
        let reactor = Reactor::new().map_err(RuntimeError::Reactor)?;
        // Idle tasks take the first ids, one per processor.
        let processors = (0..n)
            .map(|id| Processor::new(id, TaskId(id as u64 + 1)))
            .collect();

        Ok(Arc::new(Self {
            config,
            processors,
            tasks: Mutex::new(Arena::new()),
            global: Deque::new(),
            done: Deque::new(),
            next_id: AtomicU64::new(n as u64 + 1),
            created: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            timers: TimerQueue::new(),
            reactor,
            work_available: (Mutex::new(false), Condvar::new()),
        }))
    }

    /// Allocate, register and enqueue a task running `entry(arg)`.
    ///
    /// The stack is allocated first: on failure no id is consumed and no
    /// queue is touched.
    pub fn create<A, R, F>(
        &self,
        target: Target,
        entry: F,
        arg: A,
        user_data: Option<UserData>,
    ) -> Result<TaskHandle<R>, SpawnError>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: FnOnce(A) -> R + Send + 'static,
    {
        let size = self.config.stack_size;
        let stack =
            Stack::allocate(size).map_err(|source| SpawnError::StackAllocation { size, source })?;

        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (key, task) = {
            let mut tasks = self.tasks.lock().unwrap();
            let (key, task) =
                tasks.insert_with(|key| Arc::new(Task::new(id, key, user_data)));
            (key, task.clone())
        };
        task.bind(stack, entry, arg);
        self.created.fetch_add(1, Ordering::Relaxed);

        match target {
            Target::Local(p) => self.processors[p].ready.push_tail(key),
            Target::Global => {
                self.global.push_tail(key);
                self.notify_work();
            }
        }
        Ok(TaskHandle::new(task))
    }

    pub fn lookup(&self, key: TaskKey) -> Option<Arc<Task>> {
        self.tasks.lock().unwrap().get(key).cloned()
    }

    /// Explicit resume. The task must be suspended.
    pub fn resume(&self, task: &Arc<Task>) -> Result<(), RuntimeError> {
        if task.is_idle() {
            fatal(format_args!("resume of idle {}", task.id()));
        }
        // Its key would name some other task in this arena.
        if task.state() == TaskState::Suspend && !self.owns(task) {
            return Err(RuntimeError::ForeignTask(task.id()));
        }
        if task.wake() {
            self.inject(task);
        }
        Ok(())
    }

    fn owns(&self, task: &Arc<Task>) -> bool {
        task.key()
            .and_then(|key| self.lookup(key))
            .is_some_and(|found| Arc::ptr_eq(&found, task))
    }

    /// Timer or I/O wakeup. Losing the race to an explicit resume is fine.
    pub fn wake_from_event(&self, task: &Arc<Task>) {
        match task.try_wake() {
            Ok(true) => self.inject(task),
            Ok(false) => {}
            Err(state) => trace!(task = %task.id(), ?state, "stale wakeup"),
        }
    }

    pub fn inject(&self, task: &Arc<Task>) {
        if let Some(key) = task.key() {
            self.global.push_tail(key);
            self.notify_work();
        }
    }

    pub fn notify_work(&self) {
        let (lock, cvar) = &self.work_available;
        *lock.lock().unwrap() = true;
        cvar.notify_one();
    }

    fn notify_all(&self) {
        let (lock, cvar) = &self.work_available;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    /// Sleep until notified or `timeout` elapses. Spurious returns are
    /// harmless: the caller just runs another pass.
    pub fn park(&self, timeout: Duration) {
        let (lock, cvar) = &self.work_available;
        let mut ready = lock.lock().unwrap();
        if !*ready && !self.is_shutdown() {
            ready = cvar.wait_timeout(ready, timeout).unwrap().0;
        }
        *ready = false;
    }

    /// Set the shutdown flag. Idempotent; returns true for the first call.
    /// Callable from task stacks, so it does not log.
    pub fn request_shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.reactor.wake();
        self.notify_all();
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn live_tasks(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Reclaim finished tasks. Continuations are dropped outside the arena
    /// lock; a finished coroutine has nothing left to unwind.
    pub fn reap_done(&self) -> usize {
        let mut reaped = 0;
        while let Some(key) = self.done.pop_head() {
            let task = self.tasks.lock().unwrap().remove(key);
            if let Some(task) = task {
                let continuation = task.continuation.lock().unwrap().take();
                drop(continuation);
                reaped += 1;
            }
        }
        reaped
    }

    /// Release every task. Must run after all processors have stopped.
    ///
    /// Suspended continuations are unwound here, which also breaks the
    /// task → continuation → task reference cycle.
    pub fn teardown(&self) {
        self.timers.clear();
        self.reactor.clear();
        while self.global.pop_head().is_some() {}
        while self.done.pop_head().is_some() {}
        for p in &self.processors {
            while p.ready.pop_head().is_some() {}
        }

        let tasks = self.tasks.lock().unwrap().drain();
        let mut unwound = 0;
        for task in tasks {
            // A task still on some stack keeps its lock; leave it be.
            let continuation = match task.continuation.try_lock() {
                Ok(mut slot) => slot.take(),
                Err(_) => None,
            };
            if let Some(continuation) = continuation {
                if !continuation.is_finished() {
                    unwound += 1;
                }
                drop(continuation);
            }
        }
        debug!(unwound, "runtime torn down");
    }
}

/// Run tasks on processor `id` until its deque runs dry, shutdown is
/// requested or `until` holds. `until` is checked before every switch, so
/// a task that yields forever cannot hold the pass open. Returns how many
/// switches it made.
pub(crate) fn run_pass(shared: &Shared, id: usize, until: &mut dyn FnMut() -> bool) -> usize {
    let proc = &shared.processors[id];
    let mut ran = 0;
    while !shared.is_shutdown() && !until() {
        let reaped = shared.reap_done();
        if reaped > 0 {
            debug!(processor = id, count = reaped, "reclaimed finished tasks");
        }
        balance::load_balance(shared, id);
        let Some(key) = proc.ready.pop_head() else {
            break;
        };
        // A key can outlive its task; the arena generation catches it.
        let Some(task) = shared.lookup(key) else {
            continue;
        };
        dispatch(shared, proc, task);
        ran += 1;
    }
    ran
}

/// Processor main loop. Returns on shutdown or once `until` holds.
pub(crate) fn drive(shared: &Shared, id: usize, until: &mut dyn FnMut() -> bool) {
    trace!(processor = id, "processor loop started");
    loop {
        if shared.is_shutdown() || until() {
            break;
        }
        if run_pass(shared, id, until) == 0 && !until() {
            shared.park(shared.config.poll_interval);
        }
    }
    trace!(processor = id, "processor loop stopped");
}

/// Switch from the idle context into `task` and do the bookkeeping for
/// however it comes back.
fn dispatch(shared: &Shared, proc: &Processor, task: Arc<Task>) {
    proc.idle.set_state(TaskState::Ready);
    task.begin_run();
    proc.set_current(task.id());
    processor::set_running(Some(task.clone()));
    Counters::bump(&proc.counters.dispatched, 1);
    trace!(processor = proc.id, task = %task.id(), "switch in");

    let outcome = {
        let mut slot = task.continuation.lock().unwrap();
        let Some(continuation) = slot.as_mut() else {
            fatal(format_args!("{} has no continuation", task.id()));
        };
        panic::catch_unwind(AssertUnwindSafe(|| continuation.resume()))
    };

    processor::set_running(None);
    proc.set_current(proc.idle.id());
    proc.idle.set_state(TaskState::Running);

    match outcome {
        Ok(Resumed::Switched(Switch::Yield)) => {
            if let Err(state) = task.transition(TaskState::Running, TaskState::Ready) {
                fatal(format_args!("{} yielded in state {:?}", task.id(), state));
            }
            Counters::bump(&proc.counters.yields, 1);
            if let Some(key) = task.key() {
                proc.ready.push_tail(key);
            }
        }
        Ok(Resumed::Switched(Switch::Suspend)) => {
            Counters::bump(&proc.counters.suspends, 1);
            if !task.park_switched_out() {
                // Resumed before it finished switching out.
                shared.inject(&task);
            }
        }
        Ok(Resumed::Finished) => complete(shared, proc, &task),
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            debug!(task = %task.id(), panic = %msg, "task panicked");
            task.finish(Err(msg));
            complete(shared, proc, &task);
        }
    }
}

fn complete(shared: &Shared, proc: &Processor, task: &Arc<Task>) {
    trace!(processor = proc.id, task = %task.id(), "done");
    Counters::bump(&proc.counters.completed, 1);
    task.mark_complete();
    if let Some(key) = task.key() {
        shared.done.push_tail(key);
    }
    // Someone may be driving a processor until this task is done.
    shared.notify_all();
}

/// Hand control from a running task back to its processor.
///
/// Must be called on `task`'s own stack. The task's state has already been
/// set for `why`; the `Arc` is released before switching so nothing on the
/// suspended stack pins the task.
pub(crate) fn switch_out(task: Arc<Task>, why: Switch) {
    let yielder = task.yielder();
    drop(task);
    if yielder.is_null() {
        fatal(format_args!("switch out of a task that never started"));
    }
    // SAFETY: the yielder lives on this coroutine's stack and stays valid
    // until the coroutine returns, and we are running on that stack now.
    unsafe { (*yielder).suspend(why) };
}
