// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task representation and state machine.
//!
//! A task is a stackful coroutine plus the bookkeeping its processor needs:
//! id, state, result slot, user-data slot and an optional armed timer.
//! The entry function and its argument live inside the continuation's
//! trampoline until the first resume.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::arena::TaskKey;
use super::continuation::{Continuation, Stack, Yielder};
use super::timer::TimerId;
use crate::error::{fatal, JoinError};

/// Opaque per-task user data.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Type-erased task result.
pub(crate) type Value = Box<dyn Any + Send>;

/// Task lifecycle states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued, waiting for a processor.
    Ready = 0,
    /// Executing on exactly one processor.
    Running = 1,
    /// Parked until a timer, I/O readiness or an explicit resume.
    Suspend = 2,
    /// Entry returned. Terminal.
    Done = 3,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Suspend,
            _ => Self::Done,
        }
    }
}

/// Unique task id. Assigned from one counter per runtime, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

// Park handshake between the processor switching a suspended task out and
// a concurrent resume. Whoever arrives second enqueues the task.
const RUNNABLE: u8 = 0;
const PARKED: u8 = 1;
const WAKE_PENDING: u8 = 2;

pub(crate) struct Task {
    id: TaskId,
    /// Arena key. `None` for a processor's idle task.
    key: Option<TaskKey>,
    state: AtomicU8,
    park: AtomicU8,
    pub(crate) continuation: Mutex<Option<Continuation>>,
    /// Set by the trampoline; valid while the continuation is alive.
    yielder: AtomicPtr<Yielder>,
    user_data: Mutex<Option<UserData>>,
    result: Mutex<Option<Result<Value, String>>>,
    complete: (Mutex<bool>, Condvar),
    timer: Mutex<Option<TimerId>>,
    wakeups: AtomicU64,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

impl Task {
    pub fn new(id: TaskId, key: TaskKey, user_data: Option<UserData>) -> Self {
        Self::with_key(id, Some(key), TaskState::Ready, user_data)
    }

    /// A processor's resident idle task. It has no continuation of its own:
    /// it is the processor thread's native stack.
    pub fn idle(id: TaskId) -> Self {
        Self::with_key(id, None, TaskState::Running, None)
    }

    fn with_key(
        id: TaskId,
        key: Option<TaskKey>,
        state: TaskState,
        user_data: Option<UserData>,
    ) -> Self {
        Self {
            id,
            key,
            state: AtomicU8::new(state as u8),
            park: AtomicU8::new(RUNNABLE),
            continuation: Mutex::new(None),
            yielder: AtomicPtr::new(ptr::null_mut()),
            user_data: Mutex::new(user_data),
            result: Mutex::new(None),
            complete: (Mutex::new(false), Condvar::new()),
            timer: Mutex::new(None),
            wakeups: AtomicU64::new(0),
        }
    }

    /// Install the trampoline: run `entry(arg)`, store its value, mark Done.
    pub fn bind<A, R, F>(self: &Arc<Self>, stack: Stack, entry: F, arg: A)
    where
        A: Send + 'static,
        R: Send + 'static,
        F: FnOnce(A) -> R + Send + 'static,
    {
        let task = self.clone();
        let continuation = Continuation::new(stack, move |yielder| {
            task.yielder
                .store(yielder as *const Yielder as *mut Yielder, Ordering::Release);
            let value = entry(arg);
            task.finish(Ok(Box::new(value)));
        });
        *self.continuation.lock().unwrap() = Some(continuation);
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn key(&self) -> Option<TaskKey> {
        self.key
    }

    pub fn is_idle(&self) -> bool {
        self.key.is_none()
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn transition(&self, from: TaskState, to: TaskState) -> Result<(), TaskState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(TaskState::from_u8)
    }

    /// Ready → Running right before a switch. Anything else is corruption.
    pub fn begin_run(&self) {
        if let Err(actual) = self.transition(TaskState::Ready, TaskState::Running) {
            fatal(format_args!("switch into {} in state {:?}", self.id, actual));
        }
        self.park.store(RUNNABLE, Ordering::Release);
    }

    /// Record that a suspended task has left its processor.
    ///
    /// Returns false if a resume already arrived while it was switching
    /// out; the caller must then enqueue it on the global deque.
    pub fn park_switched_out(&self) -> bool {
        match self
            .park
            .compare_exchange(RUNNABLE, PARKED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(_) => {
                self.park.store(RUNNABLE, Ordering::Release);
                false
            }
        }
    }

    /// Suspend → Ready on behalf of an explicit resume. Resuming a task
    /// in any other state aborts.
    ///
    /// Returns true if the task is already off its processor and the caller
    /// must enqueue it; false if the switching processor will.
    pub fn wake(&self) -> bool {
        match self.try_wake() {
            Ok(enqueue) => enqueue,
            Err(actual) => fatal(format_args!("resume of {} in state {:?}", self.id, actual)),
        }
    }

    /// Like [`wake`](Self::wake) but reports a task that is not suspended.
    /// Timer and I/O wakeups use this: they can lose a race against an
    /// explicit resume.
    pub fn try_wake(&self) -> Result<bool, TaskState> {
        self.transition(TaskState::Suspend, TaskState::Ready)?;
        self.wakeups.fetch_add(1, Ordering::Relaxed);
        *self.timer.lock().unwrap() = None;
        match self
            .park
            .compare_exchange(RUNNABLE, WAKE_PENDING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(false),
            Err(_) => {
                self.park.store(RUNNABLE, Ordering::Release);
                Ok(true)
            }
        }
    }

    pub fn yielder(&self) -> *const Yielder {
        self.yielder.load(Ordering::Acquire)
    }

    pub fn arm_timer(&self, id: TimerId) {
        *self.timer.lock().unwrap() = Some(id);
    }

    /// Forget whatever timer the task last armed. A sleep cut short by an
    /// explicit resume can leave one behind.
    pub fn disarm_timer(&self) {
        *self.timer.lock().unwrap() = None;
    }

    /// Disarm `id` if it is still this task's timer. A timer whose task was
    /// resumed some other way must not fire.
    pub fn take_timer(&self, id: TimerId) -> bool {
        let mut slot = self.timer.lock().unwrap();
        if *slot == Some(id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn set_user_data(&self, data: Option<UserData>) {
        *self.user_data.lock().unwrap() = data;
    }

    pub fn user_data(&self) -> Option<UserData> {
        self.user_data.lock().unwrap().clone()
    }

    /// Store the outcome and enter the terminal state.
    pub fn finish(&self, result: Result<Value, String>) {
        *self.result.lock().unwrap() = Some(result);
        self.set_state(TaskState::Done);
    }

    /// Wake threads blocked in `join`.
    pub fn mark_complete(&self) {
        let (lock, cvar) = &self.complete;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    /// Block the calling OS thread until the task completes.
    fn wait_complete(&self, timeout: Option<Duration>) -> bool {
        let (lock, cvar) = &self.complete;
        let mut done = lock.lock().unwrap();
        let deadline = timeout.map(|t| Instant::now() + t);
        while !*done {
            match deadline {
                None => done = cvar.wait(done).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    done = cvar.wait_timeout(done, deadline - now).unwrap().0;
                }
            }
        }
        true
    }

    fn take_result(&self) -> Option<Result<Value, String>> {
        self.result.lock().unwrap().take()
    }
}

/// Untyped, clonable reference to a task. Used to resume it.
#[derive(Clone)]
pub struct TaskRef {
    pub(crate) task: Arc<Task>,
}

impl TaskRef {
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    pub fn is_done(&self) -> bool {
        self.state() == TaskState::Done
    }

    /// Number of times this task went from Suspend back to Ready.
    pub fn wakeups(&self) -> u64 {
        self.task.wakeups.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.task, f)
    }
}

/// Typed handle returned by `create`. Owns the right to the result.
pub struct TaskHandle<R> {
    task: Arc<Task>,
    _result: PhantomData<fn() -> R>,
}

impl<R: Send + 'static> TaskHandle<R> {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        Self {
            task,
            _result: PhantomData,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    pub fn is_done(&self) -> bool {
        self.state() == TaskState::Done
    }

    pub fn task_ref(&self) -> TaskRef {
        TaskRef {
            task: self.task.clone(),
        }
    }

    /// Block the calling OS thread until the task finishes.
    ///
    /// Calling this from inside a task blocks the whole processor.
    pub fn join(self) -> Result<R, JoinError> {
        self.task.wait_complete(None);
        self.take()
    }

    /// Like [`join`](Self::join) but gives up after `timeout`. The handle
    /// stays usable after a [`JoinError::TimedOut`].
    pub fn join_timeout(&self, timeout: Duration) -> Result<R, JoinError> {
        if self.task.wait_complete(Some(timeout)) {
            self.take()
        } else {
            Err(JoinError::TimedOut(timeout))
        }
    }

    fn take(&self) -> Result<R, JoinError> {
        match self.task.take_result() {
            Some(Ok(value)) => value
                .downcast::<R>()
                .map(|v| *v)
                .map_err(|_| JoinError::ResultTaken),
            Some(Err(msg)) => Err(JoinError::Panicked(msg)),
            None => Err(JoinError::ResultTaken),
        }
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskHandle").field(&self.task).finish()
    }
}

/// Render a panic payload the way the standard hook does.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::green::arena::Arena;

    fn task() -> Arc<Task> {
        let mut arena = Arena::new();
        let (_, task) = arena.insert_with(|key| Arc::new(Task::new(TaskId(7), key, None)));
        task.clone()
    }

    #[test]
    fn starts_ready_and_runs() {
        let t = task();
        assert_eq!(t.state(), TaskState::Ready);
        t.begin_run();
        assert_eq!(t.state(), TaskState::Running);
    }

    #[test]
    fn transition_reports_actual_state() {
        let t = task();
        assert_eq!(
            t.transition(TaskState::Suspend, TaskState::Ready),
            Err(TaskState::Ready)
        );
    }

    #[test]
    fn wake_after_park_requires_enqueue() {
        let t = task();
        t.begin_run();
        t.set_state(TaskState::Suspend);
        assert!(t.park_switched_out());
        assert!(t.wake());
        assert_eq!(t.state(), TaskState::Ready);
        assert_eq!(TaskRef { task: t }.wakeups(), 1);
    }

    #[test]
    fn wake_before_park_defers_enqueue_to_processor() {
        let t = task();
        t.begin_run();
        t.set_state(TaskState::Suspend);
        assert!(!t.wake());
        assert!(!t.park_switched_out());
        assert_eq!(t.state(), TaskState::Ready);
    }

    #[test]
    fn try_wake_reports_lost_race() {
        let t = task();
        assert_eq!(t.try_wake(), Err(TaskState::Ready));
        assert_eq!(TaskRef { task: t }.wakeups(), 0);
    }

    #[test]
    fn stale_timer_is_ignored() {
        let t = task();
        t.arm_timer(TimerId(1));
        assert!(!t.take_timer(TimerId(2)));
        assert!(t.take_timer(TimerId(1)));
        assert!(!t.take_timer(TimerId(1)));
    }

    #[test]
    fn idle_task_has_no_key() {
        let idle = Task::idle(TaskId(1));
        assert!(idle.is_idle());
        assert_eq!(idle.state(), TaskState::Running);
    }

    #[test]
    fn handle_reads_typed_result() {
        let t = task();
        t.finish(Ok(Box::new(41u32 + 1)));
        t.mark_complete();
        let handle: TaskHandle<u32> = TaskHandle::new(t);
        assert!(handle.is_done());
        assert_eq!(handle.join(), Ok(42));
    }

    #[test]
    fn handle_reports_panic() {
        let t = task();
        t.finish(Err("boom".to_string()));
        t.mark_complete();
        let handle: TaskHandle<()> = TaskHandle::new(t);
        assert_eq!(handle.join(), Err(JoinError::Panicked("boom".to_string())));
    }

    #[test]
    fn join_timeout_leaves_handle_usable() {
        let t = task();
        let handle: TaskHandle<u8> = TaskHandle::new(t.clone());
        assert_eq!(
            handle.join_timeout(Duration::from_millis(10)),
            Err(JoinError::TimedOut(Duration::from_millis(10)))
        );
        t.finish(Ok(Box::new(3u8)));
        t.mark_complete();
        assert_eq!(handle.join_timeout(Duration::from_millis(10)), Ok(3));
    }
}
