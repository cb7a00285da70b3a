// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime handle and the task-facing free functions.
//!
//! `Runtime::init` turns the calling thread into processor 0, spawns the
//! other processors and the monitor thread. The free functions act on the
//! runtime bound to the calling thread and on the task running there.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::error::{fatal, RuntimeError, SpawnError};
use crate::green::continuation::Switch;
use crate::green::monitor::monitor_loop;
use crate::green::processor::{self, Here, ProcessorStats};
use crate::green::scheduler::{self, switch_out, Shared, Target};
use crate::green::task::{Task, TaskHandle, TaskId, TaskRef, TaskState, UserData};

/// A running scheduler: N processors plus a monitor thread.
///
/// Dropping it requests shutdown, joins every thread it spawned and
/// releases every task, unwinding the stacks of tasks that never finished.
/// Drop it on the thread that created it, outside any task.
pub struct Runtime {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    owner: ThreadId,
}

/// Point-in-time counters for a runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RuntimeStats {
    /// Tasks created since init, idle tasks excluded.
    pub created: u64,
    /// Tasks not yet reclaimed.
    pub live: usize,
    /// Approximate global deque length.
    pub global_queued: usize,
    /// Armed sleep timers, including ones already outlived by a resume.
    pub timers: usize,
    /// Tasks parked on a descriptor.
    pub io_waiters: usize,
    pub processors: Vec<ProcessorStats>,
}

impl Runtime {
    /// Start a runtime. The calling thread becomes processor 0 and must
    /// later drive it with [`run`](Self::run), [`run_until`](Self::run_until)
    /// or [`yield_now`].
    pub fn init(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let shared = Shared::new(config)?;
        processor::bind(shared.clone(), 0)?;

        let runtime = Self {
            shared,
            threads: Mutex::new(Vec::new()),
            owner: thread::current().id(),
        };
        // On error `runtime` drops here, stopping what already started.
        runtime.spawn_threads()?;

        let config = &runtime.shared.config;
        info!(
            processors = runtime.shared.processors.len(),
            stack_size = config.stack_size,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "runtime started"
        );
        Ok(runtime)
    }

    fn spawn_threads(&self) -> Result<(), RuntimeError> {
        let prefix = self.shared.config.thread_name.clone();
        let mut threads = self.threads.lock().unwrap();

        let name = format!("{}-monitor", prefix);
        let shared = self.shared.clone();
        threads.push(spawn_named(name, move || monitor_loop(shared))?);

        for id in 1..self.shared.processors.len() {
            let name = format!("{}-{}", prefix, id);
            let shared = self.shared.clone();
            threads.push(spawn_named(name, move || processor_main(shared, id))?);
        }
        Ok(())
    }

    /// Create a task. From one of this runtime's processors it is queued
    /// locally; from any other thread it goes through the global deque.
    pub fn create<A, R, F>(&self, entry: F, arg: A) -> Result<TaskHandle<R>, SpawnError>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: FnOnce(A) -> R + Send + 'static,
    {
        self.create_with_data(entry, arg, None)
    }

    /// [`create`](Self::create) with the task's user-data slot pre-filled.
    pub fn create_with_data<A, R, F>(
        &self,
        entry: F,
        arg: A,
        user_data: Option<UserData>,
    ) -> Result<TaskHandle<R>, SpawnError>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: FnOnce(A) -> R + Send + 'static,
    {
        let target = match processor::here().processor_of(&self.shared) {
            Some(id) => Target::Local(id),
            None => Target::Global,
        };
        self.shared.create(target, entry, arg, user_data)
    }

    /// Make a suspended task runnable again. Aborts if it is not suspended.
    pub fn resume(&self, task: &TaskRef) -> Result<(), RuntimeError> {
        self.shared.resume(&task.task)
    }

    /// Ask every processor loop and the monitor to stop. Idempotent.
    ///
    /// Loops notice at their next iteration; a parked processor is woken.
    /// Tasks that are still running keep running until they next switch.
    pub fn shutdown(&self) {
        self.shared.request_shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Drive processor 0 until shutdown.
    pub fn run(&self) -> Result<(), RuntimeError> {
        self.run_until(|| false)
    }

    /// Drive processor 0 until `done()` holds or shutdown is requested.
    /// `done` is checked between scheduling passes.
    pub fn run_until(&self, mut done: impl FnMut() -> bool) -> Result<(), RuntimeError> {
        self.check_driver()?;
        scheduler::drive(&self.shared, 0, &mut done);
        Ok(())
    }

    fn check_driver(&self) -> Result<(), RuntimeError> {
        match processor::here() {
            Here::Idle { shared, id: 0 }
                if Arc::ptr_eq(&shared, &self.shared) && thread::current().id() == self.owner =>
            {
                Ok(())
            }
            _ => Err(RuntimeError::NotProcessorThread),
        }
    }

    pub fn processor_count(&self) -> usize {
        self.shared.processors.len()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            created: self.shared.created(),
            live: self.shared.live_tasks(),
            global_queued: self.shared.global.len_hint(),
            timers: self.shared.timers.len(),
            io_waiters: self.shared.reactor.registered(),
            processors: self.shared.processors.iter().map(|p| p.stats()).collect(),
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("processors", &self.processor_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shared.request_shutdown();
        let threads = std::mem::take(&mut *self.threads.lock().unwrap());
        for handle in threads {
            if handle.join().is_err() {
                warn!("runtime thread panicked");
            }
        }
        processor::unbind(&self.shared);
        self.shared.teardown();
        info!("runtime stopped");
    }
}

fn spawn_named(
    name: String,
    f: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, RuntimeError> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|source| RuntimeError::ThreadSpawn { name, source })
}

fn processor_main(shared: Arc<Shared>, id: usize) {
    if let Err(e) = processor::bind(shared.clone(), id) {
        warn!(processor = id, error = %e, "processor thread could not bind");
        return;
    }
    info!(processor = id, "processor started");
    scheduler::drive(&shared, id, &mut || false);
    processor::unbind(&shared);
}

/// Start a runtime with `n` processors; `n <= 0` means one per CPU.
///
/// Other settings come from the environment, see
/// [`RuntimeConfig::from_env`].
pub fn init(n: i32) -> Result<Runtime, RuntimeError> {
    let mut config = RuntimeConfig::from_env()?;
    if n > 0 {
        config = config.processors(n as usize);
    }
    Runtime::init(config)
}

/// Create a task on the calling processor's local deque.
pub fn create<A, R, F>(entry: F, arg: A) -> Result<TaskHandle<R>, SpawnError>
where
    A: Send + 'static,
    R: Send + 'static,
    F: FnOnce(A) -> R + Send + 'static,
{
    create_with_data(entry, arg, None)
}

/// [`create`] with the task's user-data slot pre-filled.
pub fn create_with_data<A, R, F>(
    entry: F,
    arg: A,
    user_data: Option<UserData>,
) -> Result<TaskHandle<R>, SpawnError>
where
    A: Send + 'static,
    R: Send + 'static,
    F: FnOnce(A) -> R + Send + 'static,
{
    match processor::here() {
        Here::Task { shared, id, .. } | Here::Idle { shared, id } => {
            shared.create(Target::Local(id), entry, arg, user_data)
        }
        Here::Unbound => Err(SpawnError::NoRuntime),
    }
}

/// Give up the processor.
///
/// In a task: requeue at the tail of the local deque and let the next one
/// run. On processor 0's thread outside any task: run local tasks until
/// the deque is empty. On any other thread: yield the OS thread.
pub fn yield_now() {
    match processor::here() {
        Here::Task { shared, task, .. } => {
            drop(shared);
            switch_out(task, Switch::Yield);
        }
        Here::Idle { shared, id } => {
            scheduler::run_pass(&shared, id, &mut || false);
        }
        Here::Unbound => thread::yield_now(),
    }
}

/// Suspend the current task for `timeout`. Zero just yields.
///
/// Aborts on a processor's idle context. Outside any runtime this is
/// `std::thread::sleep`.
pub fn sleep(timeout: Duration) {
    if timeout.is_zero() {
        yield_now();
        return;
    }
    match processor::here() {
        Here::Task { shared, task, .. } => {
            enter_suspend(&task);
            if shared.timers.arm(&task, timeout) {
                shared.reactor.wake();
            }
            drop(shared);
            switch_out(task, Switch::Suspend);
        }
        Here::Idle { .. } => fatal(format_args!("sleep on a processor's idle task")),
        Here::Unbound => thread::sleep(timeout),
    }
}

/// Suspend the current task until something calls [`resume`] on it.
pub fn suspend() {
    match processor::here() {
        Here::Task { shared, task, .. } => {
            enter_suspend(&task);
            drop(shared);
            switch_out(task, Switch::Suspend);
        }
        Here::Idle { .. } => fatal(format_args!("suspend on a processor's idle task")),
        Here::Unbound => fatal(format_args!("suspend outside a runtime")),
    }
}

/// Millisecond form of [`sleep`]: zero yields, a negative timeout
/// suspends until an explicit [`resume`].
pub fn sleep_ms(timeout: i64) {
    match timeout {
        0 => yield_now(),
        t if t > 0 => sleep(Duration::from_millis(t as u64)),
        _ => suspend(),
    }
}

/// Running → Suspend. Any timer left from an earlier sleep is dropped
/// first: only the sleep that follows may arm a new one.
fn enter_suspend(task: &Task) {
    task.disarm_timer();
    if let Err(state) = task.transition(TaskState::Running, TaskState::Suspend) {
        fatal(format_args!("{} suspended in state {:?}", task.id(), state));
    }
}

/// Make a suspended task runnable on the calling thread's runtime.
pub fn resume(task: &TaskRef) -> Result<(), RuntimeError> {
    match processor::here().shared() {
        Some(shared) => shared.resume(&task.task),
        None => Err(RuntimeError::NoRuntime),
    }
}

/// Request shutdown of the calling thread's runtime.
pub fn shutdown() -> Result<(), RuntimeError> {
    match processor::here().shared() {
        Some(shared) => {
            shared.request_shutdown();
            Ok(())
        }
        None => Err(RuntimeError::NoRuntime),
    }
}

/// Replace the current task's user data. Outside any task this is the
/// processor's idle task.
pub fn set_user_data<T: Any + Send + Sync>(value: T) -> Result<(), RuntimeError> {
    let task = processor::here().task().ok_or(RuntimeError::NoRuntime)?;
    task.set_user_data(Some(Arc::new(value)));
    Ok(())
}

/// Clear the current task's user data.
pub fn clear_user_data() -> Result<(), RuntimeError> {
    let task = processor::here().task().ok_or(RuntimeError::NoRuntime)?;
    task.set_user_data(None);
    Ok(())
}

pub fn user_data() -> Option<UserData> {
    processor::here().task()?.user_data()
}

/// The current task's user data, if it is a `T`.
pub fn user_data_as<T: Any + Send + Sync>() -> Option<Arc<T>> {
    user_data()?.downcast::<T>().ok()
}

/// Index of the processor the caller runs on.
pub fn current_processor_id() -> Option<usize> {
    processor::here().processor()
}

/// Id of the running task; the idle task's id outside any task.
pub fn current_task_id() -> Option<TaskId> {
    processor::here().task().map(|t| t.id())
}

/// The running task. `None` outside a task, including on idle contexts.
pub fn current_task() -> Option<TaskRef> {
    match processor::here() {
        Here::Task { task, .. } => Some(TaskRef { task }),
        _ => None,
    }
}
