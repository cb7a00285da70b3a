// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Kestrel runtime library.
//!
//! Cooperative M:N scheduling of stackful tasks over a small pool of OS
//! threads. Each processor thread owns a FIFO ready deque; idle processors
//! drain a global injection deque and steal half of the busiest sibling's
//! deque. A monitor thread fires sleep timers and I/O readiness.
//!
//! ```no_run
//! use kestrel_rt::{Runtime, RuntimeConfig};
//!
//! let rt = Runtime::init(RuntimeConfig::default().processors(2)).unwrap();
//! let handle = rt
//!     .create(|n: u32| {
//!         kestrel_rt::yield_now();
//!         n + 1
//!     }, 41)
//!     .unwrap();
//! rt.run_until(|| handle.is_done()).unwrap();
//! assert_eq!(handle.join().unwrap(), 42);
//! ```
//!
//! Tasks never get preempted: a task that loops without yielding keeps
//! its processor.

pub mod config;
pub mod error;
mod green;
mod runtime;

pub use config::{RuntimeConfig, DEFAULT_POLL_INTERVAL, DEFAULT_STACK_SIZE};
pub use error::{ConfigError, JoinError, RuntimeError, SpawnError};
pub use green::io;
pub use green::processor::ProcessorStats;
pub use green::reactor::Interest;
pub use green::task::{TaskHandle, TaskId, TaskRef, TaskState, UserData};
pub use runtime::{
    clear_user_data, create, create_with_data, current_processor_id, current_task,
    current_task_id, init, resume, shutdown, sleep, sleep_ms, suspend, set_user_data,
    user_data, user_data_as, yield_now, Runtime, RuntimeStats,
};
