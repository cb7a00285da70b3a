// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Stackful coroutine tasks on an M:N scheduler.
//!
//! Components:
//! - `continuation` - stack allocation and context switching
//! - `task` - task record, state machine, handles
//! - `arena` - generation-checked task slots
//! - `deque` - locked FIFOs used for every queue
//! - `processor` - per-thread processor state and binding
//! - `scheduler` - shared state, dispatch and the processor loop
//! - `balance` - global drain and sibling stealing
//! - `timer` - sleep deadlines
//! - `reactor` - epoll readiness for suspended tasks
//! - `monitor` - thread that fires timers and readiness
//! - `io` - suspending read/write on raw descriptors

pub(crate) mod arena;
pub(crate) mod balance;
pub(crate) mod continuation;
pub(crate) mod deque;
pub mod io;
pub(crate) mod monitor;
pub(crate) mod processor;
pub(crate) mod reactor;
pub(crate) mod scheduler;
pub(crate) mod task;
pub(crate) mod timer;
