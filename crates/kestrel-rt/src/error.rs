// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime error types.
//!
//! Only stack allocation in `create` is recoverable at the scheduling
//! level. Contract violations go through [`fatal`] and abort the process.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::green::task::TaskId;

/// Failure to create a task. Scheduler state is unchanged.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to allocate a {size}-byte task stack: {source}")]
    StackAllocation {
        size: usize,
        #[source]
        source: io::Error,
    },
    #[error("no runtime is bound to this thread")]
    NoRuntime,
}

/// Failure to start or drive a runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to create the event reactor: {0}")]
    Reactor(#[source] io::Error),
    #[error("failed to spawn {name}: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("thread is already bound to processor {0} of a runtime")]
    AlreadyBound(usize),
    #[error("processor 0 can only be driven from the thread that called init, outside any task")]
    NotProcessorThread,
    #[error("no runtime is bound to this thread")]
    NoRuntime,
    #[error("{0} belongs to a different runtime")]
    ForeignTask(TaskId),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Malformed environment configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Why a joined task produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("task result was already taken")]
    ResultTaken,
}

/// Abort on a scheduler contract violation.
///
/// Continuing after a corrupted state transition could run a task on two
/// processors at once, so there is no unwinding here.
#[cold]
pub(crate) fn fatal(msg: std::fmt::Arguments<'_>) -> ! {
    tracing::error!("fatal scheduler error: {}", msg);
    eprintln!("kestrel: fatal scheduler error: {}", msg);
    std::process::abort()
}
