// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime configuration.
//!
//! Defaults: one processor per CPU, 256 KiB task stacks and a one second
//! idle poll.

use std::time::Duration;

use crate::error::ConfigError;

/// Default task stack size in bytes. Stacks never grow; a task that
/// overflows faults on the guard page below its stack. Panic unwinding and
/// the panic hook run on the task stack, so this must leave room for them.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// How long an idle processor parks before re-checking for work.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Settings for [`Runtime::init`](crate::Runtime::init).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of processors. 0 means one per available CPU.
    pub processors: usize,
    /// Task stack size in bytes.
    pub stack_size: usize,
    /// Idle park timeout. Also bounds how long shutdown takes to be seen.
    pub poll_interval: Duration,
    /// Prefix for worker and monitor thread names.
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            processors: 0,
            stack_size: DEFAULT_STACK_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            thread_name: "kestrel".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `KESTREL_PROCESSORS`, `KESTREL_STACK_SIZE`
    /// and `KESTREL_POLL_INTERVAL_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = lookup("KESTREL_PROCESSORS") {
            config.processors = parse(&v, "KESTREL_PROCESSORS", "processor count")?;
        }
        if let Some(v) = lookup("KESTREL_STACK_SIZE") {
            let size: usize = parse(&v, "KESTREL_STACK_SIZE", "byte count")?;
            if size == 0 {
                return Err(invalid("KESTREL_STACK_SIZE", &v, "byte count"));
            }
            config.stack_size = size;
        }
        if let Some(v) = lookup("KESTREL_POLL_INTERVAL_MS") {
            let ms: u64 = parse(&v, "KESTREL_POLL_INTERVAL_MS", "millisecond count")?;
            config.poll_interval = Duration::from_millis(ms.max(1));
        }
        Ok(config)
    }

    pub fn processors(mut self, n: usize) -> Self {
        self.processors = n;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Processor count with 0 resolved to the host CPU count.
    pub fn resolved_processors(&self) -> usize {
        if self.processors == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1)
        } else {
            self.processors
        }
    }
}

fn parse<T: std::str::FromStr>(
    value: &str,
    var: &'static str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(var, value, expected))
}

fn invalid(var: &'static str, value: &str, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        expected,
    }
}
