// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Monitor thread: fires expired sleep timers and I/O readiness.
//!
//! Blocks in the reactor until the earliest timer deadline or the poll
//! interval, whichever comes first. Arming an earlier timer or requesting
//! shutdown interrupts the wait through the reactor's eventfd.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::scheduler::Shared;

pub(crate) fn monitor_loop(shared: Arc<Shared>) {
    debug!("monitor started");
    let interval = shared.config.poll_interval;
    while !shared.is_shutdown() {
        let wait = shared
            .timers
            .next_timeout(Instant::now())
            .map_or(interval, |t| t.min(interval));

        match shared.reactor.poll_once(timeout_ms(wait)) {
            Ok(ready) => {
                for task in &ready {
                    shared.wake_from_event(task);
                }
                if !ready.is_empty() {
                    trace!(count = ready.len(), "i/o wakeups");
                }
            }
            Err(e) => {
                warn!(error = %e, "reactor poll failed");
                thread::sleep(Duration::from_millis(1));
            }
        }

        let due = shared.timers.expired(Instant::now());
        for task in &due {
            shared.wake_from_event(task);
        }
        if !due.is_empty() {
            trace!(count = due.len(), "timer wakeups");
        }
    }
    debug!("monitor stopped");
}

/// Round up so a timer is never polled for just before its deadline.
fn timeout_ms(wait: Duration) -> i32 {
    let ms = wait.as_nanos().div_ceil(1_000_000);
    i32::try_from(ms).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_rounds_up() {
        assert_eq!(timeout_ms(Duration::ZERO), 0);
        assert_eq!(timeout_ms(Duration::from_micros(1)), 1);
        assert_eq!(timeout_ms(Duration::from_millis(250)), 250);
        assert_eq!(timeout_ms(Duration::from_secs(u64::MAX)), i32::MAX);
    }
}
