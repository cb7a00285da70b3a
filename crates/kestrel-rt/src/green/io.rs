// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Blocking-style I/O for tasks on non-blocking descriptors.
//!
//! A task that would block registers its descriptor with the reactor and
//! suspends; the monitor thread resumes it when the descriptor is ready.
//! The processor keeps running other tasks meanwhile.
//!
//! Descriptors must be in non-blocking mode. One task may wait on a given
//! descriptor at a time.

use std::io;
use std::os::unix::io::RawFd;

use super::continuation::Switch;
use super::processor::{self, Here};
use super::reactor::Interest;
use super::scheduler::switch_out;
use super::task::TaskState;
use crate::error::fatal;

/// Suspend the current task until `fd` is readable.
pub fn wait_readable(fd: RawFd) -> io::Result<()> {
    wait(fd, Interest::Readable)
}

/// Suspend the current task until `fd` is writable.
pub fn wait_writable(fd: RawFd) -> io::Result<()> {
    wait(fd, Interest::Writable)
}

/// Suspend the current task until `fd` is ready for `interest`.
///
/// Returns early if the task is resumed explicitly; callers retry their
/// operation either way.
pub fn wait(fd: RawFd, interest: Interest) -> io::Result<()> {
    let Here::Task { shared, task, .. } = processor::here() else {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "I/O wait outside a task",
        ));
    };

    if let Err(state) = task.transition(TaskState::Running, TaskState::Suspend) {
        fatal(format_args!("{} waited on fd {} in state {:?}", task.id(), fd, state));
    }
    if let Err(e) = shared.reactor.register(fd, interest, task.clone()) {
        task.set_state(TaskState::Running);
        return Err(e);
    }
    drop(shared);
    switch_out(task, Switch::Suspend);

    // Woken by a resume rather than the descriptor: drop the stale entry.
    if let Here::Task { shared, task, .. } = processor::here() {
        shared.reactor.deregister(fd, &task)?;
    }
    Ok(())
}

/// Read into `buf`, suspending while `fd` has nothing to read.
pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => wait_readable(fd)?,
            _ => return Err(err),
        }
    }
}

/// Write from `buf`, suspending while `fd` cannot accept data.
pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => wait_writable(fd)?,
            _ => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_outside_task_is_an_error() {
        let err = wait_readable(0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn read_ready_pipe_without_suspending() {
        let mut fds = [0i32; 2];
        assert_eq!(
            unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) },
            0
        );
        assert_eq!(write(fds[1], b"hi").unwrap(), 2);
        let mut buf = [0u8; 8];
        assert_eq!(read(fds[0], &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
