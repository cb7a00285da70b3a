// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Reactor: epoll-based I/O readiness for suspended tasks.
//!
//! Polled only by the monitor thread. Registrations are one-shot: when a
//! descriptor becomes ready its task is handed back for resume and the
//! descriptor is removed from the epoll set.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use tracing::warn;

use super::task::Task;

/// I/O interest for reactor registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
    ReadWrite,
}

impl Interest {
    fn to_epoll_events(self) -> u32 {
        match self {
            Interest::Readable => libc::EPOLLIN as u32,
            Interest::Writable => libc::EPOLLOUT as u32,
            Interest::ReadWrite => (libc::EPOLLIN | libc::EPOLLOUT) as u32,
        }
    }
}

/// The task parked on a descriptor.
struct Registration {
    task: Arc<Task>,
}

/// Level-triggered epoll reactor with an eventfd to interrupt the wait.
pub(crate) struct Reactor {
    epoll_fd: RawFd,
    /// Eventfd for waking the monitor (new timers, shutdown).
    wake_fd: RawFd,
    registrations: Mutex<HashMap<RawFd, Registration>>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_fd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll_fd) };
            return Err(err);
        }

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: wake_fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, wake_fd, &mut ev) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(wake_fd);
                libc::close(epoll_fd);
            }
            return Err(err);
        }

        Ok(Self {
            epoll_fd,
            wake_fd,
            registrations: Mutex::new(HashMap::new()),
        })
    }

    /// Park `task` on `fd` until it is ready for `interest`.
    ///
    /// One task per descriptor; a second registration is rejected with
    /// `AlreadyExists` instead of silently stranding the first waiter.
    pub fn register(&self, fd: RawFd, interest: Interest, task: Arc<Task>) -> io::Result<()> {
        let mut regs = self.registrations.lock().unwrap();
        if regs.contains_key(&fd) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("fd {} already has a waiting task", fd),
            ));
        }

        let mut ev = libc::epoll_event {
            events: interest.to_epoll_events(),
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        regs.insert(fd, Registration { task });
        Ok(())
    }

    /// Drop `task`'s registration on `fd`, if it still has one.
    ///
    /// A task woken by something other than its descriptor leaves a stale
    /// registration behind; another task's registration is left alone.
    pub fn deregister(&self, fd: RawFd, task: &Arc<Task>) -> io::Result<bool> {
        let mut regs = self.registrations.lock().unwrap();
        match regs.get(&fd) {
            Some(reg) if Arc::ptr_eq(&reg.task, task) => {
                regs.remove(&fd);
                self.epoll_del(fd)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn epoll_del(&self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // ENOENT / EBADF are expected if the fd was already closed.
            if err.raw_os_error() != Some(libc::ENOENT) && err.raw_os_error() != Some(libc::EBADF)
            {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Run one poll cycle, blocking up to `timeout_ms`.
    ///
    /// Returns the tasks whose descriptors became ready. The caller resumes
    /// them; doing it here would hold the registration lock across resume.
    pub fn poll_once(&self, timeout_ms: i32) -> io::Result<Vec<Arc<Task>>> {
        const MAX_EVENTS: usize = 64;
        let mut events: [libc::epoll_event; MAX_EVENTS] =
            [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];

        let n = unsafe {
            libc::epoll_wait(self.epoll_fd, events.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms)
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut ready = Vec::new();
        let mut regs = self.registrations.lock().unwrap();
        for ev in events.iter().take(n as usize) {
            let fd = ev.u64 as RawFd;

            if fd == self.wake_fd {
                let mut buf = [0u8; 8];
                unsafe {
                    libc::read(self.wake_fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
                }
                continue;
            }

            if let Some(reg) = regs.remove(&fd) {
                // The task is handed back either way; it re-registers if it
                // still has to wait.
                if let Err(e) = self.epoll_del(fd) {
                    warn!(fd, error = %e, "failed to remove ready descriptor from epoll");
                }
                ready.push(reg.task);
            }
        }
        Ok(ready)
    }

    /// Interrupt a blocked `poll_once`.
    pub fn wake(&self) {
        let val: u64 = 1;
        unsafe {
            libc::write(self.wake_fd, &val as *const u64 as *const libc::c_void, 8);
        }
    }

    pub fn registered(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }

    /// Forget every registration. Used at teardown to release tasks.
    pub fn clear(&self) {
        let mut regs = self.registrations.lock().unwrap();
        for &fd in regs.keys() {
            let _ = self.epoll_del(fd);
        }
        regs.clear();
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.clear();
        unsafe {
            libc::close(self.wake_fd);
            libc::close(self.epoll_fd);
        }
    }
}
