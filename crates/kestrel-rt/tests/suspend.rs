// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Sleep, explicit resume, descriptor waits and shutdown.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kestrel_rt::{Runtime, RuntimeConfig, RuntimeError, TaskState};

fn config(processors: usize) -> RuntimeConfig {
    RuntimeConfig::default()
        .processors(processors)
        .stack_size(64 * 1024)
        .poll_interval(Duration::from_millis(10))
}

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0i32; 2];
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
    assert_eq!(ret, 0);
    (fds[0], fds[1])
}

#[test]
fn sleep_round_trip_resumes_once() {
    let rt = Runtime::init(config(2)).unwrap();
    let handle = rt
        .create(
            |()| {
                let start = Instant::now();
                kestrel_rt::sleep(Duration::from_millis(100));
                start.elapsed()
            },
            (),
        )
        .unwrap();
    let task = handle.task_ref();

    rt.run_until(|| handle.is_done()).unwrap();
    let slept = handle.join().unwrap();
    assert!(slept >= Duration::from_millis(100), "slept {:?}", slept);
    assert!(slept < Duration::from_secs(2), "slept {:?}", slept);
    assert_eq!(task.wakeups(), 1);
    assert_eq!(rt.stats().timers, 0);
}

#[test]
fn zero_sleep_only_yields() {
    let rt = Runtime::init(config(1)).unwrap();
    let handle = rt
        .create(
            |()| {
                kestrel_rt::sleep_ms(0);
                kestrel_rt::current_task().unwrap().wakeups()
            },
            (),
        )
        .unwrap();
    rt.run_until(|| handle.is_done()).unwrap();
    assert_eq!(handle.join().unwrap(), 0);
    assert_eq!(rt.stats().processors[0].yields, 1);
}

#[test]
fn sleeping_tasks_wake_in_deadline_order() {
    let rt = Runtime::init(config(1)).unwrap();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let handles: Vec<_> = [60u64, 20, 40]
        .into_iter()
        .map(|ms| {
            let order = order.clone();
            rt.create(
                move |ms: u64| {
                    kestrel_rt::sleep_ms(ms as i64);
                    order.lock().unwrap().push(ms);
                },
                ms,
            )
            .unwrap()
        })
        .collect();
    rt.run_until(|| handles.iter().all(|h| h.is_done())).unwrap();
    assert_eq!(*order.lock().unwrap(), vec![20, 40, 60]);
}

#[test]
fn indefinite_suspend_until_resume() {
    let rt = Runtime::init(config(2)).unwrap();
    let sleeper = rt
        .create(
            |()| {
                kestrel_rt::sleep_ms(-1);
                "woken"
            },
            (),
        )
        .unwrap();
    let task = sleeper.task_ref();

    rt.run_until(|| task.state() == TaskState::Suspend).unwrap();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(task.state(), TaskState::Suspend);

    rt.resume(&task).unwrap();
    rt.run_until(|| sleeper.is_done()).unwrap();
    assert_eq!(sleeper.join().unwrap(), "woken");
    assert_eq!(task.wakeups(), 1);
}

#[test]
fn task_resumes_another_task() {
    let rt = Runtime::init(config(2)).unwrap();
    let sleeper = rt
        .create(
            |()| {
                kestrel_rt::suspend();
                kestrel_rt::current_processor_id().is_some()
            },
            (),
        )
        .unwrap();
    let target = sleeper.task_ref();
    let waker = rt
        .create(
            move |()| {
                while target.state() != TaskState::Suspend {
                    kestrel_rt::yield_now();
                }
                kestrel_rt::resume(&target)
            },
            (),
        )
        .unwrap();

    rt.run_until(|| sleeper.is_done() && waker.is_done()).unwrap();
    assert!(waker.join().unwrap().is_ok());
    assert!(sleeper.join().unwrap());
}

#[test]
fn resume_cuts_a_sleep_short() {
    let rt = Runtime::init(config(1)).unwrap();
    let sleeper = rt
        .create(
            |()| {
                let start = Instant::now();
                kestrel_rt::sleep(Duration::from_secs(30));
                start.elapsed()
            },
            (),
        )
        .unwrap();
    let task = sleeper.task_ref();
    rt.run_until(|| task.state() == TaskState::Suspend).unwrap();
    rt.resume(&task).unwrap();
    rt.run_until(|| sleeper.is_done()).unwrap();
    assert!(sleeper.join().unwrap() < Duration::from_secs(5));
    // The outlived timer never fires a second wakeup.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(task.wakeups(), 1);
}

#[test]
fn resume_from_another_runtime_is_rejected() {
    let rt = Runtime::init(config(1)).unwrap();
    let sleeper = rt.create(|()| kestrel_rt::suspend(), ()).unwrap();
    let task = sleeper.task_ref();
    rt.run_until(|| task.state() == TaskState::Suspend).unwrap();

    let foreign = thread::spawn(move || {
        let other = Runtime::init(config(1)).unwrap();
        other.resume(&task).map_err(|e| e.to_string())
    })
    .join()
    .unwrap();
    assert!(foreign.unwrap_err().contains("different runtime"));

    rt.resume(&sleeper.task_ref()).unwrap();
    rt.run_until(|| sleeper.is_done()).unwrap();
}

#[test]
fn pipe_read_suspends_until_data_arrives() {
    let rt = Runtime::init(config(2)).unwrap();
    let (read_fd, write_fd) = pipe();

    let reader = rt
        .create(
            move |fd: RawFd| {
                let mut buf = [0u8; 16];
                let n = kestrel_rt::io::read(fd, &mut buf).unwrap();
                buf[..n].to_vec()
            },
            read_fd,
        )
        .unwrap();
    let writer = rt
        .create(
            move |fd: RawFd| {
                kestrel_rt::sleep(Duration::from_millis(20));
                kestrel_rt::io::write(fd, b"ping").unwrap()
            },
            write_fd,
        )
        .unwrap();

    rt.run_until(|| reader.is_done() && writer.is_done()).unwrap();
    assert_eq!(writer.join().unwrap(), 4);
    assert_eq!(reader.join().unwrap(), b"ping".to_vec());
    assert_eq!(rt.stats().io_waiters, 0);
    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

#[test]
fn shutdown_is_idempotent_and_prompt() {
    // Default one-second poll interval: parked threads must be woken.
    let rt = Runtime::init(
        RuntimeConfig::default()
            .processors(3)
            .stack_size(64 * 1024),
    )
    .unwrap();
    thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    rt.shutdown();
    rt.shutdown();
    assert!(rt.is_shutdown());
    rt.run().unwrap();
    drop(rt);
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn task_can_request_shutdown() {
    let rt = Runtime::init(config(2)).unwrap();
    rt.create(|()| kestrel_rt::shutdown(), ()).unwrap();
    rt.run().unwrap();
    assert!(rt.is_shutdown());
}

#[test]
fn drop_unwinds_suspended_tasks() {
    struct Flag(Arc<AtomicBool>);
    impl Drop for Flag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    let dropped = Arc::new(AtomicBool::new(false));
    let rt = Runtime::init(config(1)).unwrap();
    let flag = Flag(dropped.clone());
    let handle = rt
        .create(
            move |()| {
                let _flag = flag;
                kestrel_rt::suspend();
            },
            (),
        )
        .unwrap();
    let task = handle.task_ref();
    rt.run_until(|| task.state() == TaskState::Suspend).unwrap();
    assert!(!dropped.load(Ordering::SeqCst));
    drop(rt);
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn other_threads_are_not_bound() {
    let _rt = Runtime::init(config(1)).unwrap();
    let unbound = thread::spawn(|| {
        matches!(kestrel_rt::shutdown(), Err(RuntimeError::NoRuntime))
            && kestrel_rt::current_processor_id().is_none()
    })
    .join()
    .unwrap();
    assert!(unbound);
}
