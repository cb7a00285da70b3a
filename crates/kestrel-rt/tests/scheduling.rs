// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Scheduling order, id assignment, mutual exclusion and work stealing,
//! observed through the public runtime API.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use kestrel_rt::{yield_now, JoinError, Runtime, RuntimeConfig, TaskHandle};

fn config(processors: usize) -> RuntimeConfig {
    RuntimeConfig::default()
        .processors(processors)
        .stack_size(64 * 1024)
        .poll_interval(Duration::from_millis(10))
}

fn all_done<R: Send + 'static>(handles: &[TaskHandle<R>]) -> bool {
    handles.iter().all(|h| h.is_done())
}

/// Poll `cond` from a thread that is not driving any processor.
fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn round_robin_on_one_processor() {
    let rt = Runtime::init(config(1)).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = ["A", "B", "C"]
        .into_iter()
        .map(|name| {
            let log = log.clone();
            rt.create(
                move |name: &'static str| {
                    for _ in 0..3 {
                        log.lock().unwrap().push(name);
                        yield_now();
                    }
                },
                name,
            )
            .unwrap()
        })
        .collect();

    rt.run_until(|| all_done(&handles)).unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["A", "B", "C", "A", "B", "C", "A", "B", "C"]
    );
}

#[test]
fn local_deque_is_fifo() {
    let rt = Runtime::init(config(1)).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let order = order.clone();
            rt.create(move |i: usize| order.lock().unwrap().push(i), i)
                .unwrap()
        })
        .collect();

    // Processor 0 yielding from outside any task drains its own deque.
    yield_now();
    assert!(all_done(&handles));
    assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
}

#[test]
fn task_ids_strictly_increase() {
    let rt = Runtime::init(config(2)).unwrap();
    let ids: Vec<u64> = (0..10)
        .map(|_| rt.create(|()| (), ()).unwrap().id().as_u64())
        .collect();

    // Idle tasks took 1 and 2.
    assert_eq!(ids[0], 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    // Tasks created from inside tasks draw from the same counter.
    let parent = rt
        .create(
            |()| {
                let a = kestrel_rt::create(|()| (), ()).unwrap().id();
                let b = kestrel_rt::create(|()| (), ()).unwrap().id();
                (kestrel_rt::current_task_id().unwrap(), a, b)
            },
            (),
        )
        .unwrap();
    let parent_id = parent.id();
    rt.run_until(|| parent.is_done()).unwrap();
    let (me, a, b) = parent.join().unwrap();
    assert_eq!(me, parent_id);
    assert!(me.as_u64() > ids[9]);
    assert!(me < a && a < b);
}

#[test]
fn no_task_runs_on_two_processors() {
    let rt = Runtime::init(config(4)).unwrap();
    let violations = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let violations = violations.clone();
            let running = Arc::new(AtomicBool::new(false));
            rt.create(
                move |()| {
                    for _ in 0..200 {
                        if running.swap(true, Ordering::SeqCst) {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        std::hint::spin_loop();
                        running.store(false, Ordering::SeqCst);
                        yield_now();
                    }
                },
                (),
            )
            .unwrap()
        })
        .collect();

    rt.run_until(|| all_done(&handles)).unwrap();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[test]
fn idle_processor_steals_half_and_leaves_the_last_one() {
    let rt = Runtime::init(config(2)).unwrap();
    let ran_on = Arc::new(Mutex::new(Vec::new()));

    // Processor 0 is not driven, so only processor 1 can make progress,
    // and only by stealing.
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ran_on = ran_on.clone();
            rt.create(
                move |()| {
                    ran_on
                        .lock()
                        .unwrap()
                        .push(kestrel_rt::current_processor_id().unwrap());
                },
                (),
            )
            .unwrap()
        })
        .collect();

    // 4 + 2 + 1 stolen; a deque of one is never stolen from.
    assert!(wait_for(|| ran_on.lock().unwrap().len() == 7));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(ran_on.lock().unwrap().len(), 7);
    assert!(ran_on.lock().unwrap().iter().all(|&p| p == 1));

    rt.run_until(|| all_done(&handles)).unwrap();
    let ran_on = ran_on.lock().unwrap();
    assert_eq!(ran_on.len(), 8);
    assert_eq!(ran_on.last(), Some(&0));

    let stats = rt.stats();
    assert_eq!(stats.processors[1].stolen, 7);
    assert_eq!(stats.processors[1].completed, 7);
    assert_eq!(stats.processors[0].completed, 1);
}

#[test]
fn external_creates_go_through_global_deque() {
    let rt = Arc::new(Runtime::init(config(2)).unwrap());
    let remote = rt.clone();
    let handle = thread::spawn(move || {
        remote
            .create(|()| kestrel_rt::current_processor_id(), ())
            .unwrap()
    })
    .join()
    .unwrap();

    // Processor 1 drains the global deque without processor 0's help.
    assert!(wait_for(|| handle.is_done()));
    assert_eq!(handle.join().unwrap(), Some(1));
    assert_eq!(rt.stats().processors[1].drained, 1);
}

#[test]
fn panicking_task_does_not_stop_the_processor() {
    let rt = Runtime::init(config(1)).unwrap();
    let bad = rt.create(|()| -> u32 { panic!("bad task") }, ()).unwrap();
    let good = rt.create(|x: u32| x * 3, 14).unwrap();
    rt.run_until(|| bad.is_done() && good.is_done()).unwrap();
    assert_eq!(bad.join(), Err(JoinError::Panicked("bad task".to_string())));
    assert_eq!(good.join(), Ok(42));
}

#[test]
fn panic_is_contained_with_default_stacks() {
    let rt = Runtime::init(RuntimeConfig::default().processors(2)).unwrap();
    assert_eq!(rt.config().stack_size, kestrel_rt::DEFAULT_STACK_SIZE);
    let bad = rt.create(|()| -> u32 { panic!("x") }, ()).unwrap();
    rt.run_until(|| bad.is_done()).unwrap();
    assert_eq!(bad.join(), Err(JoinError::Panicked("x".to_string())));

    // The processor that caught it keeps scheduling.
    let after = rt.create(|n: u32| n + 1, 1).unwrap();
    rt.run_until(|| after.is_done()).unwrap();
    assert_eq!(after.join(), Ok(2));
}

#[test]
fn run_until_returns_while_another_task_keeps_yielding() {
    let rt = Runtime::init(config(1)).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let spinner = {
        let stop = stop.clone();
        rt.create(
            move |()| {
                let mut spins = 0u64;
                while !stop.load(Ordering::SeqCst) {
                    yield_now();
                    spins += 1;
                }
                spins
            },
            (),
        )
        .unwrap()
    };
    let quick = rt.create(|()| 5u8, ()).unwrap();

    rt.run_until(|| quick.is_done()).unwrap();
    assert!(!spinner.is_done());
    assert_eq!(quick.join(), Ok(5));

    stop.store(true, Ordering::SeqCst);
    rt.run_until(|| spinner.is_done()).unwrap();
    assert!(spinner.join().unwrap() >= 1);
}

#[test]
fn user_data_follows_the_task() {
    let rt = Runtime::init(config(2)).unwrap();
    let handle = rt
        .create_with_data(
            |()| {
                let before = kestrel_rt::user_data_as::<String>().map(|s| s.to_string());
                yield_now();
                kestrel_rt::set_user_data(7u64).unwrap();
                yield_now();
                (before, kestrel_rt::user_data_as::<u64>().map(|v| *v))
            },
            (),
            Some(Arc::new("hello".to_string())),
        )
        .unwrap();
    rt.run_until(|| handle.is_done()).unwrap();
    assert_eq!(
        handle.join().unwrap(),
        (Some("hello".to_string()), Some(7))
    );
    // The idle task's slot is separate.
    assert!(kestrel_rt::user_data().is_none());
}

#[test]
fn stats_count_switches() {
    let rt = Runtime::init(config(1)).unwrap();
    let handle = rt
        .create(
            |()| {
                yield_now();
                yield_now();
            },
            (),
        )
        .unwrap();
    rt.run_until(|| handle.is_done()).unwrap();
    let stats = rt.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.processors[0].dispatched, 3);
    assert_eq!(stats.processors[0].yields, 2);
    assert_eq!(stats.processors[0].completed, 1);
}
