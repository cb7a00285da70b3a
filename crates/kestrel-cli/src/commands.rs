// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Workload commands: demo, sleep.

use std::time::{Duration, Instant};

use colored::Colorize;
use kestrel_rt::{Runtime, RuntimeStats, TaskHandle};
use serde_json::json;

use crate::{output, Format, Options};

/// Each task says hello, yields `rounds` times and says good bye.
pub fn cmd_demo(opts: &Options) -> i32 {
    let Some(rt) = start(opts) else {
        return 1;
    };
    let verbose = opts.format == Format::Human && !opts.quiet;
    let rounds = opts.rounds;

    let started = Instant::now();
    let Some(handles) = spawn_all(&rt, opts.tasks, move |n| demo_task(n, rounds, verbose)) else {
        return 1;
    };
    let Some(results) = finish(&rt, handles) else {
        return 1;
    };
    let elapsed = started.elapsed();

    let failed = results.iter().filter(|r| r.is_err()).count();
    let stats = rt.stats();
    match opts.format {
        Format::Json => {
            let report = json!({
                "command": "demo",
                "tasks": opts.tasks,
                "rounds": rounds,
                "failed": failed,
                "elapsed_us": elapsed.as_micros() as u64,
                "stats": stats,
            });
            println!("{}", report);
        }
        Format::Human => {
            println!();
            print_stats(&stats);
            println!(
                "\n{} tasks in {:.2?}",
                opts.tasks,
                elapsed
            );
            print_banner("Demo", failed);
        }
    }
    if failed > 0 {
        1
    } else {
        0
    }
}

fn demo_task(n: usize, rounds: usize, verbose: bool) -> usize {
    let id = kestrel_rt::current_task_id().map_or(0, |t| t.as_u64());
    let here = || kestrel_rt::current_processor_id().unwrap_or(0);
    if verbose {
        println!("{} from {} on {}", output::hello(), output::task(id), output::processor(here()));
    }
    for round in 0..rounds {
        kestrel_rt::yield_now();
        if verbose {
            println!(
                "{} {} on {} ({}/{})",
                output::task(id),
                output::running(),
                output::processor(here()),
                round + 1,
                rounds
            );
        }
    }
    if verbose {
        println!("{} from {}", output::good_bye(), output::task(id));
    }
    n
}

/// Every task sleeps for `--ms`; reports how late each one woke up.
pub fn cmd_sleep(opts: &Options) -> i32 {
    let Some(rt) = start(opts) else {
        return 1;
    };
    let target = Duration::from_millis(opts.millis);

    let started = Instant::now();
    let Some(handles) = spawn_all(&rt, opts.tasks, move |_| {
        let t0 = Instant::now();
        kestrel_rt::sleep(target);
        t0.elapsed()
    }) else {
        return 1;
    };
    let Some(results) = finish(&rt, handles) else {
        return 1;
    };
    let elapsed = started.elapsed();

    let slept: Vec<Duration> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    let failed = results.len() - slept.len();
    let late: Vec<u64> = slept
        .iter()
        .map(|d| d.saturating_sub(target).as_micros() as u64)
        .collect();
    let early = slept.iter().filter(|d| **d < target).count();
    let min = late.iter().copied().min().unwrap_or(0);
    let max = late.iter().copied().max().unwrap_or(0);
    let avg = if late.is_empty() {
        0
    } else {
        late.iter().sum::<u64>() / late.len() as u64
    };

    let stats = rt.stats();
    match opts.format {
        Format::Json => {
            let report = json!({
                "command": "sleep",
                "tasks": opts.tasks,
                "sleep_ms": opts.millis,
                "failed": failed,
                "woke_early": early,
                "late_us": { "min": min, "avg": avg, "max": max },
                "elapsed_us": elapsed.as_micros() as u64,
                "stats": stats,
            });
            println!("{}", report);
        }
        Format::Human => {
            print_stats(&stats);
            println!(
                "\n{} tasks slept {} ms; woke late by min {} us, avg {} us, max {} us",
                opts.tasks, opts.millis, min, avg, max
            );
            if early > 0 {
                println!("{}: {} tasks woke early", output::error_label(), early);
            }
            print_banner("Sleep", failed + early);
        }
    }
    if failed + early > 0 {
        1
    } else {
        0
    }
}

fn start(opts: &Options) -> Option<Runtime> {
    match Runtime::init(opts.config.clone()) {
        Ok(rt) => Some(rt),
        Err(e) => {
            eprintln!("{}: failed to start runtime: {}", output::error_label(), e);
            None
        }
    }
}

fn spawn_all<R, F>(rt: &Runtime, tasks: usize, body: F) -> Option<Vec<TaskHandle<R>>>
where
    R: Send + 'static,
    F: Fn(usize) -> R + Clone + Send + 'static,
{
    let mut handles = Vec::with_capacity(tasks);
    for n in 0..tasks {
        match rt.create(body.clone(), n) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                eprintln!("{}: task {}: {}", output::error_label(), n, e);
                return None;
            }
        }
    }
    Some(handles)
}

/// Drive processor 0 until every task is done, then collect results.
fn finish<R: Send + 'static>(
    rt: &Runtime,
    handles: Vec<TaskHandle<R>>,
) -> Option<Vec<Result<R, kestrel_rt::JoinError>>> {
    if let Err(e) = rt.run_until(|| handles.iter().all(|h| h.is_done())) {
        eprintln!("{}: {}", output::error_label(), e);
        return None;
    }
    let results: Vec<_> = handles
        .into_iter()
        .map(|h| {
            let id = h.id();
            let result = h.join();
            if let Err(e) = &result {
                eprintln!("{}: {}: {}", output::error_label(), id, e);
            }
            result
        })
        .collect();
    Some(results)
}

fn print_stats(stats: &RuntimeStats) {
    let header = format!(
        "{:>4} {:>10} {:>8} {:>8} {:>9} {:>7} {:>7}",
        "proc", "dispatched", "yields", "suspends", "completed", "stolen", "drained"
    );
    println!("{}", output::column(&header));
    println!("{}", output::separator(header.chars().count()));
    for p in &stats.processors {
        println!(
            "{:>4} {:>10} {:>8} {:>8} {:>9} {:>7} {:>7}",
            output::processor(p.id),
            output::count(p.dispatched),
            output::count(p.yields),
            output::count(p.suspends),
            output::count(p.completed),
            output::count(p.stolen),
            output::count(p.drained),
        );
    }
    println!(
        "{} created, {} live",
        stats.created.to_string().bold(),
        stats.live
    );
}

fn print_banner(phase: &str, failed: usize) {
    if failed == 0 {
        println!("{}", output::banner_ok(phase));
    } else {
        println!("{}", output::banner_fail(phase, failed));
    }
}
