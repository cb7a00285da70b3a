// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Kestrel CLI - drives demo workloads on the kestrel runtime.

mod commands;
mod help;
mod output;

use std::env;
use std::process;

use kestrel_rt::RuntimeConfig;
use tracing_subscriber::EnvFilter;

use help::print_usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Human,
    Json,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub config: RuntimeConfig,
    pub tasks: usize,
    pub rounds: usize,
    pub millis: u64,
    pub format: Format,
    pub quiet: bool,
}

fn main() {
    output::init();
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "demo" => {
            let opts = parse_options_or_exit(&args[2..]);
            process::exit(commands::cmd_demo(&opts));
        }
        "sleep" => {
            let opts = parse_options_or_exit(&args[2..]);
            process::exit(commands::cmd_sleep(&opts));
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        "version" | "--version" | "-V" => {
            println!("kestrel {}", env!("CARGO_PKG_VERSION"));
        }
        other => {
            eprintln!("{}: unknown command: {}", output::error_label(), other);
            print_usage();
            process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KESTREL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_options_or_exit(args: &[String]) -> Options {
    match parse_options(args) {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("{}: {}", output::error_label(), msg);
            eprintln!("{}: run `kestrel help` for usage", output::hint_label());
            process::exit(2);
        }
    }
}

/// Flags override the environment, which overrides the defaults.
pub fn parse_options(args: &[String]) -> Result<Options, String> {
    let config = RuntimeConfig::from_env().map_err(|e| e.to_string())?;

    let mut opts = Options {
        config,
        tasks: 8,
        rounds: 3,
        millis: 50,
        format: Format::Human,
        quiet: false,
    };

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--json" => opts.format = Format::Json,
            "-q" | "--quiet" => opts.quiet = true,
            "-p" | "--processors" | "-t" | "--tasks" | "--rounds" | "--ms" | "--stack-size"
            | "--poll-ms" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| format!("{} requires a value", flag))?;
                let n: u64 = value
                    .parse()
                    .map_err(|_| format!("{} expects a number, got {:?}", flag, value))?;
                match flag {
                    "-p" | "--processors" => {
                        opts.config = opts.config.processors(n as usize);
                    }
                    "-t" | "--tasks" => opts.tasks = n as usize,
                    "--rounds" => opts.rounds = n as usize,
                    "--ms" => opts.millis = n,
                    "--stack-size" => {
                        opts.config = opts.config.stack_size(n as usize);
                    }
                    _ => {
                        if n == 0 {
                            return Err("--poll-ms must be at least 1".to_string());
                        }
                        opts.config = opts
                            .config
                            .poll_interval(std::time::Duration::from_millis(n));
                    }
                }
            }
            other => return Err(format!("unknown option: {}", other)),
        }
        i += 1;
    }
    Ok(opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_override_defaults() {
        let opts = parse_options(&args(&["-p", "3", "--tasks", "5", "--json", "--ms", "7"])).unwrap();
        assert_eq!(opts.config.processors, 3);
        assert_eq!(opts.tasks, 5);
        assert_eq!(opts.millis, 7);
        assert_eq!(opts.format, Format::Json);
        assert!(!opts.quiet);
    }

    #[test]
    fn missing_and_bad_values_are_errors() {
        assert!(parse_options(&args(&["--tasks"])).unwrap_err().contains("requires a value"));
        assert!(parse_options(&args(&["-p", "many"])).unwrap_err().contains("expects a number"));
        assert!(parse_options(&args(&["--poll-ms", "0"])).is_err());
        assert!(parse_options(&args(&["--frobnicate"])).unwrap_err().contains("unknown option"));
    }
}
