// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Help text for CLI commands.

use crate::output;

pub fn print_usage() {
    println!(
        "{} {} - cooperative M:N task runtime driver",
        output::title("Kestrel"),
        output::version(env!("CARGO_PKG_VERSION"))
    );
    println!();
    println!(
        "{}: {} {} {}",
        output::section_header("Usage"),
        output::command("kestrel"),
        output::arg("<command>"),
        output::arg("[options]")
    );
    println!();
    println!("{}", output::section_header("Commands:"));
    println!("  {}        Run the hello / running / good bye workload", output::command("demo"));
    println!("  {}       Measure sleep wakeup latency", output::command("sleep"));
    println!("  {}        Show this help", output::command("help"));
    println!("  {}     Show version", output::command("version"));
    println!();
    println!("{}", output::section_header("Options:"));
    println!("  {} {}   Processor threads (default: one per CPU)", output::arg("-p, --processors"), output::arg("<n>"));
    println!("  {} {}        Tasks to create (default: 8)", output::arg("-t, --tasks"), output::arg("<n>"));
    println!("  {} {}           Yields per task in demo (default: 3)", output::arg("--rounds"), output::arg("<n>"));
    println!("  {} {}               Sleep duration in sleep (default: 50)", output::arg("--ms"), output::arg("<n>"));
    println!("  {} {}       Task stack size in bytes (default: 262144)", output::arg("--stack-size"), output::arg("<n>"));
    println!("  {} {}          Idle poll interval in milliseconds", output::arg("--poll-ms"), output::arg("<n>"));
    println!("  {}                Print statistics as JSON", output::arg("--json"));
    println!("  {}               Only print the summary", output::arg("--quiet"));
    println!();
    println!("{}", output::section_header("Environment:"));
    println!("  {}   Same as --processors", output::arg("KESTREL_PROCESSORS"));
    println!("  {}   Same as --stack-size", output::arg("KESTREL_STACK_SIZE"));
    println!("  {}  Same as --poll-ms", output::arg("KESTREL_POLL_INTERVAL_MS"));
    println!("  {}          Log filter, e.g. {} (default: warn)", output::arg("KESTREL_LOG"), output::arg("kestrel_rt=debug"));
}
