//! Version command implementation.

use console::style;

/// Execute the version command.
pub fn execute() {
    let version = env!("CARGO_PKG_VERSION");

    println!(
        "{} {} - pulse-level job pipeline for quantum executors",
        style("qpipe").cyan().bold(),
        style(format!("v{version}")).yellow()
    );
    println!();
    println!("Components:");
    println!("  qpipe-hal             Pulse programs, translation and executor contract");
    println!("  qpipe-sched           Staged job pipeline and job store");
    println!("  qpipe-adapter-sim     Single- and two-qubit pulse simulators");
    #[cfg(feature = "bridge")]
    println!("  qpipe-adapter-bridge  HTTP bridge to instrument control servers");
    println!("  qpipe-cli             Command-line interface");
    println!();
    println!(
        "Repository: {}",
        style("https://github.com/qpipe-dev/qpipe").underlined()
    );
    println!("License:    {}", style("Apache-2.0").dim());
}
