//! Backends command implementation.

use anyhow::Result;
use console::style;

use qpipe_hal::{ExecutorConfig, ExecutorKind};

use super::common::registry;

/// Execute the backends command.
pub fn execute() -> Result<()> {
    println!("{} Available executors:\n", style("qpipe").cyan().bold());

    let registry = registry();
    for kind in ExecutorKind::ALL {
        if !registry.has(kind) {
            println!(
                "  {} {} (not built)",
                style("○").dim(),
                style(kind.key()).dim()
            );
            println!("    Rebuild with the `bridge` feature to enable");
            println!();
            continue;
        }

        if !kind.is_simulator() {
            println!("  {} {} (remote)", style("○").yellow(), style(kind.key()).bold());
            println!("    Set `executor.endpoint` and `executor.topology` to enable");
            println!();
            continue;
        }

        let executor = registry.create(ExecutorConfig::new(kind.key()))?;
        let caps = executor.capabilities();
        println!(
            "  {} {} (local)",
            style("●").green(),
            style(kind.key()).bold()
        );
        println!("    Qubits: {}", caps.num_qubits);
        println!("    Max shots: {}", caps.max_shots);
        println!("    Pulse shapes: {}", caps.pulse_shapes.join(", "));
        println!(
            "    Channels: {}",
            executor
                .topology()
                .channels
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!();
    }

    Ok(())
}
