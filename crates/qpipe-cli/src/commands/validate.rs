//! Validate command implementation.
//!
//! Checks a program's shape and translates it for the configured executor
//! without submitting anything.

use std::path::Path;

use anyhow::Result;
use console::style;

use qpipe_hal::ValidationResult;

use super::common::{create_executor, load_program};
use crate::config::ServiceConfig;

/// Execute the validate command.
pub fn execute(input: &str, config_path: Option<&Path>, backend: Option<&str>) -> Result<()> {
    let mut config = ServiceConfig::load(config_path)?;
    if let Some(backend) = backend {
        config.executor.backend = backend.to_string();
    }

    println!(
        "{} Validating {} for {}",
        style("→").cyan().bold(),
        style(input).green(),
        style(&config.executor.backend).yellow()
    );

    let program = load_program(input)?;
    if let ValidationResult::Invalid { reasons } = program.validate() {
        for reason in &reasons {
            println!("  {} {}", style("✗").red(), reason);
        }
        anyhow::bail!("Program '{}' is malformed", program.name);
    }

    println!(
        "  Program: {} ({} instructions, {} channels, {} shots)",
        style(&program.name).bold(),
        program.instruction_count(),
        program.channels.len(),
        program.shots
    );

    let executor = create_executor(&config.executor)?;
    let experiment = executor
        .compile(&program)
        .map_err(|e| anyhow::anyhow!("Translation failed: {e}"))?;

    println!(
        "\n{} Native experiment for {}:",
        style("✓").green().bold(),
        style(executor.name()).yellow()
    );
    println!(
        "  {:<8}  {:<16}  {}",
        style("CHANNEL").bold(),
        style("INSTRUMENT").bold(),
        style("INSTRUCTIONS").bold()
    );
    for (name, channel) in &experiment.channels {
        println!(
            "  {:<8}  {:<16}  {}",
            style(name).cyan(),
            channel.address.to_string(),
            channel.instructions.len()
        );
    }
    println!();
    println!("  Waveforms:     {}", experiment.waveforms.len());
    println!("  Memory slots:  {}", experiment.memory_slots);
    println!("  Shot duration: {} ns", style(experiment.duration_ns).yellow());

    Ok(())
}
