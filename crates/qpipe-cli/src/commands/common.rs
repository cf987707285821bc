//! Shared helpers for CLI commands.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::{StyledObject, style};

use qpipe_hal::{ExecutorConfig, ExecutorInstance, ExecutorRegistry, PulseProgram, RawResult};
use qpipe_sched::{JobId, JobStatus, JobStore, MemoryStore, Priority, SqliteStore};

use crate::config::ServiceConfig;

/// Registry with every executor this build supports.
pub fn registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    qpipe_adapter_sim::register(&mut registry);
    #[cfg(feature = "bridge")]
    qpipe_adapter_bridge::register(&mut registry);
    registry
}

/// Build the configured executor.
pub fn create_executor(config: &ExecutorConfig) -> Result<Arc<ExecutorInstance>> {
    let executor = registry()
        .create(config.clone())
        .with_context(|| format!("Failed to create executor '{}'", config.backend))?;
    Ok(Arc::new(ExecutorInstance::new(executor)))
}

/// Open the configured job store.
pub fn open_store(config: &ServiceConfig) -> Result<Arc<dyn JobStore>> {
    match config.sqlite_path() {
        Some(path) => {
            let store = SqliteStore::new(&path).with_context(|| {
                format!("Failed to open job store at {}", path.display())
            })?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Open the SQLite job store for read-only commands.
pub fn open_durable_store(config: &ServiceConfig) -> Result<SqliteStore> {
    let path = config.sqlite_path().ok_or_else(|| {
        anyhow::anyhow!("The configured job store is in-memory; status and result need `store: {{type: sqlite}}`")
    })?;
    if !path.exists() {
        anyhow::bail!("No job store at {}", path.display());
    }
    SqliteStore::new(&path)
        .with_context(|| format!("Failed to open job store at {}", path.display()))
}

/// Load a pulse program from a JSON file.
pub fn load_program(path: &str) -> Result<PulseProgram> {
    let path_obj = Path::new(path);
    if !path_obj.exists() {
        anyhow::bail!("File not found: {path}");
    }

    let source =
        fs::read_to_string(path).with_context(|| format!("Failed to read file: {path}"))?;
    PulseProgram::from_json(&source).with_context(|| format!("Invalid pulse program: {path}"))
}

/// Parse a job ID argument.
pub fn parse_job_id(s: &str) -> Result<JobId> {
    JobId::parse(s).map_err(|e| anyhow::anyhow!("Invalid job ID '{s}': {e}"))
}

/// Parse a priority name or number.
pub fn parse_priority(s: &str) -> Result<Priority> {
    match s.to_lowercase().as_str() {
        "low" => Ok(Priority::LOW),
        "default" | "normal" => Ok(Priority::DEFAULT),
        "high" => Ok(Priority::HIGH),
        "critical" => Ok(Priority::CRITICAL),
        other => other.parse::<u32>().map(Priority::new).map_err(|_| {
            anyhow::anyhow!("Unknown priority '{other}'. Use low, default, high, critical or a number")
        }),
    }
}

/// Status name colored by outcome.
pub fn styled_status(status: JobStatus) -> StyledObject<&'static str> {
    let name = status.name();
    match status {
        JobStatus::Done => style(name).green(),
        JobStatus::Failed | JobStatus::Cancelled => style(name).red(),
        JobStatus::Registered | JobStatus::Preprocessing => style(name).yellow(),
        JobStatus::QueuedForExecution | JobStatus::Executing => style(name).cyan(),
    }
}

/// Print execution results in a table format (shared by run and result).
pub fn print_results(result: &RawResult) {
    println!(
        "\n{} Results from {} ({} shots):",
        style("✓").green().bold(),
        style(&result.backend).yellow(),
        result.shots
    );

    let sorted = result.counts.sorted();
    let total = result.counts.total_shots().max(1) as f64;

    for (bitstring, count) in sorted.iter().take(16) {
        let prob = **count as f64 / total * 100.0;
        let bar_len = (prob / 2.0).round() as usize;
        let bar: String = "█".repeat(bar_len);

        println!(
            "  {}: {:>6} ({:>5.2}%) {}",
            style(bitstring).cyan(),
            count,
            prob,
            style(bar).green()
        );
    }

    if sorted.len() > 16 {
        println!("  ... and {} more outcomes", sorted.len() - 16);
    }

    if let Some(time_ms) = result.execution_time_ms {
        println!("\n  Execution time: {} ms", style(time_ms).yellow());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_priority() {
        assert_eq!(parse_priority("low").unwrap(), Priority::LOW);
        assert_eq!(parse_priority("HIGH").unwrap(), Priority::HIGH);
        assert_eq!(parse_priority("175").unwrap(), Priority::new(175));
        assert!(parse_priority("urgent").is_err());
    }

    #[test]
    fn test_parse_job_id() {
        assert!(parse_job_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(parse_job_id("job-1").is_err());
    }

    #[test]
    fn test_registry_has_simulators() {
        let registry = registry();
        assert!(registry.has(qpipe_hal::ExecutorKind::SingleQubitSimulator));
        assert!(registry.has(qpipe_hal::ExecutorKind::TwoQubitSimulator));
    }

    #[test]
    fn test_load_missing_program() {
        let err = load_program("/nonexistent/program.json").unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[test]
    fn test_memory_store_selected() {
        let config = ServiceConfig::from_yaml("store:\n  type: memory\n").unwrap();
        assert!(open_store(&config).is_ok());
        assert!(open_durable_store(&config).is_err());
    }
}
