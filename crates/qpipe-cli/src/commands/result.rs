//! Result command implementation.

use std::path::Path;

use anyhow::Result;
use console::style;

use qpipe_sched::{JobStatus, JobStore};

use super::common::{open_durable_store, parse_job_id, print_results};
use crate::config::ServiceConfig;

/// Execute the result command.
pub async fn execute(job_id: &str, format: &str, config_path: Option<&Path>) -> Result<()> {
    let config = ServiceConfig::load(config_path)?;
    let store = open_durable_store(&config)?;
    let parsed_id = parse_job_id(job_id)?;

    let job = store
        .get(&parsed_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load job: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Job not found: {job_id}"))?;

    match job.status {
        JobStatus::Done => {}
        JobStatus::Failed => {
            let reason = job
                .error
                .map_or_else(|| "unknown error".to_string(), |e| e.to_string());
            anyhow::bail!("Job {job_id} failed: {reason}");
        }
        JobStatus::Cancelled => anyhow::bail!("Job {job_id} was cancelled"),
        status => anyhow::bail!("Job {job_id} has no result yet (status: {status})"),
    }

    let result = job
        .result
        .ok_or_else(|| anyhow::anyhow!("Job {job_id} is DONE but has no stored result"))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "table" => {
            println!(
                "{} Job {} ({})",
                style("→").cyan().bold(),
                style(job_id).dim(),
                job.program.name
            );
            print_results(&result);
            if let Some(artifact) = job.artifact {
                println!("  Stored at: {}", style(artifact).underlined());
            }
        }
        other => anyhow::bail!("Unknown format '{other}'. Use table or json"),
    }

    Ok(())
}
