//! Status command implementation.
//!
//! Query job status from the durable job store.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use console::style;

use qpipe_sched::{JobFilter, JobStatus, JobStore};

use super::common::{open_durable_store, parse_job_id, styled_status};
use crate::config::ServiceConfig;

/// Execute the status command.
pub async fn execute(
    job_id: Option<&str>,
    all: bool,
    filter: Option<&str>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = ServiceConfig::load(config_path)?;
    let store = open_durable_store(&config)?;

    if all || filter.is_some() {
        let mut job_filter = JobFilter::default();
        if let Some(name) = filter {
            let status = JobStatus::from_name(&name.to_uppercase().replace('-', "_"))
                .ok_or_else(|| anyhow::anyhow!("Unknown status '{name}'"))?;
            job_filter = job_filter.with_status([status]);
        }

        let jobs = store
            .list(&job_filter)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list jobs: {e}"))?;

        if jobs.is_empty() {
            println!("No jobs found.");
            return Ok(());
        }

        println!("{} {} job(s):\n", style("→").cyan().bold(), jobs.len());
        println!(
            "  {:<36}  {:<20}  {:<20}  {:<8}  {}",
            style("JOB ID").bold(),
            style("NAME").bold(),
            style("STATUS").bold(),
            style("PRIO").bold(),
            style("SUBMITTED").bold()
        );
        println!("  {}", "-".repeat(108));

        for job in &jobs {
            println!(
                "  {:<36}  {:<20}  {:<20}  {:<8}  {}",
                style(job.id).dim(),
                job.name(),
                styled_status(job.status),
                job.priority.value(),
                local(job.timestamps.submitted),
            );
        }

        return Ok(());
    }

    let job_id_str = job_id
        .ok_or_else(|| anyhow::anyhow!("Please provide a job ID or use --all to list all jobs"))?;
    let parsed_id = parse_job_id(job_id_str)?;

    let job = store
        .get(&parsed_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get status: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Job not found: {job_id_str}"))?;

    println!(
        "{} Job {} status: {}",
        style("→").cyan().bold(),
        style(job_id_str).dim(),
        styled_status(job.status).bold()
    );
    println!("  Program: {}", job.name());
    if let Some(stage) = job.stage() {
        println!("  Stage: {}", style(stage).yellow());
    }
    println!("  Priority: {}", job.priority.value());
    println!("  Attempts: {}", job.attempts);
    println!("  Submitted: {}", local(job.timestamps.submitted));
    if let Some(started) = job.timestamps.execution_started {
        println!("  Started:   {}", local(started));
    }
    if let Some(completed) = job.timestamps.completed {
        println!("  Completed: {}", local(completed));
    }
    if let Some(ref error) = job.error {
        println!("  Error: {}", style(error).red());
    }
    if job.status.is_terminal() {
        println!("  Terminal: {}", style("yes").dim());
    }

    Ok(())
}

fn local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
