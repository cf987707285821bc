//! Run command implementation.
//!
//! Starts an in-process pipeline on the configured executor, submits every
//! program file, waits for the outcomes and prints them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use qpipe_sched::{
    DirectorySink, JobOutcome, Orchestrator, Pipeline, Submission, TopologyHint,
};

use super::common::{
    create_executor, load_program, open_store, parse_priority, print_results, styled_status,
};
use crate::config::ServiceConfig;

/// Execute the run command.
pub async fn execute(
    inputs: &[String],
    config_path: Option<&Path>,
    backend: Option<&str>,
    shots: Option<u32>,
    priority: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut config = ServiceConfig::load(config_path)?;
    if let Some(backend) = backend {
        config.executor.backend = backend.to_string();
    }
    let priority = priority.map(parse_priority).transpose()?.unwrap_or_default();

    // Load everything up front so a bad file fails before anything runs
    let mut programs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let mut program = load_program(input)?;
        if let Some(shots) = shots {
            program.shots = shots;
        }
        programs.push(program);
    }

    if !json {
        println!(
            "{} Running {} program(s) on {}",
            style("→").cyan().bold(),
            programs.len(),
            style(&config.executor.backend).yellow()
        );
    }

    let executor = create_executor(&config.executor)?;
    let store = open_store(&config)?;
    let mut orchestrator = Orchestrator::new(config.pipeline.clone(), executor, store)?;
    if let Some(ref dir) = config.sink {
        orchestrator = orchestrator.with_sink(Arc::new(DirectorySink::new(dir)))?;
    }
    orchestrator.start().await?;

    let mut jobs = Vec::with_capacity(programs.len());
    for (input, program) in inputs.iter().zip(programs) {
        let submission = Submission::new(program)
            .with_hint(TopologyHint::backend(config.executor.backend.clone()))
            .with_priority(priority);
        let job_id = orchestrator.submit(submission).await?;
        if !json {
            println!("  Submitted {} as {}", style(input).green(), style(job_id).dim());
        }
        jobs.push((input, job_id));
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    if json {
        spinner.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut outcomes = Vec::with_capacity(jobs.len());
    for (input, job_id) in &jobs {
        spinner.set_message(format!("Waiting for {input}..."));
        let outcome = orchestrator.wait(job_id).await;
        outcomes.push((*input, *job_id, outcome));
    }
    spinner.finish_and_clear();

    orchestrator.shutdown().await?;

    let mut failed = 0;
    let mut report = Vec::new();
    for (input, job_id, outcome) in outcomes {
        let outcome = outcome?;
        if !outcome.is_completed() {
            failed += 1;
        }

        if json {
            report.push(serde_json::json!({
                "input": input,
                "job_id": job_id.to_string(),
                "outcome": outcome,
            }));
            continue;
        }

        let job = orchestrator.job(&job_id).await?;
        println!(
            "\n{} {} [{}] {}",
            style("●").bold(),
            style(input).green(),
            styled_status(job.status).bold(),
            style(job_id).dim()
        );
        match outcome {
            JobOutcome::Completed(result) => {
                print_results(&result);
                if let Some(artifact) = job.artifact {
                    println!("  Stored at: {}", style(artifact).underlined());
                }
            }
            JobOutcome::Failed(error) => {
                println!(
                    "  {} {} error in {}: {}",
                    style("✗").red().bold(),
                    error.kind,
                    error.stage,
                    error.message
                );
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} job(s) failed", jobs.len());
    }
    Ok(())
}
