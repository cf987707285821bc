//! qpipe Command-Line Interface
//!
//! Runs pulse programs through the staged job pipeline and inspects the
//! job store they leave behind.
//!
//! ```text
//!   program.json ──► intake ──► preprocessing ──► execution ──► result
//!                      │             │                │
//!                  REGISTERED   PREPROCESSING   QUEUED / EXECUTING
//! ```

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{backends, result, run, status, validate, version};

/// qpipe - pulse-level job pipeline for quantum executors
#[derive(Parser)]
#[command(name = "qpipe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (YAML)
    #[arg(short, long, global = true, env = "QPIPE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pulse programs through the pipeline
    Run {
        /// Program files (JSON)
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Override the configured backend (sim1q, sim2q, bridge)
        #[arg(short, long)]
        backend: Option<String>,

        /// Override the shots of every program
        #[arg(short, long)]
        shots: Option<u32>,

        /// Job priority (low, default, high, critical or a number)
        #[arg(short, long)]
        priority: Option<String>,

        /// Print outcomes as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate and translate a program without running it
    Validate {
        /// Program file (JSON)
        input: String,

        /// Override the configured backend
        #[arg(short, long)]
        backend: Option<String>,
    },

    /// Query job status
    Status {
        /// Job ID (UUID)
        job_id: Option<String>,

        /// List all jobs
        #[arg(short, long)]
        all: bool,

        /// List jobs in one status (e.g. DONE, FAILED)
        #[arg(long)]
        filter: Option<String>,
    },

    /// Retrieve results for a completed job
    Result {
        /// Job ID (UUID)
        job_id: String,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// List available executors
    Backends,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over -v
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = cli.config.as_deref();

    // Execute command
    let result = match cli.command {
        Commands::Run {
            inputs,
            backend,
            shots,
            priority,
            json,
        } => {
            run::execute(
                &inputs,
                config,
                backend.as_deref(),
                shots,
                priority.as_deref(),
                json,
            )
            .await
        }

        Commands::Validate { input, backend } => {
            validate::execute(&input, config, backend.as_deref())
        }

        Commands::Status {
            job_id,
            all,
            filter,
        } => status::execute(job_id.as_deref(), all, filter.as_deref(), config).await,

        Commands::Result { job_id, format } => result::execute(&job_id, &format, config).await,

        Commands::Backends => backends::execute(),

        Commands::Version => {
            version::execute();
            Ok(())
        }
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "qpipe", "-vv", "run", "a.json", "b.json", "--shots", "64", "-p", "high",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run {
                inputs,
                shots,
                priority,
                backend,
                json,
            } => {
                assert_eq!(inputs, vec!["a.json", "b.json"]);
                assert_eq!(shots, Some(64));
                assert_eq!(priority.as_deref(), Some("high"));
                assert!(backend.is_none());
                assert!(!json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_requires_input() {
        assert!(Cli::try_parse_from(["qpipe", "run"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["qpipe", "status", "--all", "--config", "/etc/qpipe.yaml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/qpipe.yaml")));
        assert!(matches!(cli.command, Commands::Status { all: true, .. }));
    }

    #[test]
    fn test_result_default_format() {
        let cli = Cli::try_parse_from(["qpipe", "result", "some-id"]).unwrap();
        match cli.command {
            Commands::Result { format, .. } => assert_eq!(format, "table"),
            _ => panic!("expected result"),
        }
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
