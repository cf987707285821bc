//! qpipe Job Pipeline
//!
//! This crate stages pulse-program jobs through intake, preprocessing and
//! execution, and dispatches each one to a single executor instance.
//!
//! # Overview
//!
//! The pipeline manages the full lifecycle of a job:
//! 1. **Intake**: Validate the submission and register the job
//! 2. **Preprocessing**: Translate the program for the configured executor
//! 3. **Execution**: Run the native experiment under the executor's busy lock
//! 4. **Results**: Record the outcome and hand results to a sink
//!
//! # Job lifecycle
//!
//! | Status | Stage | Cancellable |
//! |--------|-------|-------------|
//! | `REGISTERED` | intake | yes |
//! | `PREPROCESSING` | preprocessing | yes |
//! | `QUEUED_FOR_EXECUTION` | execution | no |
//! | `EXECUTING` | execution | no |
//! | `DONE` / `FAILED` / `CANCELLED` | none | no |
//!
//! # Key Features
//!
//! - **Stage pools**: Priority ordering, FIFO within a priority
//! - **Compare-and-set**: No job is ever processed twice
//! - **Persistence**: In-memory or SQLite job store, recovery on restart
//! - **Retries**: Connection errors reconnect and retry with a fixed backoff
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use qpipe_hal::{ExecutorConfig, ExecutorInstance, ExecutorRegistry, PulseProgram};
//! use qpipe_sched::{MemoryStore, Orchestrator, Pipeline, PipelineConfig, Submission};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut registry = ExecutorRegistry::new();
//!     qpipe_adapter_sim::register(&mut registry);
//!     let executor = Arc::new(ExecutorInstance::new(
//!         registry.create(ExecutorConfig::new("sim1q"))?,
//!     ));
//!
//!     let pipeline = Orchestrator::new(
//!         PipelineConfig::default(),
//!         executor,
//!         Arc::new(MemoryStore::new()),
//!     )?;
//!     pipeline.start().await?;
//!
//!     let program = PulseProgram::from_json(&std::fs::read_to_string("rabi.json")?)?;
//!     let job_id = pipeline.submit(Submission::new(program)).await?;
//!     let outcome = pipeline.wait(&job_id).await?;
//!     println!("{:?}", outcome);
//!
//!     pipeline.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod persistence;
pub mod pool;
pub mod sink;

pub use config::{PipelineConfig, RetryPolicy, default_state_dir};
pub use error::{SchedError, SchedResult};
pub use job::{
    ErrorKind, ErrorRecord, Job, JobFilter, JobId, JobPatch, JobStatus, Priority, Stage,
    Timestamps, TopologyHint,
};
pub use orchestrator::{JobOutcome, Orchestrator, Pipeline, PipelineStats, Submission};
pub use persistence::{JobStore, MemoryStore, SqliteStore};
pub use pool::{PoolSet, StagePool};
pub use sink::{ArtifactRef, DirectorySink, ResultSink};
