//! Pipeline orchestrator.
//!
//! Jobs move through three stages, each with its own worker group:
//!
//! ```text
//!  submit ─→ [Intake] ─→ [Preprocessing] ─→ [Execution] ─→ DONE | FAILED
//!            REGISTERED   PREPROCESSING      QUEUED_FOR_EXECUTION
//!                         compile()          EXECUTING, run()
//! ```
//!
//! Every stage commit is a compare-and-set on the job store performed while
//! holding the pool lock, so a status change and the matching pool move are
//! observed together. A commit that finds an unexpected status (for example
//! a job cancelled while it was being compiled) drops the claim; a commit
//! that fails in the store puts the job back where it came from.
//!
//! A panic while compiling or running one job fails that job with an
//! `Internal` error and frees its claim; the worker keeps serving the pool.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use qpipe_hal::{
    ConnectionState, ExecutorInstance, ExecutorKind, NativeExperiment, PulseProgram, RawResult,
    ValidationResult,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{SchedError, SchedResult};
use crate::job::{
    ErrorKind, ErrorRecord, Job, JobFilter, JobId, JobPatch, JobStatus, Priority, Stage,
    TopologyHint,
};
use crate::persistence::JobStore;
use crate::pool::PoolSet;
use crate::sink::{ArtifactRef, ResultSink};

/// A program handed to the pipeline.
#[derive(Debug, Clone)]
pub struct Submission {
    pub program: PulseProgram,
    pub hint: TopologyHint,
    pub priority: Priority,
}

impl Submission {
    pub fn new(program: PulseProgram) -> Self {
        Self {
            program,
            hint: TopologyHint::default(),
            priority: Priority::default(),
        }
    }

    pub fn with_hint(mut self, hint: TopologyHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Final outcome of a job that ran to DONE or FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed(RawResult),
    Failed(ErrorRecord),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }

    pub fn result(&self) -> Option<&RawResult> {
        match self {
            JobOutcome::Completed(result) => Some(result),
            JobOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorRecord> {
        match self {
            JobOutcome::Completed(_) => None,
            JobOutcome::Failed(error) => Some(error),
        }
    }
}

/// Snapshot of pool occupancy and executor state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub intake_queued: usize,
    pub intake_claimed: usize,
    pub preprocessing_queued: usize,
    pub preprocessing_claimed: usize,
    pub execution_queued: usize,
    pub execution_claimed: usize,
    pub executor_state: ConnectionState,
}

impl PipelineStats {
    /// Jobs currently owned by any stage.
    pub fn in_flight(&self) -> usize {
        self.intake_queued
            + self.intake_claimed
            + self.preprocessing_queued
            + self.preprocessing_claimed
            + self.execution_queued
            + self.execution_claimed
    }
}

/// Operations the pipeline exposes to its callers.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Validate a submission, register it and queue it for intake.
    async fn submit(&self, submission: Submission) -> SchedResult<JobId>;

    /// Get the status of a job.
    async fn status(&self, job_id: &JobId) -> SchedResult<JobStatus>;

    /// Get the full job record.
    async fn job(&self, job_id: &JobId) -> SchedResult<Job>;

    /// Get the outcome of a finished job.
    async fn result(&self, job_id: &JobId) -> SchedResult<JobOutcome>;

    /// Cancel a job that has not reached execution.
    async fn cancel(&self, job_id: &JobId) -> SchedResult<()>;

    /// Wait for a job to finish and return its outcome.
    async fn wait(&self, job_id: &JobId) -> SchedResult<JobOutcome>;

    /// List jobs matching the filter.
    async fn list_jobs(&self, filter: JobFilter) -> SchedResult<Vec<Job>>;

    /// Remove a finished job from the store.
    async fn purge(&self, job_id: &JobId) -> SchedResult<()>;
}

/// Wake-up signals, one per stage.
#[derive(Debug, Default)]
struct Signals {
    intake: Notify,
    preprocessing: Notify,
    execution: Notify,
}

impl Signals {
    fn for_stage(&self, stage: Stage) -> &Notify {
        match stage {
            Stage::Intake => &self.intake,
            Stage::Preprocessing => &self.preprocessing,
            Stage::Execution => &self.execution,
        }
    }
}

/// Result of trying to commit a stage transition.
enum Commit {
    Done(Job),
    /// Status changed under us; the claim was dropped.
    Dropped,
    /// Store write failed; the caller puts the job back in its pool.
    StoreFailed,
}

/// Terminal status of a run, waiting to be written to the store.
#[derive(Debug)]
struct Settlement {
    job_id: JobId,
    next: JobStatus,
    patch: JobPatch,
}

struct Inner {
    config: PipelineConfig,
    executor: Arc<ExecutorInstance>,
    store: Arc<dyn JobStore>,
    sink: Option<Arc<dyn ResultSink>>,
    pools: Mutex<PoolSet>,
    signals: Signals,
    /// Outcome the store refused; its job keeps the execution claim until
    /// the write goes through.
    unsettled: StdMutex<Option<Settlement>>,
}

/// Staged job pipeline bound to one executor instance.
pub struct Orchestrator {
    inner: Arc<Inner>,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Create an orchestrator. Workers are not running until [`start`](Self::start).
    pub fn new(
        config: PipelineConfig,
        executor: Arc<ExecutorInstance>,
        store: Arc<dyn JobStore>,
    ) -> SchedResult<Self> {
        config.validate()?;
        let pools = PoolSet::new(config.intake_workers, config.preprocessing_workers);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                executor,
                store,
                sink: None,
                pools: Mutex::new(pools),
                signals: Signals::default(),
                unsettled: StdMutex::new(None),
            }),
            started: AtomicBool::new(false),
            shutdown_tx,
            workers: StdMutex::new(Vec::new()),
        })
    }

    /// Attach a result sink. Must be called before [`start`](Self::start).
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> SchedResult<Self> {
        let inner = Arc::get_mut(&mut self.inner).ok_or_else(|| {
            SchedError::Internal("cannot attach a sink to a running orchestrator".into())
        })?;
        inner.sink = Some(sink);
        Ok(self)
    }

    /// The pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// The executor instance jobs run on.
    pub fn executor(&self) -> &Arc<ExecutorInstance> {
        &self.inner.executor
    }

    /// Recover stored jobs, connect the executor and spawn the workers.
    pub async fn start(&self) -> SchedResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SchedError::Internal("orchestrator already started".into()));
        }

        let recovered = self.inner.recover().await?;
        if recovered > 0 {
            info!(recovered, "Recovered jobs from store");
        }

        if let Err(e) = self.inner.executor.prepare().await {
            // Execution retries prepare() for every job, so this is not fatal
            warn!(error = %e, "Executor not ready at startup");
        }

        let mut handles = Vec::new();
        for worker in 0..self.inner.config.intake_workers {
            handles.push(self.spawn_worker(Stage::Intake, worker));
        }
        for worker in 0..self.inner.config.preprocessing_workers {
            handles.push(self.spawn_worker(Stage::Preprocessing, worker));
        }
        handles.push(self.spawn_worker(Stage::Execution, 0));

        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);

        info!(
            executor = %self.inner.executor.name(),
            intake_workers = self.inner.config.intake_workers,
            preprocessing_workers = self.inner.config.preprocessing_workers,
            "Pipeline started"
        );
        Ok(())
    }

    fn spawn_worker(&self, stage: Stage, worker: usize) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move { inner.worker_loop(stage, worker, shutdown).await })
    }

    /// Stop the workers after their current job and shut the executor down.
    pub async fn shutdown(&self) -> SchedResult<()> {
        self.shutdown_tx.send_replace(true);
        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!(error = %e, "Pipeline worker panicked");
            }
        }

        let unsettled = self
            .inner
            .unsettled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(settlement) = unsettled {
            // Recovery fails it on the next start
            warn!(job_id = %settlement.job_id, status = %settlement.next, "Stopping with an unrecorded job outcome");
        }

        self.inner.executor.shutdown().await?;
        info!("Pipeline stopped");
        Ok(())
    }

    /// Current pool occupancy.
    pub async fn stats(&self) -> PipelineStats {
        let pools = self.inner.pools.lock().await;
        PipelineStats {
            intake_queued: pools.intake.queued_len(),
            intake_claimed: pools.intake.claimed_len(),
            preprocessing_queued: pools.preprocessing.queued_len(),
            preprocessing_claimed: pools.preprocessing.claimed_len(),
            execution_queued: pools.execution.queued_len(),
            execution_claimed: pools.execution.claimed_len(),
            executor_state: self.inner.executor.state(),
        }
    }

    /// Stage pool currently holding a job, if any.
    pub async fn stage_of(&self, job_id: &JobId) -> Option<Stage> {
        self.inner.pools.lock().await.locate(job_id)
    }

    fn validate_submission(&self, submission: &Submission) -> SchedResult<()> {
        if let ValidationResult::Invalid { reasons } = submission.program.validate() {
            return Err(SchedError::ValidationError(reasons.join("; ")));
        }

        let executor = &self.inner.executor;
        if let Some(ref backend) = submission.hint.backend {
            let kind: ExecutorKind = backend
                .parse()
                .map_err(|e: qpipe_hal::HalError| SchedError::ValidationError(e.to_string()))?;
            if kind != executor.kind() {
                return Err(SchedError::ValidationError(format!(
                    "program targets '{kind}' but the configured executor is '{}'",
                    executor.kind()
                )));
            }
        }

        if let Some(qubits) = submission.hint.qubits {
            let available = executor.topology().qubits;
            if qubits > available {
                return Err(SchedError::ValidationError(format!(
                    "program needs {qubits} qubits but '{}' has {available}",
                    executor.name()
                )));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Pipeline for Orchestrator {
    #[instrument(skip(self, submission), fields(program = %submission.program.name))]
    async fn submit(&self, submission: Submission) -> SchedResult<JobId> {
        self.validate_submission(&submission)?;

        let job = Job::new(submission.program)
            .with_priority(submission.priority)
            .with_hint(submission.hint);
        let job_id = job.id;

        {
            let mut pools = self.inner.pools.lock().await;
            self.inner.store.create(&job).await?;
            pools.intake.push(job_id, job.priority, ());
        }
        self.inner.signals.intake.notify_one();

        info!(
            job_id = %job_id,
            instructions = job.program.instruction_count(),
            priority = job.priority.value(),
            "Job registered"
        );
        Ok(job_id)
    }

    async fn status(&self, job_id: &JobId) -> SchedResult<JobStatus> {
        Ok(self.job(job_id).await?.status)
    }

    async fn job(&self, job_id: &JobId) -> SchedResult<Job> {
        self.inner
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| SchedError::JobNotFound(job_id.to_string()))
    }

    async fn result(&self, job_id: &JobId) -> SchedResult<JobOutcome> {
        outcome_of(self.job(job_id).await?)
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn cancel(&self, job_id: &JobId) -> SchedResult<()> {
        // Stage commits also run under the pool lock, so the status read
        // here cannot change before the compare-and-set below
        let mut pools = self.inner.pools.lock().await;
        let job = self.job(job_id).await?;

        if !job.status.is_cancellable() {
            return Err(SchedError::InvalidJobState {
                job_id: job_id.to_string(),
                operation: "cancel".into(),
                found: job.status.to_string(),
            });
        }

        self.inner
            .store
            .compare_and_set_status(job_id, job.status, JobStatus::Cancelled, JobPatch::none())
            .await?;

        // A claimed job stays claimed; its worker sees the conflict on commit
        match job.status {
            JobStatus::Registered => {
                pools.intake.remove(job_id);
            }
            JobStatus::Preprocessing => {
                pools.preprocessing.remove(job_id);
            }
            _ => {}
        }

        info!(from = %job.status, "Job cancelled");
        Ok(())
    }

    async fn wait(&self, job_id: &JobId) -> SchedResult<JobOutcome> {
        let started = Instant::now();
        let max_wait = self.inner.config.max_wait();

        loop {
            let job = self.job(job_id).await?;
            if job.status.is_terminal() {
                return outcome_of(job);
            }

            if started.elapsed() > max_wait {
                return Err(SchedError::Timeout(format!(
                    "job {job_id} still {} after {} ms",
                    job.status,
                    max_wait.as_millis()
                )));
            }

            tokio::time::sleep(self.inner.config.poll_interval()).await;
        }
    }

    async fn list_jobs(&self, filter: JobFilter) -> SchedResult<Vec<Job>> {
        self.inner.store.list(&filter).await
    }

    async fn purge(&self, job_id: &JobId) -> SchedResult<()> {
        let job = self.job(job_id).await?;
        if !job.status.is_terminal() {
            return Err(SchedError::InvalidJobState {
                job_id: job_id.to_string(),
                operation: "purge".into(),
                found: job.status.to_string(),
            });
        }
        self.inner.store.purge(job_id).await?;
        debug!(job_id = %job_id, "Job purged");
        Ok(())
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map_or_else(|| "unknown panic".to_string(), |s| (*s).to_string()),
    }
}

fn outcome_of(job: Job) -> SchedResult<JobOutcome> {
    match job.status {
        JobStatus::Done => job.result.map(JobOutcome::Completed).ok_or_else(|| {
            SchedError::Internal(format!("job {} is DONE without a result", job.id))
        }),
        JobStatus::Failed => Ok(JobOutcome::Failed(job.error.unwrap_or_else(|| {
            ErrorRecord::new(Stage::Execution, ErrorKind::Internal, "no error recorded")
        }))),
        status => Err(SchedError::NotReady {
            job_id: job.id.to_string(),
            status: status.to_string(),
        }),
    }
}

impl Inner {
    async fn worker_loop(&self, stage: Stage, worker: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(stage = %stage, worker, "Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let worked = match stage {
                Stage::Intake => self.intake_step().await,
                Stage::Preprocessing => self.preprocessing_step().await,
                Stage::Execution => self.execution_step().await,
            };

            if !worked {
                tokio::select! {
                    _ = self.signals.for_stage(stage).notified() => {}
                    changed = shutdown.changed() => {
                        // Sender gone: the orchestrator was dropped
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }
        }
        debug!(stage = %stage, worker, "Worker stopped");
    }

    /// Put jobs found in a durable store back into their pools.
    async fn recover(&self) -> SchedResult<usize> {
        let active = self.store.list(&JobFilter::active()).await?;
        let mut pools = self.pools.lock().await;
        let mut recovered = 0;

        for job in active {
            if pools.locate(&job.id).is_some() {
                continue;
            }
            match job.status {
                JobStatus::Registered => pools.intake.push(job.id, job.priority, ()),
                JobStatus::Preprocessing => pools.preprocessing.push(job.id, job.priority, ()),
                JobStatus::QueuedForExecution | JobStatus::Executing => {
                    // The translated experiment lived only in memory
                    let record =
                        ErrorRecord::new(Stage::Execution, ErrorKind::Internal, "interrupted by restart");
                    self.store
                        .compare_and_set_status(
                            &job.id,
                            job.status,
                            JobStatus::Failed,
                            JobPatch::error(record),
                        )
                        .await?;
                    warn!(job_id = %job.id, status = %job.status, "Job interrupted by restart");
                }
                _ => continue,
            }
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Compare-and-set under the pool lock. Conflicts release the claim;
    /// a successful commit leaves the claim for the caller to move.
    async fn commit(
        &self,
        pools: &mut PoolSet,
        stage: Stage,
        job_id: &JobId,
        expected: JobStatus,
        next: JobStatus,
        patch: JobPatch,
    ) -> Commit {
        match self
            .store
            .compare_and_set_status(job_id, expected, next, patch)
            .await
        {
            Ok(job) => Commit::Done(job),
            Err(e) if e.is_store_failure() => {
                warn!(job_id = %job_id, stage = %stage, error = %e, "Store write failed, re-enqueueing");
                Commit::StoreFailed
            }
            Err(e) => {
                debug!(job_id = %job_id, stage = %stage, reason = %e, "Dropping claim");
                pools.release(stage, job_id);
                Commit::Dropped
            }
        }
    }

    async fn backoff(&self) {
        tokio::time::sleep(self.config.retry.backoff()).await;
    }

    /// REGISTERED → PREPROCESSING. Returns false when there was nothing to do.
    ///
    /// The claim and the commit take the pool lock separately. A cancel that
    /// lands in between finds the job claimed, so the commit sees CANCELLED
    /// and drops the claim.
    async fn intake_step(&self) -> bool {
        let claimed = self.pools.lock().await.intake.claim();
        let Some((job_id, ())) = claimed else {
            return false;
        };

        let mut pools = self.pools.lock().await;
        let commit = self
            .commit(
                &mut pools,
                Stage::Intake,
                &job_id,
                JobStatus::Registered,
                JobStatus::Preprocessing,
                JobPatch::none(),
            )
            .await;

        match commit {
            Commit::Done(job) => {
                pools.intake.release(&job_id);
                pools.preprocessing.push(job_id, job.priority, ());
                drop(pools);
                self.signals.preprocessing.notify_one();
                debug!(job_id = %job_id, "Job entered preprocessing");
            }
            Commit::StoreFailed => {
                pools.intake.requeue(job_id, ());
                drop(pools);
                self.backoff().await;
            }
            Commit::Dropped => {}
        }
        true
    }

    /// Compile, then PREPROCESSING → QUEUED_FOR_EXECUTION or FAILED.
    async fn preprocessing_step(&self) -> bool {
        let claimed = self.pools.lock().await.preprocessing.claim();
        let Some((job_id, ())) = claimed else {
            return false;
        };
        if let Err(panic) = AssertUnwindSafe(self.preprocess(job_id)).catch_unwind().await {
            self.fail_panicked(Stage::Preprocessing, job_id, panic_message(panic))
                .await;
        }
        true
    }

    #[instrument(skip(self), fields(job_id = %job_id, stage = "preprocessing"))]
    async fn preprocess(&self, job_id: JobId) {
        let job = match self.store.get(&job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Preprocessing => job,
            Ok(_) => {
                debug!("Job no longer preprocessing, dropping claim");
                self.pools.lock().await.preprocessing.release(&job_id);
                return;
            }
            Err(e) => {
                warn!(error = %e, "Store read failed, re-enqueueing");
                self.pools.lock().await.preprocessing.requeue(job_id, ());
                self.backoff().await;
                return;
            }
        };

        let compiled = self.executor.compile(&job.program).map_err(SchedError::from);

        let mut pools = self.pools.lock().await;
        let (next, patch) = match &compiled {
            Ok(_) => (JobStatus::QueuedForExecution, JobPatch::none()),
            Err(e) => {
                warn!(error = %e, "Preprocessing failed");
                (
                    JobStatus::Failed,
                    JobPatch::error(ErrorRecord::from_error(Stage::Preprocessing, e)),
                )
            }
        };

        let commit = self
            .commit(
                &mut pools,
                Stage::Preprocessing,
                &job_id,
                JobStatus::Preprocessing,
                next,
                patch,
            )
            .await;

        match (commit, compiled) {
            (Commit::Done(job), Ok(experiment)) => {
                info!(
                    channels = experiment.channels.len(),
                    native_instructions = experiment.instruction_count(),
                    duration_ns = experiment.duration_ns,
                    "Job queued for execution"
                );
                pools.preprocessing.release(&job_id);
                pools.execution.push(job_id, job.priority, experiment);
                drop(pools);
                self.signals.execution.notify_one();
            }
            (Commit::Done(_), Err(_)) => {
                pools.preprocessing.release(&job_id);
            }
            (Commit::StoreFailed, _) => {
                pools.preprocessing.requeue(job_id, ());
                drop(pools);
                self.backoff().await;
            }
            (Commit::Dropped, _) => {}
        }
    }

    /// QUEUED_FOR_EXECUTION → EXECUTING → DONE | FAILED.
    ///
    /// An outcome the store refused earlier is written before any new job
    /// is claimed.
    async fn execution_step(&self) -> bool {
        let unsettled = self
            .unsettled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(settlement) = unsettled {
            self.finish(settlement).await;
            return true;
        }

        let mut pools = self.pools.lock().await;
        let Some((job_id, experiment)) = pools.execution.claim() else {
            return false;
        };

        let commit = self
            .commit(
                &mut pools,
                Stage::Execution,
                &job_id,
                JobStatus::QueuedForExecution,
                JobStatus::Executing,
                JobPatch::none(),
            )
            .await;

        match commit {
            // The claim is held for the whole run and released by finish()
            Commit::Done(_) => {
                drop(pools);
                let run = AssertUnwindSafe(self.execute(job_id, experiment));
                if let Err(panic) = run.catch_unwind().await {
                    self.fail_panicked(Stage::Execution, job_id, panic_message(panic))
                        .await;
                }
            }
            Commit::StoreFailed => {
                pools.execution.requeue(job_id, experiment);
                drop(pools);
                self.backoff().await;
            }
            Commit::Dropped => {}
        }
        true
    }

    #[instrument(skip(self, experiment), fields(job_id = %job_id, stage = "execution"))]
    async fn execute(&self, job_id: JobId, experiment: NativeExperiment) {
        let timeout = self.config.run_timeout();
        let max_retries = self.config.retry.max_retries;
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;
            match self.executor.run(&experiment, timeout).await {
                Ok(result) => break Ok(result),
                Err(e) if e.is_recoverable() && attempts <= max_retries => {
                    warn!(attempt = attempts, error = %e, "Recoverable executor failure, retrying");
                    self.backoff().await;
                    if let Err(e) = self.executor.prepare().await {
                        warn!(error = %e, "Reconnect failed");
                    }
                }
                Err(e) => break Err(SchedError::from(e)),
            }
        };

        let (next, patch) = match outcome {
            Ok(result) => {
                let artifact = self.store_artifact(&job_id, &result).await;
                info!(
                    attempts,
                    shots = result.shots,
                    distinct_outcomes = result.counts.len(),
                    "Job done"
                );
                (
                    JobStatus::Done,
                    JobPatch::result(result)
                        .with_artifact(artifact)
                        .with_attempts(attempts),
                )
            }
            Err(e) => {
                warn!(attempts, error = %e, "Job failed");
                (
                    JobStatus::Failed,
                    JobPatch::error(ErrorRecord::from_error(Stage::Execution, &e))
                        .with_attempts(attempts),
                )
            }
        };

        self.finish(Settlement {
            job_id,
            next,
            patch,
        })
        .await;
    }

    /// Write the terminal status and free the execution slot. The run
    /// cannot be repeated, so a failing store is retried instead of
    /// re-enqueueing the job. Once the retry budget is spent the outcome is
    /// parked in `unsettled` and the claim is kept, so no new job starts
    /// until the write lands.
    async fn finish(&self, settlement: Settlement) {
        let Settlement { job_id, next, .. } = settlement;
        let tries = self.config.retry.max_retries + 1;
        for attempt in 1..=tries {
            let mut pools = self.pools.lock().await;
            let written = self
                .store
                .compare_and_set_status(
                    &job_id,
                    JobStatus::Executing,
                    next,
                    settlement.patch.clone(),
                )
                .await;

            match written {
                Ok(_) => {
                    pools.execution.release(&job_id);
                    return;
                }
                Err(e) if e.is_store_failure() => {
                    drop(pools);
                    if attempt < tries {
                        warn!(job_id = %job_id, attempt, error = %e, "Store write failed, retrying");
                        self.backoff().await;
                        continue;
                    }
                    error!(
                        job_id = %job_id,
                        status = %next,
                        error = %e,
                        "Could not record job outcome, holding the execution slot"
                    );
                    *self.unsettled.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(settlement);
                    self.backoff().await;
                    return;
                }
                Err(e) => {
                    // No longer EXECUTING, nothing left to record
                    error!(job_id = %job_id, error = %e, status = %next, "Job outcome discarded");
                    pools.execution.release(&job_id);
                    return;
                }
            }
        }
    }

    /// Fail a job whose stage work panicked and free its claim.
    async fn fail_panicked(&self, stage: Stage, job_id: JobId, message: String) {
        error!(job_id = %job_id, stage = %stage, panic = %message, "Worker panicked, failing job");

        let record = ErrorRecord::new(stage, ErrorKind::Internal, format!("worker panicked: {message}"));
        match stage {
            Stage::Execution => {
                self.finish(Settlement {
                    job_id,
                    next: JobStatus::Failed,
                    patch: JobPatch::error(record),
                })
                .await;
            }
            _ => {
                let expected = match stage {
                    Stage::Intake => JobStatus::Registered,
                    _ => JobStatus::Preprocessing,
                };
                let mut pools = self.pools.lock().await;
                if let Err(e) = self
                    .store
                    .compare_and_set_status(&job_id, expected, JobStatus::Failed, JobPatch::error(record))
                    .await
                {
                    warn!(job_id = %job_id, error = %e, "Could not record panic");
                }
                pools.release(stage, &job_id);
            }
        }
    }

    async fn store_artifact(&self, job_id: &JobId, result: &RawResult) -> Option<ArtifactRef> {
        let sink = self.sink.as_ref()?;
        match sink.store(job_id, result).await {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!(error = %e, "Result sink failed, keeping result in the store only");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use qpipe_adapter_sim::{Fault, SimHandle, SimulatorExecutor};
    use qpipe_hal::{
        Capabilities, Executor, ExecutorConfig, HalResult, PulseInstruction, TopologyMap,
    };

    use crate::persistence::MemoryStore;

    fn program(name: &str) -> PulseProgram {
        PulseProgram::new(name)
            .with_channel("d0")
            .with_channel("m0")
            .with_pulse("x90", vec![[0.1, 0.0]; 16])
            .with_instruction(PulseInstruction::play("x90", "d0", 0))
            .with_instruction(PulseInstruction::acquire(16, 64, vec![0], vec![0]))
            .with_shots(64)
    }

    fn simulator() -> (Arc<ExecutorInstance>, qpipe_adapter_sim::SimHandle) {
        let executor = SimulatorExecutor::single_qubit(ExecutorConfig::new("sim1q")).unwrap();
        let handle = executor.handle();
        (Arc::new(ExecutorInstance::new(Box::new(executor))), handle)
    }

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::default()
            .with_run_timeout(Duration::from_millis(500))
            .with_max_wait(Duration::from_secs(10));
        config.poll_interval_ms = 5;
        config.retry.backoff_ms = 5;
        config
    }

    async fn orchestrator(store: Arc<dyn JobStore>) -> (Orchestrator, qpipe_adapter_sim::SimHandle) {
        let (executor, handle) = simulator();
        let orch = Orchestrator::new(fast_config(), executor, store).unwrap();
        (orch, handle)
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_program() {
        let (orch, _) = orchestrator(Arc::new(MemoryStore::new())).await;

        let empty = PulseProgram::new("empty").with_channel("d0");
        let err = orch.submit(Submission::new(empty)).await.unwrap_err();
        assert!(matches!(err, SchedError::ValidationError(_)));

        let jobs = orch.list_jobs(JobFilter::default()).await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_mismatched_hint() {
        let (orch, _) = orchestrator(Arc::new(MemoryStore::new())).await;

        let err = orch
            .submit(Submission::new(program("p")).with_hint(TopologyHint::backend("sim2q")))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedError::ValidationError(_)));

        let err = orch
            .submit(
                Submission::new(program("p"))
                    .with_hint(TopologyHint::backend("sim1q").with_qubits(2)),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("needs 2 qubits"));

        let err = orch
            .submit(Submission::new(program("p")).with_hint(TopologyHint::backend("qasm")))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_submit_registers_and_queues() {
        let (orch, _) = orchestrator(Arc::new(MemoryStore::new())).await;
        let id = orch
            .submit(Submission::new(program("p")).with_hint(TopologyHint::backend("single-qubit-simulator")))
            .await
            .unwrap();

        assert_eq!(orch.status(&id).await.unwrap(), JobStatus::Registered);
        assert_eq!(orch.stage_of(&id).await, Some(Stage::Intake));
        assert!(matches!(
            orch.result(&id).await,
            Err(SchedError::NotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let (orch, _) = orchestrator(Arc::new(MemoryStore::new())).await;
        let id = orch.submit(Submission::new(program("p"))).await.unwrap();

        orch.cancel(&id).await.unwrap();
        assert_eq!(orch.status(&id).await.unwrap(), JobStatus::Cancelled);
        assert_eq!(orch.stage_of(&id).await, None);

        // Terminal: a second cancel is rejected
        assert!(matches!(
            orch.cancel(&id).await,
            Err(SchedError::InvalidJobState { .. })
        ));
        assert!(matches!(
            orch.result(&id).await,
            Err(SchedError::NotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (orch, _) = orchestrator(Arc::new(MemoryStore::new())).await;
        let id = JobId::new();
        assert!(matches!(
            orch.status(&id).await,
            Err(SchedError::JobNotFound(_))
        ));
        assert!(matches!(
            orch.cancel(&id).await,
            Err(SchedError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_job_runs_to_done() {
        let (orch, handle) = orchestrator(Arc::new(MemoryStore::new())).await;
        orch.start().await.unwrap();

        let id = orch.submit(Submission::new(program("rabi"))).await.unwrap();
        let outcome = orch.wait(&id).await.unwrap();

        let result = outcome.result().unwrap();
        assert_eq!(result.shots, 64);
        assert_eq!(result.counts.total_shots(), 64);

        let job = orch.job(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.attempts, 1);
        assert_eq!(handle.executions(), 1);
        assert_eq!(orch.stats().await.in_flight(), 0);

        orch.shutdown().await.unwrap();
        assert!(orch.executor().is_shut_down());
    }

    #[tokio::test]
    async fn test_purge_requires_terminal_status() {
        let (orch, _) = orchestrator(Arc::new(MemoryStore::new())).await;
        let id = orch.submit(Submission::new(program("p"))).await.unwrap();

        assert!(matches!(
            orch.purge(&id).await,
            Err(SchedError::InvalidJobState { .. })
        ));

        orch.cancel(&id).await.unwrap();
        orch.purge(&id).await.unwrap();
        assert!(matches!(
            orch.status(&id).await,
            Err(SchedError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_errors_are_retried() {
        let (orch, handle) = orchestrator(Arc::new(MemoryStore::new())).await;
        handle.inject(Fault::Disconnect);
        handle.inject(Fault::Disconnect);
        orch.start().await.unwrap();

        let id = orch.submit(Submission::new(program("p"))).await.unwrap();
        let outcome = orch.wait(&id).await.unwrap();

        assert!(outcome.is_completed());
        assert_eq!(orch.job(&id).await.unwrap().attempts, 3);
        orch.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let (orch, handle) = orchestrator(Arc::new(MemoryStore::new())).await;
        for _ in 0..3 {
            handle.inject(Fault::Disconnect);
        }
        orch.start().await.unwrap();

        let id = orch.submit(Submission::new(program("p"))).await.unwrap();
        let outcome = orch.wait(&id).await.unwrap();

        let error = outcome.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Connection);
        assert_eq!(error.stage, Stage::Execution);
        assert_eq!(orch.job(&id).await.unwrap().attempts, 3);
        orch.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (orch, _) = orchestrator(Arc::new(MemoryStore::new())).await;
        orch.start().await.unwrap();
        assert!(matches!(orch.start().await, Err(SchedError::Internal(_))));
        orch.shutdown().await.unwrap();
    }

    /// Store whose first few status writes fail. With `fails_on` set, only
    /// writes to that status count.
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicU32,
        fails_on: Option<JobStatus>,
    }

    #[async_trait]
    impl JobStore for FlakyStore {
        async fn create(&self, job: &Job) -> SchedResult<()> {
            self.inner.create(job).await
        }

        async fn get(&self, job_id: &JobId) -> SchedResult<Option<Job>> {
            self.inner.get(job_id).await
        }

        async fn compare_and_set_status(
            &self,
            job_id: &JobId,
            expected: JobStatus,
            next: JobStatus,
            patch: JobPatch,
        ) -> SchedResult<Job> {
            let targeted = self.fails_on.is_none_or(|status| status == next);
            let left = self.failures_left.load(Ordering::SeqCst);
            if targeted && left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(SchedError::DatabaseError("disk I/O error".into()));
            }
            self.inner
                .compare_and_set_status(job_id, expected, next, patch)
                .await
        }

        async fn purge(&self, job_id: &JobId) -> SchedResult<bool> {
            self.inner.purge(job_id).await
        }

        async fn list(&self, filter: &JobFilter) -> SchedResult<Vec<Job>> {
            self.inner.list(filter).await
        }
    }

    #[tokio::test]
    async fn test_store_failure_reenqueues() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(3),
            fails_on: None,
        });
        let (orch, _) = orchestrator(store).await;
        orch.start().await.unwrap();

        let id = orch.submit(Submission::new(program("p"))).await.unwrap();
        let outcome = orch.wait(&id).await.unwrap();

        assert!(outcome.is_completed());
        orch.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unrecorded_outcome_blocks_execution_until_written() {
        // Two full retry budgets plus one, all on the DONE write
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(7),
            fails_on: Some(JobStatus::Done),
        });
        let (orch, handle) = orchestrator(store.clone()).await;
        orch.start().await.unwrap();

        let first = orch.submit(Submission::new(program("first"))).await.unwrap();
        let second = orch.submit(Submission::new(program("second"))).await.unwrap();

        let outcome = orch.wait(&first).await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(store.failures_left.load(Ordering::SeqCst), 0);
        assert_eq!(orch.job(&first).await.unwrap().attempts, 1);

        assert!(orch.wait(&second).await.unwrap().is_completed());
        assert_eq!(handle.executions(), 2);
        assert_eq!(orch.stats().await.in_flight(), 0);
        assert_eq!(orch.stage_of(&first).await, None);
        orch.shutdown().await.unwrap();
    }

    /// Simulator wrapper that misbehaves on chosen program names.
    ///
    /// `panic-compile*` panics in compile, `panic-run*` panics in execute
    /// and `held*` blocks compile until the gate opens.
    struct Tripwire {
        sim: SimulatorExecutor,
        gate_open: Arc<AtomicBool>,
        held: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Executor for Tripwire {
        fn name(&self) -> &str {
            self.sim.name()
        }

        fn kind(&self) -> ExecutorKind {
            self.sim.kind()
        }

        fn capabilities(&self) -> &Capabilities {
            self.sim.capabilities()
        }

        fn topology(&self) -> &TopologyMap {
            self.sim.topology()
        }

        async fn prepare(&self) -> HalResult<()> {
            self.sim.prepare().await
        }

        fn compile(&self, program: &PulseProgram) -> HalResult<NativeExperiment> {
            if program.name.starts_with("panic-compile") {
                panic!("compile tripped on {}", program.name);
            }
            if program.name.starts_with("held") {
                self.held.store(true, Ordering::SeqCst);
                while !self.gate_open.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            self.sim.compile(program)
        }

        async fn execute(&self, experiment: &NativeExperiment) -> HalResult<RawResult> {
            if experiment.name.starts_with("panic-run") {
                panic!("run tripped on {}", experiment.name);
            }
            self.sim.execute(experiment).await
        }

        async fn abort(&self) -> HalResult<()> {
            self.sim.abort().await
        }

        async fn shutdown(&self) -> HalResult<()> {
            self.sim.shutdown().await
        }
    }

    struct Tripped {
        orch: Orchestrator,
        sim: SimHandle,
        gate_open: Arc<AtomicBool>,
        held: Arc<AtomicBool>,
    }

    fn tripwire(config: PipelineConfig) -> Tripped {
        let sim = SimulatorExecutor::single_qubit(ExecutorConfig::new("sim1q")).unwrap();
        let handle = sim.handle();
        let gate_open = Arc::new(AtomicBool::new(false));
        let held = Arc::new(AtomicBool::new(false));
        let executor = Tripwire {
            sim,
            gate_open: gate_open.clone(),
            held: held.clone(),
        };
        let orch = Orchestrator::new(
            config,
            Arc::new(ExecutorInstance::new(Box::new(executor))),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        Tripped {
            orch,
            sim: handle,
            gate_open,
            held,
        }
    }

    async fn until(mut done: impl AsyncFnMut() -> bool) {
        for _ in 0..1000 {
            if done().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_compile_panic_fails_only_that_job() {
        let t = tripwire(fast_config().with_workers(1, 1));
        t.orch.start().await.unwrap();

        let bad = t.orch.submit(Submission::new(program("panic-compile"))).await.unwrap();
        let sibling = t.orch.submit(Submission::new(program("sibling"))).await.unwrap();

        let error = t.orch.wait(&bad).await.unwrap().error().cloned().unwrap();
        assert_eq!(error.kind, ErrorKind::Internal);
        assert_eq!(error.stage, Stage::Preprocessing);
        assert!(error.message.contains("worker panicked"));
        assert!(error.message.contains("compile tripped on panic-compile"));

        assert!(t.orch.wait(&sibling).await.unwrap().is_completed());
        assert_eq!(t.orch.stage_of(&bad).await, None);
        assert_eq!(t.orch.stats().await.in_flight(), 0);
        assert_eq!(t.sim.executions(), 1);
        t.orch.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_panic_frees_the_execution_slot() {
        let t = tripwire(fast_config());
        t.orch.start().await.unwrap();

        let bad = t.orch.submit(Submission::new(program("panic-run"))).await.unwrap();
        let error = t.orch.wait(&bad).await.unwrap().error().cloned().unwrap();
        assert_eq!(error.kind, ErrorKind::Internal);
        assert_eq!(error.stage, Stage::Execution);
        assert!(error.message.contains("run tripped on panic-run"));

        let next = t.orch.submit(Submission::new(program("next"))).await.unwrap();
        assert!(t.orch.wait(&next).await.unwrap().is_completed());
        assert_eq!(t.orch.stats().await.in_flight(), 0);
        t.orch.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_during_preprocessing() {
        let t = tripwire(fast_config());
        t.orch.start().await.unwrap();

        let id = t.orch.submit(Submission::new(program("held"))).await.unwrap();
        until(async || t.held.load(Ordering::SeqCst)).await;
        assert_eq!(t.orch.status(&id).await.unwrap(), JobStatus::Preprocessing);
        assert_eq!(t.orch.stage_of(&id).await, Some(Stage::Preprocessing));

        t.orch.cancel(&id).await.unwrap();
        assert_eq!(t.orch.status(&id).await.unwrap(), JobStatus::Cancelled);

        t.gate_open.store(true, Ordering::SeqCst);
        until(async || t.orch.stats().await.in_flight() == 0).await;

        assert_eq!(t.orch.status(&id).await.unwrap(), JobStatus::Cancelled);
        assert_eq!(t.orch.stage_of(&id).await, None);
        assert_eq!(t.sim.executions(), 0);
        assert!(matches!(
            t.orch.cancel(&id).await,
            Err(SchedError::InvalidJobState { .. })
        ));

        // The worker that compiled the cancelled job keeps serving
        let next = t.orch.submit(Submission::new(program("next"))).await.unwrap();
        assert!(t.orch.wait(&next).await.unwrap().is_completed());
        assert_eq!(t.sim.executions(), 1);
        t.orch.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_recover_marks_interrupted_jobs_failed() {
        let store = Arc::new(MemoryStore::new());

        let registered = Job::new(program("waiting"));
        let executing = Job::new(program("running"));
        store.create(&registered).await.unwrap();
        store.create(&executing).await.unwrap();
        for (from, to) in [
            (JobStatus::Registered, JobStatus::Preprocessing),
            (JobStatus::Preprocessing, JobStatus::QueuedForExecution),
            (JobStatus::QueuedForExecution, JobStatus::Executing),
        ] {
            store
                .compare_and_set_status(&executing.id, from, to, JobPatch::none())
                .await
                .unwrap();
        }

        let (orch, _) = orchestrator(store).await;
        orch.start().await.unwrap();

        let outcome = orch.wait(&registered.id).await.unwrap();
        assert!(outcome.is_completed());

        let outcome = orch.wait(&executing.id).await.unwrap();
        let error = outcome.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Internal);
        assert_eq!(error.message, "interrupted by restart");
        orch.shutdown().await.unwrap();
    }
}
