//! Job types for the pipeline.

use chrono::{DateTime, Utc};
use qpipe_hal::{PulseProgram, RawResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SchedError, SchedResult};
use crate::sink::ArtifactRef;

/// Unique identifier for a pipeline job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job priority. Higher values mean higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub u32);

impl Priority {
    /// Default priority (100).
    pub const DEFAULT: Priority = Priority(100);

    /// Low priority (50).
    pub const LOW: Priority = Priority(50);

    /// High priority (150).
    pub const HIGH: Priority = Priority(150);

    /// Critical priority (200).
    pub const CRITICAL: Priority = Priority(200);

    /// Create a new priority with the given value.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the numeric value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Pipeline stage owning a non-terminal job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Preprocessing,
    Execution,
}

impl Stage {
    /// Stage name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Preprocessing => "preprocessing",
            Stage::Execution => "execution",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Status of a pipeline job.
///
/// ```text
/// REGISTERED ─→ PREPROCESSING ─→ QUEUED_FOR_EXECUTION ─→ EXECUTING ─→ DONE
///     │              │                   │                   │
///     │              │                   └───────────────────┴──→ FAILED
///     └──────────────┴──→ CANCELLED | FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Registered,
    Preprocessing,
    QueuedForExecution,
    Executing,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Registered,
        JobStatus::Preprocessing,
        JobStatus::QueuedForExecution,
        JobStatus::Executing,
        JobStatus::Done,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Wire name of the status.
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Registered => "REGISTERED",
            JobStatus::Preprocessing => "PREPROCESSING",
            JobStatus::QueuedForExecution => "QUEUED_FOR_EXECUTION",
            JobStatus::Executing => "EXECUTING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parse a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether a result lookup is meaningful.
    pub fn has_outcome(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether the job may still be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Registered | JobStatus::Preprocessing)
    }

    /// Stage that owns a job in this status. Terminal jobs have none.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            JobStatus::Registered => Some(Stage::Intake),
            JobStatus::Preprocessing => Some(Stage::Preprocessing),
            JobStatus::QueuedForExecution | JobStatus::Executing => Some(Stage::Execution),
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled => None,
        }
    }

    /// Whether `next` is a legal edge from this status.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Registered, Preprocessing) => true,
            (Preprocessing, QueuedForExecution) => true,
            (QueuedForExecution, Executing) => true,
            (Executing, Done) => true,
            (Registered | Preprocessing, Cancelled) => true,
            (Registered | Preprocessing | QueuedForExecution | Executing, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of failure recorded on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transpile,
    Connection,
    Execution,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transpile => "transpile",
            ErrorKind::Connection => "connection",
            ErrorKind::Execution => "execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Error attached to a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    /// Stage the failure originated in.
    pub stage: Stage,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Build a record from a pipeline error.
    pub fn from_error(stage: Stage, error: &SchedError) -> Self {
        Self::new(stage, error.kind(), error.to_string())
    }

    pub fn new(stage: Stage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage,
            at: Utc::now(),
        }
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} during {}", self.kind, self.message, self.stage)
    }
}

/// Lifecycle timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamps {
    pub submitted: DateTime<Utc>,
    /// When the job entered its current stage.
    pub stage_entered: DateTime<Utc>,
    pub execution_started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
}

impl Timestamps {
    fn now() -> Self {
        let now = Utc::now();
        Self {
            submitted: now,
            stage_entered: now,
            execution_started: None,
            completed: None,
        }
    }
}

/// Optional hint about where a program is meant to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyHint {
    /// Backend key the submitter expects (e.g. `sim1q`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Number of qubits the program needs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qubits: Option<u32>,
}

impl TopologyHint {
    pub fn backend(backend: impl Into<String>) -> Self {
        Self {
            backend: Some(backend.into()),
            qubits: None,
        }
    }

    pub fn with_qubits(mut self, qubits: u32) -> Self {
        self.qubits = Some(qubits);
        self
    }
}

/// A job tracked by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub priority: Priority,
    pub program: PulseProgram,
    #[serde(default)]
    pub hint: TopologyHint,
    pub timestamps: Timestamps,
    /// Number of execution attempts made.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RawResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
}

impl Job {
    /// Create a REGISTERED job.
    pub fn new(program: PulseProgram) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Registered,
            priority: Priority::default(),
            program,
            hint: TopologyHint::default(),
            timestamps: Timestamps::now(),
            attempts: 0,
            result: None,
            error: None,
            artifact: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_hint(mut self, hint: TopologyHint) -> Self {
        self.hint = hint;
        self
    }

    /// Program name.
    pub fn name(&self) -> &str {
        &self.program.name
    }

    /// Stage that currently owns the job.
    pub fn stage(&self) -> Option<Stage> {
        self.status.stage()
    }

    /// Move to `next`, applying `patch`.
    ///
    /// Rejects edges the state machine does not define, which also makes
    /// terminal statuses final.
    pub fn transition(&mut self, next: JobStatus, patch: JobPatch) -> SchedResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(SchedError::InvalidJobState {
                job_id: self.id.to_string(),
                operation: format!("transition to {next}"),
                found: self.status.to_string(),
            });
        }

        let now = Utc::now();
        if self.status.stage() != next.stage() {
            self.timestamps.stage_entered = now;
        }
        if next == JobStatus::Executing {
            self.timestamps.execution_started = Some(now);
        }
        if next.is_terminal() {
            self.timestamps.completed = Some(now);
        }
        self.status = next;
        patch.apply(self);
        Ok(())
    }
}

/// Fields written together with a status change.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub result: Option<RawResult>,
    pub error: Option<ErrorRecord>,
    pub artifact: Option<ArtifactRef>,
    pub attempts: Option<u32>,
}

impl JobPatch {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn result(result: RawResult) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn error(error: ErrorRecord) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_artifact(mut self, artifact: Option<ArtifactRef>) -> Self {
        self.artifact = artifact;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    fn apply(self, job: &mut Job) {
        if let Some(result) = self.result {
            job.result = Some(result);
        }
        if let Some(error) = self.error {
            job.error = Some(error);
        }
        if let Some(artifact) = self.artifact {
            job.artifact = Some(artifact);
        }
        if let Some(attempts) = self.attempts {
            job.attempts = attempts;
        }
    }
}

/// Filter for querying jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Filter by status.
    pub status: Option<Vec<JobStatus>>,

    /// Filter by minimum priority.
    pub min_priority: Option<Priority>,

    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Jobs that have not reached a terminal status.
    pub fn active() -> Self {
        Self {
            status: Some(
                JobStatus::ALL
                    .into_iter()
                    .filter(|s| !s.is_terminal())
                    .collect(),
            ),
            ..Default::default()
        }
    }

    /// Filter by status.
    pub fn with_status(mut self, status: impl IntoIterator<Item = JobStatus>) -> Self {
        self.status = Some(status.into_iter().collect());
        self
    }

    /// Set the result limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if a job matches this filter.
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(ref statuses) = self.status {
            if !statuses.contains(&job.status) {
                return false;
            }
        }

        if let Some(min_priority) = self.min_priority {
            if job.priority < min_priority {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qpipe_hal::{Counts, PulseInstruction};

    fn program() -> PulseProgram {
        PulseProgram::new("rabi")
            .with_channel("d0")
            .with_instruction(PulseInstruction::delay("d0", 0, 16))
    }

    #[test]
    fn test_job_id() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);

        let parsed = JobId::parse(&id1.to_string()).unwrap();
        assert_eq!(id1, parsed);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::CRITICAL > Priority::HIGH);
        assert!(Priority::HIGH > Priority::DEFAULT);
        assert!(Priority::DEFAULT > Priority::LOW);
    }

    #[test]
    fn test_status_stage_consistency() {
        assert_eq!(JobStatus::Registered.stage(), Some(Stage::Intake));
        assert_eq!(JobStatus::Preprocessing.stage(), Some(Stage::Preprocessing));
        assert_eq!(JobStatus::QueuedForExecution.stage(), Some(Stage::Execution));
        assert_eq!(JobStatus::Executing.stage(), Some(Stage::Execution));
        for status in JobStatus::ALL {
            assert_eq!(status.is_terminal(), status.stage().is_none());
        }
    }

    #[test]
    fn test_terminal_statuses_have_no_edges() {
        for from in JobStatus::ALL.into_iter().filter(JobStatus::is_terminal) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_cancel_edges() {
        assert!(JobStatus::Registered.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Preprocessing.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::QueuedForExecution.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Executing.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn test_no_backward_or_skipping_edges() {
        assert!(!JobStatus::Preprocessing.can_transition_to(JobStatus::Registered));
        assert!(!JobStatus::Executing.can_transition_to(JobStatus::QueuedForExecution));
        assert!(!JobStatus::Registered.can_transition_to(JobStatus::Executing));
        assert!(!JobStatus::QueuedForExecution.can_transition_to(JobStatus::Done));
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&JobStatus::QueuedForExecution).unwrap(),
            "\"QUEUED_FOR_EXECUTION\""
        );
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::from_name(status.name()), Some(status));
        }
        assert_eq!(JobStatus::from_name("Pending"), None);
    }

    #[test]
    fn test_transition_applies_patch() {
        let mut job = Job::new(program());
        job.transition(JobStatus::Preprocessing, JobPatch::none())
            .unwrap();
        job.transition(JobStatus::QueuedForExecution, JobPatch::none())
            .unwrap();
        job.transition(JobStatus::Executing, JobPatch::none().with_attempts(1))
            .unwrap();
        assert!(job.timestamps.execution_started.is_some());

        let result = RawResult::new("sim1q", Counts::from_pairs([("0", 16)]), 16);
        job.transition(JobStatus::Done, JobPatch::result(result))
            .unwrap();

        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.attempts, 1);
        assert!(job.result.is_some());
        assert!(job.timestamps.completed.is_some());
        assert_eq!(job.stage(), None);
    }

    #[test]
    fn test_transition_rejects_illegal_edge() {
        let mut job = Job::new(program());
        let err = job
            .transition(JobStatus::Done, JobPatch::none())
            .unwrap_err();
        assert!(matches!(err, SchedError::InvalidJobState { .. }));
        assert_eq!(job.status, JobStatus::Registered);
    }

    #[test]
    fn test_job_filter() {
        let job = Job::new(program()).with_priority(Priority::HIGH);

        assert!(JobFilter::default().matches(&job));
        assert!(JobFilter::active().matches(&job));
        assert!(
            !JobFilter::default()
                .with_status([JobStatus::Done])
                .matches(&job)
        );

        let filter = JobFilter {
            min_priority: Some(Priority::CRITICAL),
            ..Default::default()
        };
        assert!(!filter.matches(&job));
    }

    #[test]
    fn test_job_serde_round_trip() {
        let job = Job::new(program()).with_hint(TopologyHint::backend("sim1q").with_qubits(1));
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.status, JobStatus::Registered);
        assert_eq!(back.hint.qubits, Some(1));
    }
}
