//! Error handling for the job pipeline.

use qpipe_hal::HalError;
use thiserror::Error;

use crate::job::ErrorKind;

/// Result type for pipeline operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur during pipeline operations.
#[derive(Error, Debug)]
pub enum SchedError {
    /// Submission payload is malformed. No job was created.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Program could not be translated for the executor.
    #[error("Transpile error: {0}")]
    TranspileError(String),

    /// Executor link failure.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Executor reported a failure while running.
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// A run or a wait exceeded its time budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation not allowed in the job's current status.
    #[error("Invalid job state for {operation}: job {job_id} is {found}")]
    InvalidJobState {
        job_id: String,
        operation: String,
        found: String,
    },

    /// Result requested before the job reached DONE or FAILED.
    #[error("Result not ready: job {job_id} is {status}")]
    NotReady { job_id: String, status: String },

    /// Compare-and-set found a different status than expected.
    #[error("Status conflict on job {job_id}: expected {expected}, found {found}")]
    StatusConflict {
        job_id: String,
        expected: String,
        found: String,
    },

    /// Job not found in the store.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Executor error outside the pipeline taxonomy.
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Persistence error.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// SQLite database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal pipeline error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedError {
    /// Kind recorded on a job that fails with this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedError::ValidationError(_) => ErrorKind::Validation,
            SchedError::TranspileError(_) => ErrorKind::Transpile,
            SchedError::ConnectionError(_) => ErrorKind::Connection,
            SchedError::ExecutionError(_) | SchedError::BackendError(_) => ErrorKind::Execution,
            SchedError::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether this error came from the job store rather than the job.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            SchedError::PersistenceError(_)
                | SchedError::DatabaseError(_)
                | SchedError::IoError(_)
                | SchedError::JsonError(_)
        )
    }
}

impl From<HalError> for SchedError {
    fn from(e: HalError) -> Self {
        match e {
            HalError::UnresolvedChannel(_) | HalError::Transpile(_) | HalError::Unsupported(_) => {
                SchedError::TranspileError(e.to_string())
            }
            HalError::Connection(msg) => SchedError::ConnectionError(msg),
            HalError::Execution(msg) => SchedError::ExecutionError(msg),
            HalError::Timeout(msg) => SchedError::Timeout(msg),
            HalError::Configuration(msg) => SchedError::ConfigError(msg),
            other => SchedError::BackendError(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for SchedError {
    fn from(e: rusqlite::Error) -> Self {
        SchedError::DatabaseError(e.to_string())
    }
}
