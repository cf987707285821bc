//! Error types for the HAL crate.

use thiserror::Error;

/// Errors that can occur in HAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HalError {
    /// A logical channel has no instrument binding in the topology map.
    #[error("Unresolved channel: {0}")]
    UnresolvedChannel(String),

    /// The program cannot be lowered for this executor.
    #[error("Transpile error: {0}")]
    Transpile(String),

    /// The backend could not be reached or dropped its connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend reported a failure while running an experiment.
    #[error("Execution error: {0}")]
    Execution(String),

    /// A run did not finish within its time budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// No executor is registered for the requested backend.
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unsupported feature.
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HalError {
    /// Whether the failure is worth retrying after re-preparing the executor.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HalError::Connection(_))
    }

    /// Whether the failure happened while translating a program.
    pub fn is_transpile(&self) -> bool {
        matches!(
            self,
            HalError::UnresolvedChannel(_) | HalError::Transpile(_)
        )
    }
}

/// Result type for HAL operations.
pub type HalResult<T> = Result<T, HalError>;
