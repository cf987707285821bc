//! Error types for the hardware bridge.

use qpipe_hal::HalError;
use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur when talking to the control server.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No control server URL configured.
    #[error("Missing endpoint: set `endpoint` in the executor configuration")]
    MissingEndpoint,

    /// The control server answered with an error status.
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// The control server reported the experiment as failed.
    #[error("Experiment rejected: {0}")]
    Rejected(String),

    /// The cluster is up but not ready to take experiments.
    #[error("Cluster not ready: {0}")]
    NotReady(String),
}

impl BridgeError {
    /// Whether the failure is a lost or unreachable link.
    pub fn is_link_failure(&self) -> bool {
        match self {
            BridgeError::Http(e) => e.is_connect() || e.is_timeout(),
            BridgeError::ApiError { status, .. } => matches!(status, 502..=504),
            BridgeError::NotReady(_) => true,
            _ => false,
        }
    }
}

impl From<BridgeError> for HalError {
    fn from(e: BridgeError) -> Self {
        if e.is_link_failure() {
            return HalError::Connection(e.to_string());
        }
        match e {
            BridgeError::MissingEndpoint => HalError::Configuration(e.to_string()),
            BridgeError::ApiError { status: 401, .. } | BridgeError::ApiError { status: 403, .. } => {
                HalError::Configuration(e.to_string())
            }
            _ => HalError::Execution(e.to_string()),
        }
    }
}
