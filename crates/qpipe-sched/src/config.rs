//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};

/// Retry policy for recoverable executor failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Fixed delay before each retry, in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 0,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent intake workers.
    pub intake_workers: usize,

    /// Concurrent preprocessing workers.
    pub preprocessing_workers: usize,

    /// Upper bound for one executor run, in milliseconds.
    pub run_timeout_ms: u64,

    /// Retry policy for connection errors during execution.
    pub retry: RetryPolicy,

    /// Idle worker poll interval, in milliseconds.
    pub poll_interval_ms: u64,

    /// Maximum time `wait` blocks for a job, in milliseconds.
    pub max_wait_ms: u64,

    /// Working directory for pipeline state.
    pub state_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            intake_workers: 2,
            preprocessing_workers: 2,
            run_timeout_ms: 60_000,
            retry: RetryPolicy::default(),
            poll_interval_ms: 50,
            max_wait_ms: 3_600_000, // 1 hour
            state_dir: default_state_dir(),
        }
    }
}

impl PipelineConfig {
    pub fn with_workers(mut self, intake: usize, preprocessing: usize) -> Self {
        self.intake_workers = intake;
        self.preprocessing_workers = preprocessing;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait_ms = max_wait.as_millis() as u64;
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Reject configurations the orchestrator cannot run with.
    pub fn validate(&self) -> SchedResult<()> {
        if self.intake_workers == 0 || self.preprocessing_workers == 0 {
            return Err(SchedError::ConfigError(
                "worker counts must be at least 1".into(),
            ));
        }
        if self.run_timeout_ms == 0 {
            return Err(SchedError::ConfigError(
                "run_timeout_ms must be positive".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(SchedError::ConfigError(
                "poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// `QPIPE_STATE_DIR`, then `$XDG_RUNTIME_DIR/qpipe`, then the temp dir.
pub fn default_state_dir() -> PathBuf {
    std::env::var("QPIPE_STATE_DIR")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("XDG_RUNTIME_DIR").map(|d| PathBuf::from(d).join("qpipe")))
        .unwrap_or_else(|_| std::env::temp_dir().join("qpipe"))
}
