//! Executor trait.
//!
//! # Lifecycle
//!
//! ```text
//!   prepare() ──→ compile() ──→ execute() ──→ shutdown()
//!    (async)       (sync)        (async)        (async)
//!                                   │
//!                                abort() on timeout
//! ```
//!
//! | Method | Kind | Required | Returns |
//! |--------|------|----------|---------|
//! | `name()` | sync | yes | `&str` |
//! | `kind()` | sync | yes | `ExecutorKind` |
//! | `capabilities()` | sync | yes | `&Capabilities` |
//! | `topology()` | sync | yes | `&TopologyMap` |
//! | `prepare()` | async | yes | `HalResult<()>` |
//! | `compile()` | sync | provided | `HalResult<NativeExperiment>` |
//! | `execute()` | async | yes | `HalResult<RawResult>` |
//! | `abort()` | async | yes | `HalResult<()>` |
//! | `shutdown()` | async | yes | `HalResult<()>` |
//!
//! Executors are not required to serialize access themselves. Callers go
//! through [`ExecutorInstance`](crate::ExecutorInstance), which guarantees
//! that at most one experiment is in `execute()` at a time and enforces the
//! run timeout.

use async_trait::async_trait;

use crate::capability::Capabilities;
use crate::config::ExecutorConfig;
use crate::error::HalResult;
use crate::native::NativeExperiment;
use crate::program::PulseProgram;
use crate::registry::ExecutorKind;
use crate::result::RawResult;
use crate::topology::TopologyMap;
use crate::translator::Translator;

/// A backend that can run native experiments.
///
/// # Contract
///
/// - `capabilities()` and `topology()` MUST be synchronous and infallible,
///   cached at construction time.
/// - `prepare()` MUST be idempotent. A failure to reach the backend is a
///   `HalError::Connection`.
/// - `compile()` MUST be deterministic. The provided implementation runs
///   the [`Translator`] against `topology()` and `capabilities()`.
/// - `execute()` reports recoverable link failures as
///   `HalError::Connection` and everything else as `HalError::Execution`.
/// - `abort()` stops the experiment currently in `execute()`, if any.
/// - `shutdown()` MUST be idempotent.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &str;

    /// Variant of this executor.
    fn kind(&self) -> ExecutorKind;

    /// Capabilities of this executor.
    fn capabilities(&self) -> &Capabilities;

    /// Channel bindings of this executor.
    fn topology(&self) -> &TopologyMap;

    /// Establish (or confirm) the link to the backend.
    async fn prepare(&self) -> HalResult<()>;

    /// Translate a pulse program into this executor's native form.
    fn compile(&self, program: &PulseProgram) -> HalResult<NativeExperiment> {
        Translator::new(self.topology(), self.capabilities()).translate(program)
    }

    /// Run a native experiment to completion.
    async fn execute(&self, experiment: &NativeExperiment) -> HalResult<RawResult>;

    /// Stop the experiment currently running.
    async fn abort(&self) -> HalResult<()>;

    /// Release held resources.
    async fn shutdown(&self) -> HalResult<()>;
}

/// Trait for creating executors from configuration.
pub trait ExecutorFactory: Executor + Sized {
    /// Create an executor from configuration.
    fn from_config(config: ExecutorConfig) -> HalResult<Self>;
}
