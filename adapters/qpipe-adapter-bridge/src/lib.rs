//! qpipe Hardware Bridge
//!
//! This crate provides the executor that drives a physical instrument
//! cluster. Native experiments produced by the `qpipe-hal` translator are
//! posted to the cluster's control server, which plays them on the
//! sequencers and returns the acquired counts.
//!
//! # Configuration
//!
//! | Field | Required | Meaning |
//! |-------|----------|---------|
//! | `endpoint` | yes | Control server URL |
//! | `topology` | yes | Logical channel to instrument port bindings |
//! | `token` | no | Bearer token, sent on every request |
//! | `request_timeout_ms` | no | Upper bound on one HTTP exchange |
//!
//! # Failure mapping
//!
//! Unreachable servers, gateway errors (502-504) and a cluster that is not
//! ready map to `HalError::Connection`, which the pipeline retries after a
//! reconnect. Everything else is an `HalError::Execution`.
//!
//! # Example
//!
//! ```ignore
//! use qpipe_adapter_bridge::BridgeExecutor;
//! use qpipe_hal::{ExecutorConfig, ExecutorFactory, TopologyMap};
//!
//! let config = ExecutorConfig::new("bridge")
//!     .with_endpoint("http://cluster-ctl:8080")
//!     .with_topology(TopologyMap::standard(2, "awg0"));
//! let executor = BridgeExecutor::from_config(config)?;
//! ```

pub mod api;
mod backend;
pub mod error;

pub use backend::BridgeExecutor;
pub use error::{BridgeError, BridgeResult};

use qpipe_hal::{ExecutorKind, ExecutorRegistry};

/// Register the hardware bridge.
pub fn register(registry: &mut ExecutorRegistry) {
    registry.register::<BridgeExecutor>(ExecutorKind::HardwareBridge);
}
