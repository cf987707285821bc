//! qpipe Pulse Simulators
//!
//! This crate provides the two simulator executors: a single-qubit and a
//! two-qubit statevector simulator that run native experiments produced by
//! the `qpipe-hal` translator. They are used for development, for testing
//! pulse programs before they reach hardware, and as the test double for
//! the job pipeline.
//!
//! # Features
//!
//! - **Pulse-level model**: Drive area sets the rotation angle, carrier
//!   phase sets the rotation axis
//! - **Cross-resonance**: Control channel `u0` couples the two qubits of `sim2q`
//! - **Reproducible**: A fixed `seed` gives identical counts run after run
//! - **Fault injection**: [`SimHandle`] queues hangs, failures and link drops
//!
//! # Example
//!
//! ```ignore
//! use qpipe_adapter_sim::SimulatorExecutor;
//! use qpipe_hal::{Executor, ExecutorConfig, PulseProgram};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sim = SimulatorExecutor::single_qubit(ExecutorConfig::new("sim1q"))?;
//!
//!     let program = PulseProgram::from_json(&std::fs::read_to_string("rabi.json")?)?;
//!     let experiment = sim.compile(&program)?;
//!
//!     sim.prepare().await?;
//!     let result = sim.execute(&experiment).await?;
//!     println!("Results: {:?}", result.counts);
//!
//!     Ok(())
//! }
//! ```

mod fault;
mod simulator;
mod statevector;

pub use fault::{Fault, SimHandle};
pub use simulator::{DEFAULT_RABI_RATE, SimulatorExecutor};

use qpipe_hal::{ExecutorKind, ExecutorRegistry};

/// Register both simulator variants.
pub fn register(registry: &mut ExecutorRegistry) {
    registry.register::<SimulatorExecutor>(ExecutorKind::SingleQubitSimulator);
    registry.register::<SimulatorExecutor>(ExecutorKind::TwoQubitSimulator);
}
