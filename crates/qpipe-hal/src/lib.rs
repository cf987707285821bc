//! qpipe Hardware Abstraction Layer
//!
//! This crate turns a generic pulse program into something a concrete
//! backend can run, and runs it without ever letting two experiments drive
//! the same hardware at once.
//!
//! # Overview
//!
//! - [`PulseProgram`]: the backend-independent input (channels, timed
//!   instructions, pulse library, shots)
//! - [`TopologyMap`] and [`Capabilities`]: what a backend is wired to and
//!   what it accepts
//! - [`Translator`]: deterministic lowering to a [`NativeExperiment`]
//! - [`Executor`]: the trait every backend variant implements
//! - [`ExecutorInstance`]: connection state, busy lock and run timeout
//!   around one executor
//! - [`ExecutorRegistry`]: startup-time selection of the executor variant
//!
//! # Executor variants
//!
//! | Variant | Key | Crate |
//! |---------|-----|-------|
//! | Hardware bridge | `bridge` | `qpipe-adapter-bridge` |
//! | Single-qubit simulator | `sim1q` | `qpipe-adapter-sim` |
//! | Two-qubit simulator | `sim2q` | `qpipe-adapter-sim` |
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use qpipe_hal::{ExecutorConfig, ExecutorInstance, ExecutorRegistry, PulseProgram};
//!
//! let mut registry = ExecutorRegistry::new();
//! qpipe_adapter_sim::register(&mut registry);
//!
//! let executor = registry.create(ExecutorConfig::new("sim1q"))?;
//! let instance = ExecutorInstance::new(executor);
//! instance.prepare().await?;
//!
//! let program = PulseProgram::from_json(&std::fs::read_to_string("rabi.json")?)?;
//! let experiment = instance.compile(&program)?;
//! let result = instance.run(&experiment, Duration::from_secs(30)).await?;
//! println!("{:?}", result.counts.most_frequent());
//! ```

pub mod capability;
pub mod config;
pub mod error;
pub mod executor;
pub mod instance;
pub mod native;
pub mod program;
pub mod registry;
pub mod result;
pub mod topology;
pub mod translator;

pub use capability::{Capabilities, DEFAULT_MAX_MEMORY_SLOTS};
pub use config::ExecutorConfig;
pub use error::{HalError, HalResult};
pub use executor::{Executor, ExecutorFactory};
pub use instance::{ConnectionState, ExecutorInstance};
pub use native::{NativeChannel, NativeExperiment, NativeInstruction, NativeOp, Waveform};
pub use program::{
    ChannelKind, InstructionKind, LogicalChannel, PulseInstruction, PulseProgram, Samples,
    ValidationResult,
};
pub use registry::{ExecutorKind, ExecutorRegistry};
pub use result::{Counts, RawResult};
pub use topology::{InstrumentAddress, TopologyMap};
pub use translator::{Translator, translate};
