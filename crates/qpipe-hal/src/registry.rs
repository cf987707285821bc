//! Executor registry.
//!
//! The set of executor variants is closed: [`ExecutorKind`] enumerates
//! them and backend keys from configuration parse into it. The
//! [`ExecutorRegistry`] maps each kind to a factory and is consulted once
//! at startup to build the executor for the configured backend.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ExecutorConfig;
use crate::error::{HalError, HalResult};
use crate::executor::{Executor, ExecutorFactory};

/// Executor variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Instrument cluster reached through the hardware bridge.
    HardwareBridge,
    /// Single-qubit pulse simulator.
    SingleQubitSimulator,
    /// Two-qubit pulse simulator.
    TwoQubitSimulator,
}

impl ExecutorKind {
    /// All variants.
    pub const ALL: [ExecutorKind; 3] = [
        ExecutorKind::HardwareBridge,
        ExecutorKind::SingleQubitSimulator,
        ExecutorKind::TwoQubitSimulator,
    ];

    /// Canonical backend key.
    pub fn key(&self) -> &'static str {
        match self {
            ExecutorKind::HardwareBridge => "bridge",
            ExecutorKind::SingleQubitSimulator => "sim1q",
            ExecutorKind::TwoQubitSimulator => "sim2q",
        }
    }

    /// Whether the variant is a simulator.
    pub fn is_simulator(&self) -> bool {
        !matches!(self, ExecutorKind::HardwareBridge)
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ExecutorKind {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "bridge" | "hardware" | "hardware_bridge" => Ok(ExecutorKind::HardwareBridge),
            "sim1q" | "single_qubit_simulator" | "simulator_1q" => {
                Ok(ExecutorKind::SingleQubitSimulator)
            }
            "sim2q" | "two_qubit_simulator" | "simulator_2q" => Ok(ExecutorKind::TwoQubitSimulator),
            other => Err(HalError::Configuration(format!(
                "Unknown backend '{other}'. Available: bridge, sim1q, sim2q"
            ))),
        }
    }
}

/// Factory function type for executors.
type Factory = Box<dyn Fn(ExecutorConfig) -> HalResult<Box<dyn Executor>> + Send + Sync>;

/// Registry of executor factories keyed by variant.
pub struct ExecutorRegistry {
    factories: FxHashMap<ExecutorKind, Factory>,
}

impl ExecutorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: FxHashMap::default(),
        }
    }

    /// Register an executor type for a variant.
    pub fn register<E>(&mut self, kind: ExecutorKind)
    where
        E: ExecutorFactory + 'static,
    {
        debug!("Registering executor: {}", kind);
        self.factories.insert(
            kind,
            Box::new(|config| {
                let executor = E::from_config(config)?;
                Ok(Box::new(executor))
            }),
        );
    }

    /// Register a custom constructor for a variant.
    pub fn register_factory(
        &mut self,
        kind: ExecutorKind,
        factory: impl Fn(ExecutorConfig) -> HalResult<Box<dyn Executor>> + Send + Sync + 'static,
    ) {
        debug!("Registering executor factory: {}", kind);
        self.factories.insert(kind, Box::new(factory));
    }

    /// Build the executor selected by `config.backend`.
    pub fn create(&self, config: ExecutorConfig) -> HalResult<Box<dyn Executor>> {
        let kind: ExecutorKind = config.backend.parse()?;
        let factory = self.factories.get(&kind).ok_or_else(|| {
            HalError::BackendUnavailable(format!("No executor registered for '{kind}'"))
        })?;
        factory(config)
    }

    /// Registered variants, in declaration order.
    pub fn available(&self) -> Vec<ExecutorKind> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Check if a variant is registered.
    pub fn has(&self, kind: ExecutorKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind_aliases() {
        assert_eq!(
            "bridge".parse::<ExecutorKind>().unwrap(),
            ExecutorKind::HardwareBridge
        );
        assert_eq!(
            "Single-Qubit-Simulator".parse::<ExecutorKind>().unwrap(),
            ExecutorKind::SingleQubitSimulator
        );
        assert_eq!(
            "sim2q".parse::<ExecutorKind>().unwrap(),
            ExecutorKind::TwoQubitSimulator
        );
        assert!(matches!(
            "qasm".parse::<ExecutorKind>(),
            Err(HalError::Configuration(_))
        ));
    }

    #[test]
    fn test_key_round_trip() {
        for kind in ExecutorKind::ALL {
            assert_eq!(kind.key().parse::<ExecutorKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = ExecutorRegistry::new();
        assert!(registry.available().is_empty());
        assert!(!registry.has(ExecutorKind::SingleQubitSimulator));
    }

    #[test]
    fn test_create_unregistered_kind() {
        let registry = ExecutorRegistry::new();
        let result = registry.create(ExecutorConfig::new("sim1q"));
        assert!(matches!(result, Err(HalError::BackendUnavailable(_))));
    }

    #[test]
    fn test_create_unknown_backend() {
        let registry = ExecutorRegistry::new();
        let result = registry.create(ExecutorConfig::new("nonexistent"));
        assert!(matches!(result, Err(HalError::Configuration(_))));
    }

    #[test]
    fn test_available_sorted() {
        let mut registry = ExecutorRegistry::new();
        registry.register_factory(ExecutorKind::TwoQubitSimulator, |_| {
            Err(HalError::BackendUnavailable("test".into()))
        });
        registry.register_factory(ExecutorKind::HardwareBridge, |_| {
            Err(HalError::BackendUnavailable("test".into()))
        });

        assert_eq!(
            registry.available(),
            vec![ExecutorKind::HardwareBridge, ExecutorKind::TwoQubitSimulator]
        );
        assert!(registry.has(ExecutorKind::HardwareBridge));
    }
}
