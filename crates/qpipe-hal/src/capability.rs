//! Backend capability introspection.
//!
//! [`Capabilities`] describe which instruction kinds and parametric
//! envelopes an executor can lower, how many qubits it drives and how many
//! shots it accepts. The translator rejects anything outside this set.

use serde::{Deserialize, Serialize};

use crate::program::InstructionKind;

/// Parametric envelope shapes known to the reference backends.
pub const STANDARD_PULSE_SHAPES: [&str; 4] = ["constant", "gaussian", "gaussian_square", "drag"];

/// Memory slots available when a serialized description omits them.
pub const DEFAULT_MAX_MEMORY_SLOTS: u32 = 64;

fn default_max_memory_slots() -> u32 {
    DEFAULT_MAX_MEMORY_SLOTS
}

/// Hardware capabilities of an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Name of the backend.
    pub name: String,
    /// Number of qubits available.
    pub num_qubits: u32,
    /// Whether this is a simulator (`true`) or real hardware (`false`).
    pub is_simulator: bool,
    /// Maximum number of shots per experiment.
    pub max_shots: u32,
    /// Number of classical memory slots acquisitions may write.
    #[serde(default = "default_max_memory_slots")]
    pub max_memory_slots: u32,
    /// Instruction kinds the backend accepts.
    pub instructions: Vec<InstructionKind>,
    /// Parametric envelope shapes the backend accepts.
    pub pulse_shapes: Vec<String>,
    /// Additional capability flags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

impl Capabilities {
    /// Capabilities of a pulse simulator.
    pub fn simulator(name: impl Into<String>, num_qubits: u32) -> Self {
        Self {
            name: name.into(),
            num_qubits,
            is_simulator: true,
            max_shots: 100_000,
            max_memory_slots: DEFAULT_MAX_MEMORY_SLOTS,
            instructions: InstructionKind::ALL.to_vec(),
            pulse_shapes: STANDARD_PULSE_SHAPES.iter().map(|s| (*s).to_string()).collect(),
            features: vec!["statevector".into()],
        }
    }

    /// Capabilities of an instrument cluster behind the hardware bridge.
    pub fn hardware(name: impl Into<String>, num_qubits: u32) -> Self {
        Self {
            name: name.into(),
            num_qubits,
            is_simulator: false,
            max_shots: 20_000,
            max_memory_slots: DEFAULT_MAX_MEMORY_SLOTS,
            instructions: InstructionKind::ALL.to_vec(),
            pulse_shapes: vec!["constant".into(), "gaussian".into(), "drag".into()],
            features: vec![],
        }
    }

    /// Restrict the accepted instruction kinds.
    pub fn with_instructions(mut self, kinds: impl IntoIterator<Item = InstructionKind>) -> Self {
        self.instructions = kinds.into_iter().collect();
        self
    }

    /// Set the number of classical memory slots.
    pub fn with_max_memory_slots(mut self, slots: u32) -> Self {
        self.max_memory_slots = slots;
        self
    }

    /// Whether an instruction kind is accepted.
    pub fn supports_instruction(&self, kind: InstructionKind) -> bool {
        self.instructions.contains(&kind)
    }

    /// Whether a parametric envelope shape is accepted.
    pub fn supports_shape(&self, shape: &str) -> bool {
        self.pulse_shapes.iter().any(|s| s == shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulator_capabilities() {
        let caps = Capabilities::simulator("sim", 2);
        assert!(caps.is_simulator);
        assert_eq!(caps.num_qubits, 2);
        assert!(caps.supports_instruction(InstructionKind::Acquire));
        assert!(caps.supports_shape("gaussian_square"));
        assert_eq!(caps.max_memory_slots, DEFAULT_MAX_MEMORY_SLOTS);
    }

    #[test]
    fn test_memory_slots_default_when_absent() {
        let mut value = serde_json::to_value(Capabilities::hardware("cluster", 2)).unwrap();
        value.as_object_mut().unwrap().remove("max_memory_slots");
        let caps: Capabilities = serde_json::from_value(value).unwrap();
        assert_eq!(caps.max_memory_slots, DEFAULT_MAX_MEMORY_SLOTS);
    }

    #[test]
    fn test_hardware_restrictions() {
        let caps = Capabilities::hardware("cluster", 5)
            .with_instructions([InstructionKind::LibraryPulse, InstructionKind::Acquire]);
        assert!(!caps.is_simulator);
        assert!(!caps.supports_instruction(InstructionKind::SetFrequency));
        assert!(!caps.supports_shape("gaussian_square"));
    }
}
