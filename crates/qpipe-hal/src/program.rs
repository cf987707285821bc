//! Pulse program representation.
//!
//! A [`PulseProgram`] is the generic, backend-independent input to the
//! pipeline: a named list of timed instructions addressed to logical
//! channels, plus a library of sampled waveforms. The wire format is
//! qobj-like JSON:
//!
//! ```json
//! {
//!   "name": "rabi",
//!   "channels": ["d0", "m0"],
//!   "shots": 1024,
//!   "pulse_library": { "x90": [[0.1, 0.0], [0.1, 0.0]] },
//!   "instructions": [
//!     { "name": "x90", "ch": "d0", "t0": 0 },
//!     { "name": "acquire", "t0": 16, "duration": 400, "qubits": [0], "memory_slot": [0] }
//!   ]
//! }
//! ```
//!
//! Times (`t0`, `duration`) are in nanoseconds. Frequencies are in Hz and
//! phases in radians.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default number of shots when a program does not specify one.
pub const DEFAULT_SHOTS: u32 = 1024;

fn default_shots() -> u32 {
    DEFAULT_SHOTS
}

/// A sampled waveform: `[re, im]` amplitude pairs, one per nanosecond.
pub type Samples = Vec<[f64; 2]>;

/// Kind of a logical channel, taken from its prefix letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// `d<n>`: qubit drive.
    Drive,
    /// `m<n>`: readout stimulus.
    Measure,
    /// `u<n>`: cross-resonance control between two qubits.
    Control,
    /// `a<n>`: acquisition.
    Acquire,
}

impl ChannelKind {
    fn prefix(self) -> char {
        match self {
            ChannelKind::Drive => 'd',
            ChannelKind::Measure => 'm',
            ChannelKind::Control => 'u',
            ChannelKind::Acquire => 'a',
        }
    }
}

/// A parsed logical channel name such as `d0` or `u1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalChannel {
    /// Channel kind.
    pub kind: ChannelKind,
    /// Channel index.
    pub index: u32,
}

impl LogicalChannel {
    /// Drive channel for a qubit.
    pub fn drive(qubit: u32) -> Self {
        Self {
            kind: ChannelKind::Drive,
            index: qubit,
        }
    }

    /// Readout channel for a qubit.
    pub fn measure(qubit: u32) -> Self {
        Self {
            kind: ChannelKind::Measure,
            index: qubit,
        }
    }

    /// Control channel with the given index.
    pub fn control(index: u32) -> Self {
        Self {
            kind: ChannelKind::Control,
            index,
        }
    }
}

impl fmt::Display for LogicalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.index)
    }
}

impl FromStr for LogicalChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let kind = match chars.next() {
            Some('d') => ChannelKind::Drive,
            Some('m') => ChannelKind::Measure,
            Some('u') => ChannelKind::Control,
            Some('a') => ChannelKind::Acquire,
            _ => return Err(format!("unrecognized channel '{s}'")),
        };
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("unrecognized channel '{s}'"));
        }
        let index = digits
            .parse()
            .map_err(|_| format!("channel index out of range in '{s}'"))?;
        Ok(Self { kind, index })
    }
}

/// Classification of a pulse instruction by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    /// `parametric_pulse`: an analytic envelope given by shape and parameters.
    ParametricPulse,
    /// A pulse whose name refers to an entry of the pulse library.
    LibraryPulse,
    /// `acquire`: readout integration into memory slots.
    Acquire,
    /// `delay`: idle time on a channel.
    Delay,
    /// `setf`: set the channel frequency.
    SetFrequency,
    /// `shiftf`: shift the channel frequency.
    ShiftFrequency,
    /// `setp`: set the channel phase.
    SetPhase,
    /// `fc`: frame change, shifts the channel phase.
    ShiftPhase,
}

impl InstructionKind {
    /// All instruction kinds.
    pub const ALL: [InstructionKind; 8] = [
        InstructionKind::ParametricPulse,
        InstructionKind::LibraryPulse,
        InstructionKind::Acquire,
        InstructionKind::Delay,
        InstructionKind::SetFrequency,
        InstructionKind::ShiftFrequency,
        InstructionKind::SetPhase,
        InstructionKind::ShiftPhase,
    ];
}

/// One instruction of a pulse program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseInstruction {
    /// Instruction name (`parametric_pulse`, `acquire`, `fc`, a library pulse, ...).
    pub name: String,
    /// Start time in nanoseconds.
    #[serde(default)]
    pub t0: u64,
    /// Target logical channel. Absent for `acquire`, which targets `m<q>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ch: Option<String>,
    /// Duration in nanoseconds, for `acquire` and `delay`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Phase in radians, for `setp` and `fc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<f64>,
    /// Frequency in Hz, for `setf` and `shiftf`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    /// Envelope shape, for `parametric_pulse`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulse_shape: Option<String>,
    /// Envelope parameters, for `parametric_pulse`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
    /// Measured qubits, for `acquire`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qubits: Vec<u32>,
    /// Memory slots receiving each acquisition, for `acquire`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory_slot: Vec<u32>,
}

impl PulseInstruction {
    fn bare(name: impl Into<String>, t0: u64) -> Self {
        Self {
            name: name.into(),
            t0,
            ch: None,
            duration: None,
            phase: None,
            frequency: None,
            pulse_shape: None,
            parameters: None,
            qubits: Vec::new(),
            memory_slot: Vec::new(),
        }
    }

    /// A pulse from the program's pulse library.
    pub fn play(name: impl Into<String>, ch: impl Into<String>, t0: u64) -> Self {
        Self {
            ch: Some(ch.into()),
            ..Self::bare(name, t0)
        }
    }

    /// A parametric pulse. `parameters` must carry `duration`.
    pub fn parametric(
        ch: impl Into<String>,
        t0: u64,
        shape: impl Into<String>,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            ch: Some(ch.into()),
            pulse_shape: Some(shape.into()),
            parameters: Some(parameters),
            ..Self::bare("parametric_pulse", t0)
        }
    }

    /// Acquire `qubits` into the matching `memory_slots`.
    pub fn acquire(t0: u64, duration: u64, qubits: Vec<u32>, memory_slots: Vec<u32>) -> Self {
        Self {
            duration: Some(duration),
            qubits,
            memory_slot: memory_slots,
            ..Self::bare("acquire", t0)
        }
    }

    /// Idle on a channel.
    pub fn delay(ch: impl Into<String>, t0: u64, duration: u64) -> Self {
        Self {
            ch: Some(ch.into()),
            duration: Some(duration),
            ..Self::bare("delay", t0)
        }
    }

    /// Frame change (phase shift).
    pub fn shift_phase(ch: impl Into<String>, t0: u64, phase: f64) -> Self {
        Self {
            ch: Some(ch.into()),
            phase: Some(phase),
            ..Self::bare("fc", t0)
        }
    }

    /// Set the channel phase.
    pub fn set_phase(ch: impl Into<String>, t0: u64, phase: f64) -> Self {
        Self {
            ch: Some(ch.into()),
            phase: Some(phase),
            ..Self::bare("setp", t0)
        }
    }

    /// Set the channel frequency.
    pub fn set_frequency(ch: impl Into<String>, t0: u64, frequency: f64) -> Self {
        Self {
            ch: Some(ch.into()),
            frequency: Some(frequency),
            ..Self::bare("setf", t0)
        }
    }

    /// Shift the channel frequency.
    pub fn shift_frequency(ch: impl Into<String>, t0: u64, frequency: f64) -> Self {
        Self {
            ch: Some(ch.into()),
            frequency: Some(frequency),
            ..Self::bare("shiftf", t0)
        }
    }

    /// Classify this instruction. Returns `None` for names that are neither
    /// built in nor present in `library`.
    pub fn kind(&self, library: &BTreeMap<String, Samples>) -> Option<InstructionKind> {
        match self.name.as_str() {
            "parametric_pulse" => Some(InstructionKind::ParametricPulse),
            "acquire" => Some(InstructionKind::Acquire),
            "delay" => Some(InstructionKind::Delay),
            "setf" => Some(InstructionKind::SetFrequency),
            "shiftf" => Some(InstructionKind::ShiftFrequency),
            "setp" => Some(InstructionKind::SetPhase),
            "fc" => Some(InstructionKind::ShiftPhase),
            other if library.contains_key(other) => Some(InstructionKind::LibraryPulse),
            _ => None,
        }
    }

    /// Logical channels this instruction touches.
    pub fn channels(&self) -> Vec<String> {
        if self.name == "acquire" {
            self.qubits
                .iter()
                .map(|q| LogicalChannel::measure(*q).to_string())
                .collect()
        } else {
            self.ch.iter().cloned().collect()
        }
    }

    /// Numeric parameter lookup for parametric pulses.
    pub fn parameter_f64(&self, key: &str) -> Option<f64> {
        self.parameters.as_ref()?.get(key)?.as_f64()
    }
}

/// Result of checking a program's shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// The program is well formed.
    Valid,
    /// The program is malformed.
    Invalid {
        /// Reasons the program is malformed.
        reasons: Vec<String>,
    },
}

impl ValidationResult {
    /// Check if the program is well formed.
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// A generic pulse-level program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseProgram {
    /// Program identity.
    pub name: String,
    /// Declared logical channels.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Instruction stream, in program order.
    #[serde(default)]
    pub instructions: Vec<PulseInstruction>,
    /// Named sampled waveforms.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pulse_library: BTreeMap<String, Samples>,
    /// Number of repetitions.
    #[serde(default = "default_shots")]
    pub shots: u32,
}

impl PulseProgram {
    /// Create an empty program.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: Vec::new(),
            instructions: Vec::new(),
            pulse_library: BTreeMap::new(),
            shots: DEFAULT_SHOTS,
        }
    }

    /// Declare a logical channel.
    pub fn with_channel(mut self, ch: impl Into<String>) -> Self {
        self.channels.push(ch.into());
        self
    }

    /// Append an instruction.
    pub fn with_instruction(mut self, instruction: PulseInstruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// Add a waveform to the pulse library.
    pub fn with_pulse(mut self, name: impl Into<String>, samples: Samples) -> Self {
        self.pulse_library.insert(name.into(), samples);
        self
    }

    /// Set the number of shots.
    pub fn with_shots(mut self, shots: u32) -> Self {
        self.shots = shots;
        self
    }

    /// Parse a program from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Number of instructions.
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// All channels referenced by instructions.
    pub fn referenced_channels(&self) -> BTreeSet<String> {
        self.instructions
            .iter()
            .flat_map(PulseInstruction::channels)
            .collect()
    }

    /// Highest qubit index addressed through drive, readout or acquire channels.
    pub fn max_qubit(&self) -> Option<u32> {
        self.channels
            .iter()
            .filter_map(|ch| ch.parse::<LogicalChannel>().ok())
            .filter(|ch| ch.kind != ChannelKind::Control)
            .map(|ch| ch.index)
            .chain(self.instructions.iter().flat_map(|i| i.qubits.iter().copied()))
            .max()
    }

    /// Check the minimal shape the pipeline relies on: a non-empty
    /// instruction stream, a recognized channel set covering every
    /// referenced channel, and consistent acquire operands.
    pub fn validate(&self) -> ValidationResult {
        let mut reasons = Vec::new();

        if self.name.trim().is_empty() {
            reasons.push("program name is empty".to_string());
        }
        if self.instructions.is_empty() {
            reasons.push("instruction stream is empty".to_string());
        }
        if self.shots == 0 {
            reasons.push("shots must be positive".to_string());
        }

        let mut declared = BTreeSet::new();
        for ch in &self.channels {
            match ch.parse::<LogicalChannel>() {
                Ok(_) => {
                    declared.insert(ch.as_str());
                }
                Err(e) => reasons.push(e),
            }
        }

        for (idx, inst) in self.instructions.iter().enumerate() {
            if inst.name == "acquire" {
                if inst.qubits.is_empty() {
                    reasons.push(format!("instruction {idx}: acquire without qubits"));
                }
                if inst.qubits.len() != inst.memory_slot.len() {
                    reasons.push(format!(
                        "instruction {idx}: acquire has {} qubits but {} memory slots",
                        inst.qubits.len(),
                        inst.memory_slot.len()
                    ));
                }
            } else if inst.ch.is_none() {
                reasons.push(format!("instruction {idx} ('{}') has no channel", inst.name));
            }

            for ch in inst.channels() {
                if !declared.contains(ch.as_str()) {
                    reasons.push(format!(
                        "instruction {idx} ('{}') uses undeclared channel '{ch}'",
                        inst.name
                    ));
                }
            }
        }

        if reasons.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { reasons }
        }
    }
}
