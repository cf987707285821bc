//! Backend-native experiment representation.
//!
//! A [`NativeExperiment`] is what the translator produces and what an
//! executor runs: per-channel instruction sequences aligned to the
//! backend time grid, each channel bound to an instrument output, plus the
//! waveforms the play instructions reference.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::program::Samples;
use crate::topology::InstrumentAddress;

/// A waveform referenced by `Play` instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Waveform {
    /// Explicit samples from the pulse library.
    Samples {
        /// `[re, im]` amplitude pairs.
        samples: Samples,
    },
    /// Analytic envelope evaluated by the backend.
    Parametric {
        /// Envelope shape.
        shape: String,
        /// Envelope parameters.
        parameters: serde_json::Map<String, serde_json::Value>,
    },
}

impl Waveform {
    /// Integrated complex amplitude `(re, im)` over the waveform, in
    /// amplitude·ns. Parametric envelopes are approximated by their peak
    /// amplitude over the `duration` parameter scaled by a shape factor.
    pub fn area(&self) -> (f64, f64) {
        match self {
            Waveform::Samples { samples } => samples
                .iter()
                .fold((0.0, 0.0), |(re, im), [a, b]| (re + a, im + b)),
            Waveform::Parametric { shape, parameters } => {
                let duration = parameters
                    .get("duration")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(0.0);
                let (amp_re, amp_im) = match parameters.get("amp") {
                    Some(serde_json::Value::Array(parts)) => (
                        parts.first().and_then(serde_json::Value::as_f64).unwrap_or(0.0),
                        parts.get(1).and_then(serde_json::Value::as_f64).unwrap_or(0.0),
                    ),
                    Some(value) => (value.as_f64().unwrap_or(0.0), 0.0),
                    None => (0.0, 0.0),
                };
                let fill = match shape.as_str() {
                    "constant" => 1.0,
                    "gaussian_square" => {
                        let width = parameters
                            .get("width")
                            .and_then(serde_json::Value::as_f64)
                            .unwrap_or(0.0);
                        if duration > 0.0 {
                            (width + (duration - width) * 0.5) / duration
                        } else {
                            0.0
                        }
                    }
                    _ => 0.5,
                };
                (amp_re * duration * fill, amp_im * duration * fill)
            }
        }
    }
}

/// Operation carried by a native instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NativeOp {
    /// Play a waveform from [`NativeExperiment::waveforms`].
    Play {
        /// Waveform key.
        waveform: String,
    },
    /// Integrate the readout of `qubit` into `memory_slot`.
    Acquire {
        /// Measured qubit.
        qubit: u32,
        /// Destination memory slot.
        memory_slot: u32,
        /// Acquisition counter on this channel.
        index: u32,
    },
    /// Idle.
    Wait,
    /// Set the channel frequency (Hz).
    SetFrequency {
        /// New frequency.
        value: f64,
    },
    /// Shift the channel frequency (Hz).
    ShiftFrequency {
        /// Frequency delta.
        value: f64,
    },
    /// Set the channel phase (rad).
    SetPhase {
        /// New phase.
        value: f64,
    },
    /// Shift the channel phase (rad).
    ShiftPhase {
        /// Phase delta.
        value: f64,
    },
}

/// One grid-aligned instruction on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeInstruction {
    /// Start time on the grid, in nanoseconds.
    pub t0: u64,
    /// Duration on the grid, in nanoseconds.
    pub duration: u64,
    /// Channel phase in effect once this instruction has been applied.
    pub phase: f64,
    /// Channel frequency in effect once this instruction has been applied.
    pub frequency: f64,
    /// The operation.
    pub op: NativeOp,
}

impl NativeInstruction {
    /// End time on the grid.
    pub fn end(&self) -> u64 {
        self.t0 + self.duration
    }
}

/// Instruction sequence of one logical channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeChannel {
    /// Instrument output the channel is bound to.
    pub address: InstrumentAddress,
    /// Instructions ordered by start time, non-overlapping.
    pub instructions: Vec<NativeInstruction>,
}

/// A translated, backend-ready experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeExperiment {
    /// Name of the source program.
    pub name: String,
    /// Number of repetitions.
    pub shots: u32,
    /// Per-channel sequences keyed by logical channel name.
    pub channels: BTreeMap<String, NativeChannel>,
    /// Waveforms keyed by the names `Play` instructions use.
    pub waveforms: BTreeMap<String, Waveform>,
    /// Number of classical memory slots written by acquisitions.
    pub memory_slots: u32,
    /// Expected duration of one shot, in nanoseconds.
    pub duration_ns: u64,
}

impl NativeExperiment {
    /// Total number of native instructions.
    pub fn instruction_count(&self) -> usize {
        self.channels.values().map(|c| c.instructions.len()).sum()
    }

    /// All instructions across channels ordered by start time. Ties keep
    /// channel-name order, then per-channel order.
    pub fn timeline(&self) -> Vec<(&str, &NativeInstruction)> {
        let mut events: Vec<_> = self
            .channels
            .iter()
            .flat_map(|(name, ch)| ch.instructions.iter().map(move |i| (name.as_str(), i)))
            .collect();
        events.sort_by_key(|(_, inst)| inst.t0);
        events
    }

    /// `(qubit, memory_slot)` pairs in acquisition order.
    pub fn acquisitions(&self) -> Vec<(u32, u32)> {
        self.timeline()
            .into_iter()
            .filter_map(|(_, inst)| match inst.op {
                NativeOp::Acquire {
                    qubit, memory_slot, ..
                } => Some((qubit, memory_slot)),
                _ => None,
            })
            .collect()
    }
}
