//! Pulse program to native experiment translation.
//!
//! The [`Translator`] is stateless: it borrows a backend's topology and
//! capabilities and maps a [`PulseProgram`] onto per-channel native
//! instruction sequences.
//!
//! Translation runs in two passes:
//!
//! 1. **Lowering**, in program order. Each instruction is classified,
//!    checked against the capabilities, and its target channels are
//!    resolved through the topology. Start times and durations are rounded
//!    up onto the time grid. The first failing instruction aborts the
//!    translation.
//! 2. **Scheduling**, per channel. Lowered instructions are ordered by
//!    `(t0, program index)` and walked with a time cursor. An instruction
//!    that would start before the previous one on its channel has ended is
//!    delayed to the cursor. Phase, frequency and acquisition counters are
//!    tracked along the way and stamped on every native instruction.
//!
//! The output depends only on the inputs, so translating the same program
//! twice yields identical experiments.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::capability::Capabilities;
use crate::error::{HalError, HalResult};
use crate::native::{NativeChannel, NativeExperiment, NativeInstruction, NativeOp, Waveform};
use crate::program::{InstructionKind, PulseInstruction, PulseProgram};
use crate::topology::TopologyMap;

/// A lowered instruction awaiting scheduling on its channel.
#[derive(Debug)]
struct Lowered {
    t0: u64,
    duration: u64,
    order: usize,
    action: Action,
}

#[derive(Debug)]
enum Action {
    Play(String),
    Acquire { qubit: u32, memory_slot: u32 },
    Wait,
    SetFrequency(f64),
    ShiftFrequency(f64),
    SetPhase(f64),
    ShiftPhase(f64),
}

/// Per-channel running state during scheduling.
#[derive(Debug, Default)]
struct ChannelState {
    cursor: u64,
    phase: f64,
    frequency: f64,
    acquisitions: u32,
}

/// Stateless pulse translator bound to one backend description.
#[derive(Debug, Clone, Copy)]
pub struct Translator<'a> {
    topology: &'a TopologyMap,
    capabilities: &'a Capabilities,
}

impl<'a> Translator<'a> {
    /// Create a translator for a backend.
    pub fn new(topology: &'a TopologyMap, capabilities: &'a Capabilities) -> Self {
        Self {
            topology,
            capabilities,
        }
    }

    /// Translate a program into a native experiment.
    #[instrument(skip_all, fields(program = %program.name))]
    pub fn translate(&self, program: &PulseProgram) -> HalResult<NativeExperiment> {
        if program.shots > self.capabilities.max_shots {
            return Err(HalError::Transpile(format!(
                "{} shots requested but {} accepts at most {}",
                program.shots, self.capabilities.name, self.capabilities.max_shots
            )));
        }

        let mut lowered: BTreeMap<String, Vec<Lowered>> = BTreeMap::new();
        let mut waveforms = BTreeMap::new();
        let mut memory_slots = 0u32;

        for (order, inst) in program.instructions.iter().enumerate() {
            let kind = inst.kind(&program.pulse_library).ok_or_else(|| {
                HalError::Transpile(format!(
                    "unsupported instruction '{}' at index {order}",
                    inst.name
                ))
            })?;
            if !self.capabilities.supports_instruction(kind) {
                return Err(HalError::Transpile(format!(
                    "instruction '{}' is not supported by {}",
                    inst.name, self.capabilities.name
                )));
            }

            if kind == InstructionKind::Acquire {
                let duration = self.align(inst.duration.unwrap_or(0), order)?;
                let t0 = self.align(inst.t0, order)?;
                for (qubit, slot) in inst.qubits.iter().zip(&inst.memory_slot) {
                    let channel = format!("m{qubit}");
                    self.resolve(&channel)?;
                    memory_slots = memory_slots.max(self.slot_count(*slot, order)?);
                    lowered.entry(channel).or_default().push(Lowered {
                        t0,
                        duration,
                        order,
                        action: Action::Acquire {
                            qubit: *qubit,
                            memory_slot: *slot,
                        },
                    });
                }
                continue;
            }

            let channel = inst.ch.as_deref().ok_or_else(|| {
                HalError::Transpile(format!(
                    "instruction '{}' at index {order} has no channel",
                    inst.name
                ))
            })?;
            self.resolve(channel)?;

            let (duration, action) = self.lower(kind, inst, order, program, &mut waveforms)?;
            lowered.entry(channel.to_string()).or_default().push(Lowered {
                t0: self.align(inst.t0, order)?,
                duration: self.align(duration, order)?,
                order,
                action,
            });
        }

        let mut channels = BTreeMap::new();
        let mut duration_ns = 0;
        for (name, mut pending) in lowered {
            pending.sort_by_key(|l| (l.t0, l.order));
            let (instructions, end) = schedule(&name, pending)?;
            duration_ns = duration_ns.max(end);
            let address = self.resolve(&name)?.clone();
            channels.insert(
                name,
                NativeChannel {
                    address,
                    instructions,
                },
            );
        }

        let experiment = NativeExperiment {
            name: program.name.clone(),
            shots: program.shots,
            channels,
            waveforms,
            memory_slots,
            duration_ns,
        };
        debug!(
            channels = experiment.channels.len(),
            instructions = experiment.instruction_count(),
            duration_ns,
            "Translated program"
        );
        Ok(experiment)
    }

    fn align(&self, t_ns: u64, order: usize) -> HalResult<u64> {
        self.topology.align(t_ns).ok_or_else(|| {
            HalError::Transpile(format!(
                "time {t_ns} ns at index {order} does not fit the {} ns grid",
                self.topology.timegrid_ns
            ))
        })
    }

    /// Number of memory slots needed to hold `slot`.
    fn slot_count(&self, slot: u32, order: usize) -> HalResult<u32> {
        slot.checked_add(1)
            .filter(|count| *count <= self.capabilities.max_memory_slots)
            .ok_or_else(|| {
                HalError::Transpile(format!(
                    "memory slot {slot} at index {order} exceeds the {} slots of {}",
                    self.capabilities.max_memory_slots, self.capabilities.name
                ))
            })
    }

    fn resolve(&self, channel: &str) -> HalResult<&'a crate::topology::InstrumentAddress> {
        self.topology
            .resolve(channel)
            .ok_or_else(|| HalError::UnresolvedChannel(channel.to_string()))
    }

    /// Lower a non-acquire instruction into its raw duration and action.
    fn lower(
        &self,
        kind: InstructionKind,
        inst: &PulseInstruction,
        order: usize,
        program: &PulseProgram,
        waveforms: &mut BTreeMap<String, Waveform>,
    ) -> HalResult<(u64, Action)> {
        let missing = |what: &str| {
            HalError::Transpile(format!(
                "instruction '{}' at index {order} is missing {what}",
                inst.name
            ))
        };

        Ok(match kind {
            InstructionKind::LibraryPulse => {
                let samples = program
                    .pulse_library
                    .get(&inst.name)
                    .ok_or_else(|| missing("a pulse library entry"))?;
                waveforms
                    .entry(inst.name.clone())
                    .or_insert_with(|| Waveform::Samples {
                        samples: samples.clone(),
                    });
                (samples.len() as u64, Action::Play(inst.name.clone()))
            }
            InstructionKind::ParametricPulse => {
                let shape = inst
                    .pulse_shape
                    .as_deref()
                    .ok_or_else(|| missing("pulse_shape"))?;
                if !self.capabilities.supports_shape(shape) {
                    return Err(HalError::Transpile(format!(
                        "pulse shape '{shape}' is not supported by {}",
                        self.capabilities.name
                    )));
                }
                let duration = inst
                    .parameter_f64("duration")
                    .filter(|d| *d >= 0.0)
                    .ok_or_else(|| missing("a non-negative duration parameter"))?;
                let key = format!("{shape}_{order}");
                waveforms.insert(
                    key.clone(),
                    Waveform::Parametric {
                        shape: shape.to_string(),
                        parameters: inst.parameters.clone().unwrap_or_default(),
                    },
                );
                (duration.ceil() as u64, Action::Play(key))
            }
            InstructionKind::Delay => (inst.duration.unwrap_or(0), Action::Wait),
            InstructionKind::SetFrequency => (
                0,
                Action::SetFrequency(inst.frequency.ok_or_else(|| missing("frequency"))?),
            ),
            InstructionKind::ShiftFrequency => (
                0,
                Action::ShiftFrequency(inst.frequency.ok_or_else(|| missing("frequency"))?),
            ),
            InstructionKind::SetPhase => (
                0,
                Action::SetPhase(inst.phase.ok_or_else(|| missing("phase"))?),
            ),
            InstructionKind::ShiftPhase => (
                0,
                Action::ShiftPhase(inst.phase.ok_or_else(|| missing("phase"))?),
            ),
            InstructionKind::Acquire => {
                return Err(HalError::Transpile(
                    "acquire must be lowered per qubit".to_string(),
                ));
            }
        })
    }
}

/// Walk one channel's lowered instructions with a time cursor.
fn schedule(channel: &str, pending: Vec<Lowered>) -> HalResult<(Vec<NativeInstruction>, u64)> {
    let mut state = ChannelState::default();
    let mut out = Vec::with_capacity(pending.len());

    for item in pending {
        let start = item.t0.max(state.cursor);
        let op = match item.action {
            Action::Play(waveform) => NativeOp::Play { waveform },
            Action::Acquire { qubit, memory_slot } => {
                let index = state.acquisitions;
                state.acquisitions = state.acquisitions.saturating_add(1);
                NativeOp::Acquire {
                    qubit,
                    memory_slot,
                    index,
                }
            }
            Action::Wait => NativeOp::Wait,
            Action::SetFrequency(value) => {
                state.frequency = value;
                NativeOp::SetFrequency { value }
            }
            Action::ShiftFrequency(value) => {
                state.frequency += value;
                NativeOp::ShiftFrequency { value }
            }
            Action::SetPhase(value) => {
                state.phase = value;
                NativeOp::SetPhase { value }
            }
            Action::ShiftPhase(value) => {
                state.phase += value;
                NativeOp::ShiftPhase { value }
            }
        };
        out.push(NativeInstruction {
            t0: start,
            duration: item.duration,
            phase: state.phase,
            frequency: state.frequency,
            op,
        });
        state.cursor = start.checked_add(item.duration).ok_or_else(|| {
            HalError::Transpile(format!(
                "instruction at index {} on {channel} ends past the end of the timeline",
                item.order
            ))
        })?;
    }

    Ok((out, state.cursor))
}

/// Translate `program` for the backend described by `topology` and `capabilities`.
pub fn translate(
    program: &PulseProgram,
    topology: &TopologyMap,
    capabilities: &Capabilities,
) -> HalResult<NativeExperiment> {
    Translator::new(topology, capabilities).translate(program)
}
