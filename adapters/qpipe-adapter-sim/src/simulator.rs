//! Pulse simulator executors.

use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, instrument, warn};

use qpipe_hal::program::{ChannelKind, LogicalChannel};
use qpipe_hal::{
    Capabilities, Counts, Executor, ExecutorConfig, ExecutorFactory, ExecutorKind, HalError,
    HalResult, NativeExperiment, NativeOp, RawResult, TopologyMap,
};

use crate::fault::{Fault, SimHandle, SimState};
use crate::statevector::Statevector;

/// Rotation angle per unit of integrated drive amplitude (rad per
/// amplitude·ns). Sixteen samples at amplitude 0.1 make a π/2 pulse.
pub const DEFAULT_RABI_RATE: f64 = PI / 3.2;

/// Instrument name used for the standard wiring.
const SIM_INSTRUMENT: &str = "sim";

/// One step of a shot, resolved from the native timeline.
#[derive(Debug, Clone, Copy)]
enum SimOp {
    Rotate { qubit: usize, theta: f64, phi: f64 },
    CrossResonance { control: usize, target: usize, theta: f64 },
    Measure { qubit: usize, slot: usize },
}

/// Statevector simulator for one or two transmon-like qubits.
///
/// Drive pulses rotate their qubit by an angle proportional to the
/// integrated waveform area, about an axis set by the carrier phase.
/// On the two-qubit variant, control channel `u<q>` applies a
/// cross-resonance interaction from qubit `q` onto its neighbour.
///
/// Settings read from [`ExecutorConfig::extra`]:
///
/// | Key | Type | Meaning |
/// |-----|------|---------|
/// | `seed` | integer | Fixed RNG seed; identical runs give identical counts |
/// | `rabi_rate` | number | Overrides [`DEFAULT_RABI_RATE`] |
/// | `memory` | bool | Return per-shot bitstrings |
/// | `latency_ms` | integer | Extra time spent in every run |
/// | `faults` | list of strings | Faults queued at construction |
pub struct SimulatorExecutor {
    name: String,
    kind: ExecutorKind,
    capabilities: Capabilities,
    topology: TopologyMap,
    rabi_rate: f64,
    seed: Option<u64>,
    memory: bool,
    latency: Option<Duration>,
    state: Arc<SimState>,
}

impl SimulatorExecutor {
    /// Single-qubit simulator.
    pub fn single_qubit(config: ExecutorConfig) -> HalResult<Self> {
        Self::build(ExecutorKind::SingleQubitSimulator, 1, config)
    }

    /// Two-qubit simulator with a cross-resonance coupling.
    pub fn two_qubit(config: ExecutorConfig) -> HalResult<Self> {
        Self::build(ExecutorKind::TwoQubitSimulator, 2, config)
    }

    fn build(kind: ExecutorKind, num_qubits: u32, config: ExecutorConfig) -> HalResult<Self> {
        let topology = config
            .topology
            .clone()
            .unwrap_or_else(|| TopologyMap::standard(num_qubits, SIM_INSTRUMENT));
        if topology.qubits != num_qubits {
            return Err(HalError::Configuration(format!(
                "{kind} simulates {num_qubits} qubit(s), topology declares {}",
                topology.qubits
            )));
        }

        let rabi_rate = config.extra_f64("rabi_rate")?.unwrap_or(DEFAULT_RABI_RATE);
        if !rabi_rate.is_finite() || rabi_rate <= 0.0 {
            return Err(HalError::Configuration(format!(
                "'rabi_rate' must be positive, got {rabi_rate}"
            )));
        }

        let state = Arc::new(SimState::default());
        for fault in parse_faults(&config)? {
            state.push_fault(fault);
        }

        let name = kind.key().to_string();
        debug!("Creating {} with {} qubit(s)", name, num_qubits);

        Ok(Self {
            capabilities: Capabilities::simulator(name.clone(), num_qubits),
            name,
            kind,
            topology,
            rabi_rate,
            seed: config.extra_u64("seed")?,
            memory: config.extra_bool("memory")?.unwrap_or(false),
            latency: config.extra_u64("latency_ms")?.map(Duration::from_millis),
            state,
        })
    }

    /// Handle for injecting faults and observing runs.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn num_qubits(&self) -> usize {
        self.capabilities.num_qubits as usize
    }

    fn qubit(&self, index: u32) -> HalResult<usize> {
        let q = index as usize;
        if q >= self.num_qubits() {
            return Err(HalError::Execution(format!(
                "qubit {index} out of range for {}",
                self.name
            )));
        }
        Ok(q)
    }

    /// Reduce the timeline to the operations that act on the state.
    fn plan(&self, experiment: &NativeExperiment) -> HalResult<Vec<SimOp>> {
        let mut ops = Vec::new();
        for (channel, inst) in experiment.timeline() {
            match &inst.op {
                NativeOp::Play { waveform } => {
                    let wf = experiment.waveforms.get(waveform).ok_or_else(|| {
                        HalError::Execution(format!("waveform '{waveform}' not uploaded"))
                    })?;
                    let (re, im) = wf.area();
                    let magnitude = re.hypot(im);
                    if magnitude == 0.0 {
                        continue;
                    }
                    let ch: LogicalChannel = channel.parse().map_err(HalError::Execution)?;
                    match ch.kind {
                        ChannelKind::Drive => ops.push(SimOp::Rotate {
                            qubit: self.qubit(ch.index)?,
                            theta: self.rabi_rate * magnitude,
                            phi: inst.phase + im.atan2(re),
                        }),
                        ChannelKind::Control if self.num_qubits() > 1 => {
                            let control = self.qubit(ch.index)?;
                            ops.push(SimOp::CrossResonance {
                                control,
                                target: (control + 1) % self.num_qubits(),
                                theta: self.rabi_rate * re,
                            });
                        }
                        // Readout stimulus does not act on the qubit state
                        _ => {}
                    }
                }
                NativeOp::Acquire {
                    qubit, memory_slot, ..
                } => ops.push(SimOp::Measure {
                    qubit: self.qubit(*qubit)?,
                    slot: *memory_slot as usize,
                }),
                _ => {}
            }
        }
        Ok(ops)
    }

    fn simulate(&self, experiment: &NativeExperiment) -> HalResult<RawResult> {
        let started = Instant::now();
        if experiment.memory_slots > self.capabilities.max_memory_slots {
            return Err(HalError::Execution(format!(
                "experiment writes {} memory slots but {} has {}",
                experiment.memory_slots, self.name, self.capabilities.max_memory_slots
            )));
        }
        let ops = self.plan(experiment)?;
        let slots = (experiment.memory_slots as usize).max(1);

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut counts = Counts::new();
        let mut memory = Vec::new();
        for _ in 0..experiment.shots {
            let mut sv = Statevector::new(self.num_qubits());
            let mut bits = vec![false; slots];
            for op in &ops {
                match *op {
                    SimOp::Rotate { qubit, theta, phi } => sv.apply_prx(qubit, theta, phi),
                    SimOp::CrossResonance {
                        control,
                        target,
                        theta,
                    } => sv.apply_zx(control, target, theta),
                    SimOp::Measure { qubit, slot } => {
                        let outcome = sv.measure(qubit, &mut rng);
                        if let Some(bit) = bits.get_mut(slot) {
                            *bit = outcome;
                        }
                    }
                }
            }
            // Slot 0 is the rightmost character
            let bitstring: String = bits.iter().rev().map(|b| if *b { '1' } else { '0' }).collect();
            if self.memory {
                memory.push(bitstring.clone());
            }
            counts.insert(bitstring, 1);
        }

        let mut result = RawResult::new(self.name.clone(), counts, experiment.shots)
            .with_execution_time(started.elapsed().as_millis() as u64)
            .with_metadata(serde_json::json!({
                "simulator": "statevector",
                "num_qubits": self.num_qubits(),
                "rabi_rate": self.rabi_rate,
                "seed": self.seed,
                "duration_ns": experiment.duration_ns,
            }));
        if self.memory {
            result = result.with_memory(memory);
        }
        Ok(result)
    }
}

fn parse_faults(config: &ExecutorConfig) -> HalResult<Vec<Fault>> {
    match config.extra.get("faults") {
        None => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| {
                        HalError::Configuration(format!("fault must be a string, got {item}"))
                    })?
                    .parse()
            })
            .collect(),
        Some(other) => Err(HalError::Configuration(format!(
            "'faults' must be a list, got {other}"
        ))),
    }
}

#[async_trait]
impl Executor for SimulatorExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ExecutorKind {
        self.kind
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn topology(&self) -> &TopologyMap {
        &self.topology
    }

    async fn prepare(&self) -> HalResult<()> {
        if !self.state.connected.swap(true, Ordering::SeqCst) {
            debug!("{} link up", self.name);
        }
        Ok(())
    }

    #[instrument(skip(self, experiment), fields(experiment = %experiment.name, shots = experiment.shots))]
    async fn execute(&self, experiment: &NativeExperiment) -> HalResult<RawResult> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(HalError::Connection(format!("{} link is down", self.name)));
        }
        let _run = self.state.enter();

        match self.state.next_fault() {
            Some(Fault::Hang) => {
                warn!("Injected fault: run hangs");
                return std::future::pending().await;
            }
            Some(Fault::HangUnabortable) => {
                warn!("Injected fault: run hangs and refuses abort");
                self.state.refuse_abort.store(true, Ordering::SeqCst);
                return std::future::pending().await;
            }
            Some(Fault::Fail) => {
                warn!("Injected fault: run fails");
                return Err(HalError::Execution("injected failure".into()));
            }
            Some(Fault::Disconnect) => {
                warn!("Injected fault: link drops");
                self.state.connected.store(false, Ordering::SeqCst);
                return Err(HalError::Connection(format!(
                    "{} link dropped mid-run",
                    self.name
                )));
            }
            None => {}
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let result = self.simulate(experiment)?;
        debug!(
            "Simulated {} shot(s) in {}ms",
            experiment.shots,
            result.execution_time_ms.unwrap_or_default()
        );
        Ok(result)
    }

    async fn abort(&self) -> HalResult<()> {
        if self.state.refuse_abort.swap(false, Ordering::SeqCst) {
            self.state.connected.store(false, Ordering::SeqCst);
            return Err(HalError::Execution(format!(
                "{} did not acknowledge abort",
                self.name
            )));
        }
        debug!("{} aborted", self.name);
        Ok(())
    }

    async fn shutdown(&self) -> HalResult<()> {
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl ExecutorFactory for SimulatorExecutor {
    fn from_config(config: ExecutorConfig) -> HalResult<Self> {
        match config.backend.parse::<ExecutorKind>()? {
            ExecutorKind::SingleQubitSimulator => Self::single_qubit(config),
            ExecutorKind::TwoQubitSimulator => Self::two_qubit(config),
            other => Err(HalError::Configuration(format!(
                "'{other}' is not a simulator backend"
            ))),
        }
    }
}
