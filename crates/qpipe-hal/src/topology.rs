//! Channel-to-instrument topology.
//!
//! A [`TopologyMap`] binds every logical channel a backend understands to
//! a physical instrument output, and fixes the time grid instructions are
//! aligned to.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::program::LogicalChannel;

/// Default time grid in nanoseconds.
pub const DEFAULT_TIMEGRID_NS: u64 = 4;

fn default_timegrid() -> u64 {
    DEFAULT_TIMEGRID_NS
}

/// Physical destination of a logical channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrumentAddress {
    /// Instrument (module) name.
    pub instrument: String,
    /// Output port or sequencer on the instrument.
    pub port: String,
}

impl InstrumentAddress {
    /// Create an address.
    pub fn new(instrument: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for InstrumentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instrument, self.port)
    }
}

/// Logical channel bindings for one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyMap {
    /// Number of qubits the backend exposes.
    #[serde(default)]
    pub qubits: u32,
    /// Instruction time grid in nanoseconds.
    #[serde(default = "default_timegrid")]
    pub timegrid_ns: u64,
    /// Logical channel name to instrument binding.
    #[serde(default)]
    pub channels: BTreeMap<String, InstrumentAddress>,
}

impl TopologyMap {
    /// Empty map for a device with `qubits` qubits.
    pub fn new(qubits: u32) -> Self {
        Self {
            qubits,
            timegrid_ns: DEFAULT_TIMEGRID_NS,
            channels: BTreeMap::new(),
        }
    }

    /// Standard wiring: `d<q>` and `m<q>` for every qubit on one instrument,
    /// plus a `u<q>` control channel for each neighbouring pair `(q, q+1)`.
    pub fn standard(qubits: u32, instrument: &str) -> Self {
        let mut map = Self::new(qubits);
        for q in 0..qubits {
            map = map
                .with_channel(LogicalChannel::drive(q).to_string(), instrument, format!("drive{q}"))
                .with_channel(LogicalChannel::measure(q).to_string(), instrument, format!("readout{q}"));
        }
        for q in 0..qubits.saturating_sub(1) {
            map = map.with_channel(
                LogicalChannel::control(q).to_string(),
                instrument,
                format!("control{q}"),
            );
        }
        map
    }

    /// Bind a channel.
    pub fn with_channel(
        mut self,
        channel: impl Into<String>,
        instrument: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        self.channels
            .insert(channel.into(), InstrumentAddress::new(instrument, port));
        self
    }

    /// Remove a binding.
    pub fn without_channel(mut self, channel: &str) -> Self {
        self.channels.remove(channel);
        self
    }

    /// Set the time grid.
    pub fn with_timegrid(mut self, timegrid_ns: u64) -> Self {
        self.timegrid_ns = timegrid_ns;
        self
    }

    /// Resolve a logical channel to its instrument.
    pub fn resolve(&self, channel: &str) -> Option<&InstrumentAddress> {
        self.channels.get(channel)
    }

    /// Round a time up onto the grid. `None` when the rounded time does
    /// not fit in a `u64`.
    pub fn align(&self, t_ns: u64) -> Option<u64> {
        let grid = self.timegrid_ns.max(1);
        t_ns.div_ceil(grid).checked_mul(grid)
    }
}
