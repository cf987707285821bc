//! Fault injection for exercising executor failure paths.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use qpipe_hal::HalError;
use serde::{Deserialize, Serialize};

/// A misbehaviour applied to the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    /// Never finish; the run has to be aborted.
    Hang,
    /// Never finish, and refuse the abort.
    HangUnabortable,
    /// Report an execution error.
    Fail,
    /// Drop the link and report a connection error.
    Disconnect,
}

impl FromStr for Fault {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "hang" => Ok(Fault::Hang),
            "hang_unabortable" => Ok(Fault::HangUnabortable),
            "fail" => Ok(Fault::Fail),
            "disconnect" => Ok(Fault::Disconnect),
            other => Err(HalError::Configuration(format!(
                "Unknown fault '{other}'. Available: hang, hang_unabortable, fail, disconnect"
            ))),
        }
    }
}

/// State shared between a simulator and its handles.
#[derive(Debug, Default)]
pub(crate) struct SimState {
    pub(crate) connected: AtomicBool,
    pub(crate) refuse_abort: AtomicBool,
    faults: Mutex<VecDeque<Fault>>,
    executions: AtomicU64,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SimState {
    pub(crate) fn next_fault(&self) -> Option<Fault> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub(crate) fn push_fault(&self, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(fault);
    }

    /// Mark a run as started. The returned guard marks it finished, even
    /// when the run future is dropped by a timeout.
    pub(crate) fn enter(self: &Arc<Self>) -> ActiveRun {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveRun {
            state: Arc::clone(self),
        }
    }
}

pub(crate) struct ActiveRun {
    state: Arc<SimState>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle for steering and observing a simulator from tests or tooling.
#[derive(Debug, Clone)]
pub struct SimHandle {
    pub(crate) state: Arc<SimState>,
}

impl SimHandle {
    /// Queue a fault for an upcoming run. Faults apply in FIFO order.
    pub fn inject(&self, fault: Fault) {
        self.state.push_fault(fault);
    }

    /// Faults not yet consumed.
    pub fn pending_faults(&self) -> usize {
        self.state
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs started so far, including failed ones.
    pub fn executions(&self) -> u64 {
        self.state.executions.load(Ordering::SeqCst)
    }

    /// Highest number of runs observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Whether the simulated link is up.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Drop the simulated link; the next run fails until prepare.
    pub fn disconnect(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
    }
}
