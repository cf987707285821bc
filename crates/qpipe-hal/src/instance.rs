//! Executor instances and hardware exclusion.
//!
//! An [`ExecutorInstance`] owns one configured executor and is the only way
//! the pipeline talks to it. It tracks the connection state
//!
//! ```text
//!             prepare() ok
//!   Disconnected ────────────→ Connected ──run()──→ Busy
//!        ↑                        ↑                  │
//!        │                        └── ok / exec err / timeout + abort ok
//!        └────── connection err / timeout + abort failed
//! ```
//!
//! and holds the busy lock that serializes `run()`. Waiters queue in FIFO
//! order behind the current holder. While an instance is `Disconnected`,
//! `run()` fails fast with a connection error until `prepare()` succeeds.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::capability::Capabilities;
use crate::error::{HalError, HalResult};
use crate::executor::Executor;
use crate::native::NativeExperiment;
use crate::program::PulseProgram;
use crate::registry::ExecutorKind;
use crate::result::RawResult;
use crate::topology::TopologyMap;

/// Connection state of an executor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not ready; `prepare()` is required before running.
    Disconnected,
    /// Ready and idle.
    Connected,
    /// Running an experiment.
    Busy,
}

impl ConnectionState {
    /// Human-readable state name.
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connected => "Connected",
            ConnectionState::Busy => "Busy",
        }
    }
}

/// Marks the instance disconnected if a run is dropped before it settles.
struct SettleGuard<'a> {
    state: &'a Mutex<ConnectionState>,
    armed: bool,
}

impl SettleGuard<'_> {
    fn settle(mut self, next: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
        self.armed = false;
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.lock().unwrap_or_else(PoisonError::into_inner) =
                ConnectionState::Disconnected;
        }
    }
}

/// One configured backend plus its exclusion and connection state.
pub struct ExecutorInstance {
    executor: Box<dyn Executor>,
    state: Mutex<ConnectionState>,
    busy: tokio::sync::Mutex<()>,
    shut_down: AtomicBool,
}

impl ExecutorInstance {
    /// Wrap an executor. The instance starts `Disconnected`.
    pub fn new(executor: Box<dyn Executor>) -> Self {
        Self {
            executor,
            state: Mutex::new(ConnectionState::Disconnected),
            busy: tokio::sync::Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Executor name.
    pub fn name(&self) -> &str {
        self.executor.name()
    }

    /// Executor variant.
    pub fn kind(&self) -> ExecutorKind {
        self.executor.kind()
    }

    /// Executor capabilities.
    pub fn capabilities(&self) -> &Capabilities {
        self.executor.capabilities()
    }

    /// Executor channel bindings.
    pub fn topology(&self) -> &TopologyMap {
        self.executor.topology()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn ensure_open(&self) -> HalResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(HalError::Connection(format!(
                "executor '{}' has been shut down",
                self.name()
            )));
        }
        Ok(())
    }

    /// Connect the executor. Returns immediately when already connected.
    #[instrument(skip(self), fields(executor = %self.name()))]
    pub async fn prepare(&self) -> HalResult<()> {
        let _busy = self.busy.lock().await;
        self.ensure_open()?;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        match self.executor.prepare().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                info!("Executor connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(error = %e, "Executor prepare failed");
                Err(e)
            }
        }
    }

    /// Translate a program for this executor.
    pub fn compile(&self, program: &PulseProgram) -> HalResult<NativeExperiment> {
        self.executor.compile(program)
    }

    /// Run an experiment under the busy lock, bounded by `timeout`.
    ///
    /// On timeout the executor is asked to abort. A successful abort
    /// leaves the instance `Connected`; a failed one leaves it
    /// `Disconnected`. Connection errors from the executor also leave it
    /// `Disconnected`.
    #[instrument(skip(self, experiment), fields(executor = %self.name(), experiment = %experiment.name))]
    pub async fn run(
        &self,
        experiment: &NativeExperiment,
        timeout: Duration,
    ) -> HalResult<RawResult> {
        let _busy = self.busy.lock().await;
        self.ensure_open()?;
        if self.state() == ConnectionState::Disconnected {
            return Err(HalError::Connection(format!(
                "executor '{}' is disconnected; prepare required",
                self.name()
            )));
        }

        self.set_state(ConnectionState::Busy);
        let guard = SettleGuard {
            state: &self.state,
            armed: true,
        };
        let started = Instant::now();
        debug!("Executor busy");

        let outcome = tokio::time::timeout(timeout, self.executor.execute(experiment)).await;
        let (next, result) = match outcome {
            Ok(Ok(result)) => (ConnectionState::Connected, Ok(result)),
            Ok(Err(e)) if e.is_recoverable() => {
                warn!(error = %e, "Executor lost connection during run");
                (ConnectionState::Disconnected, Err(e))
            }
            Ok(Err(e)) => (ConnectionState::Connected, Err(e)),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Run timed out, aborting");
                let next = match tokio::time::timeout(timeout, self.executor.abort()).await {
                    Ok(Ok(())) => ConnectionState::Connected,
                    Ok(Err(e)) => {
                        error!(error = %e, "Abort failed, marking executor disconnected");
                        ConnectionState::Disconnected
                    }
                    Err(_) => {
                        error!("Abort timed out, marking executor disconnected");
                        ConnectionState::Disconnected
                    }
                };
                (
                    next,
                    Err(HalError::Timeout(format!(
                        "run of '{}' exceeded {} ms",
                        experiment.name,
                        timeout.as_millis()
                    ))),
                )
            }
        };

        guard.settle(next);
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            state = next.name(),
            "Executor released"
        );
        result
    }

    /// Shut the executor down. Waits for a running experiment to finish.
    /// Calling this more than once is a no-op.
    pub async fn shutdown(&self) -> HalResult<()> {
        let _busy = self.busy.lock().await;
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.set_state(ConnectionState::Disconnected);
        info!(executor = %self.name(), "Shutting down executor");
        self.executor.shutdown().await
    }

    /// Whether `shutdown()` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ExecutorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorInstance")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Counts;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Ok(Duration),
        Hang,
        Connection,
        Execution,
    }

    struct MockExecutor {
        caps: Capabilities,
        topology: TopologyMap,
        script: Mutex<VecDeque<Behavior>>,
        abort_ok: bool,
        active: AtomicUsize,
        max_active: AtomicUsize,
        prepares: AtomicUsize,
        aborts: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl MockExecutor {
        fn new(script: Vec<Behavior>, abort_ok: bool) -> Self {
            Self {
                caps: Capabilities::simulator("mock", 1),
                topology: TopologyMap::standard(1, "mock"),
                script: Mutex::new(script.into()),
                abort_ok,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                prepares: AtomicUsize::new(0),
                aborts: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Executor for Arc<MockExecutor> {
        fn name(&self) -> &str {
            "mock"
        }

        fn kind(&self) -> ExecutorKind {
            ExecutorKind::SingleQubitSimulator
        }

        fn capabilities(&self) -> &Capabilities {
            &self.caps
        }

        fn topology(&self) -> &TopologyMap {
            &self.topology
        }

        async fn prepare(&self) -> HalResult<()> {
            self.prepares.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&self, experiment: &NativeExperiment) -> HalResult<RawResult> {
            let behavior = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Behavior::Ok(Duration::ZERO));

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let result = match behavior {
                Behavior::Ok(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(RawResult::new(
                        "mock",
                        Counts::from_pairs([("0", u64::from(experiment.shots))]),
                        experiment.shots,
                    ))
                }
                Behavior::Hang => std::future::pending().await,
                Behavior::Connection => Err(HalError::Connection("link dropped".into())),
                Behavior::Execution => Err(HalError::Execution("sequencer fault".into())),
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn abort(&self) -> HalResult<()> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.abort_ok {
                Ok(())
            } else {
                Err(HalError::Connection("abort rejected".into()))
            }
        }

        async fn shutdown(&self) -> HalResult<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn experiment() -> NativeExperiment {
        NativeExperiment {
            name: "exp".into(),
            shots: 10,
            channels: BTreeMap::new(),
            waveforms: BTreeMap::new(),
            memory_slots: 1,
            duration_ns: 0,
        }
    }

    fn instance(script: Vec<Behavior>, abort_ok: bool) -> (Arc<MockExecutor>, ExecutorInstance) {
        let mock = Arc::new(MockExecutor::new(script, abort_ok));
        let instance = ExecutorInstance::new(Box::new(mock.clone()));
        (mock, instance)
    }

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_run_requires_prepare() {
        let (_, instance) = instance(vec![], true);
        assert_eq!(instance.state(), ConnectionState::Disconnected);
        let err = instance.run(&experiment(), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, HalError::Connection(_)));
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent() {
        let (mock, instance) = instance(vec![], true);
        instance.prepare().await.unwrap();
        instance.prepare().await.unwrap();
        assert_eq!(instance.state(), ConnectionState::Connected);
        assert_eq!(mock.prepares.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_runs_never_overlap() {
        let script = vec![Behavior::Ok(Duration::from_millis(5)); 8];
        let (mock, instance) = instance(script, true);
        let instance = Arc::new(instance);
        instance.prepare().await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let instance = instance.clone();
                tokio::spawn(async move { instance.run(&experiment(), Duration::from_secs(5)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(mock.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(instance.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_successful_abort() {
        let (mock, instance) = instance(vec![Behavior::Hang], true);
        instance.prepare().await.unwrap();

        let err = instance.run(&experiment(), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, HalError::Timeout(_)));
        assert_eq!(mock.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(instance.state(), ConnectionState::Connected);

        let result = instance.run(&experiment(), TIMEOUT).await.unwrap();
        assert_eq!(result.counts.get("0"), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_failed_abort_fails_fast_until_prepare() {
        let (mock, instance) = instance(vec![Behavior::Hang], false);
        instance.prepare().await.unwrap();

        let err = instance.run(&experiment(), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, HalError::Timeout(_)));
        assert_eq!(instance.state(), ConnectionState::Disconnected);

        let err = instance.run(&experiment(), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, HalError::Connection(_)));

        instance.prepare().await.unwrap();
        assert_eq!(mock.prepares.load(Ordering::SeqCst), 2);
        instance.run(&experiment(), TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_error_disconnects() {
        let (_, instance) = instance(vec![Behavior::Connection], true);
        instance.prepare().await.unwrap();
        let err = instance.run(&experiment(), TIMEOUT).await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(instance.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_execution_error_keeps_connection() {
        let (_, instance) = instance(vec![Behavior::Execution], true);
        instance.prepare().await.unwrap();
        let err = instance.run(&experiment(), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, HalError::Execution(_)));
        assert_eq!(instance.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_holder_and_is_idempotent() {
        let (mock, instance) = instance(vec![Behavior::Ok(Duration::from_millis(30))], true);
        let instance = Arc::new(instance);
        instance.prepare().await.unwrap();

        let runner = {
            let instance = instance.clone();
            tokio::spawn(async move { instance.run(&experiment(), Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(instance.state(), ConnectionState::Busy);

        instance.shutdown().await.unwrap();
        instance.shutdown().await.unwrap();
        assert!(runner.await.unwrap().is_ok());
        assert_eq!(mock.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(instance.state(), ConnectionState::Disconnected);

        let err = instance.prepare().await.unwrap_err();
        assert!(matches!(err, HalError::Connection(_)));
    }
}
