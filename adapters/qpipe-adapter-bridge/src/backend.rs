//! Hardware bridge executor.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use qpipe_hal::{
    Capabilities, Executor, ExecutorConfig, ExecutorFactory, ExecutorKind, HalError, HalResult,
    NativeExperiment, RawResult, TopologyMap,
};

use crate::api::{BridgeClient, DEFAULT_REQUEST_TIMEOUT};
use crate::error::BridgeError;

/// Executor for an instrument cluster behind a control server.
///
/// The bridge does not serialize runs itself; the pipeline reaches it
/// through an `ExecutorInstance`, which keeps at most one experiment on
/// the cluster at a time.
///
/// # Configuration
///
/// ```yaml
/// backend: bridge
/// endpoint: http://cluster-ctl:8080
/// topology:
///   qubits: 2
///   channels:
///     d0: { instrument: awg0, port: ch1 }
///     m0: { instrument: ro0, port: out1 }
/// request_timeout_ms: 120000
/// ```
pub struct BridgeExecutor {
    name: String,
    client: BridgeClient,
    capabilities: Capabilities,
    topology: TopologyMap,
}

impl std::fmt::Debug for BridgeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeExecutor")
            .field("name", &self.name)
            .field("client", &self.client)
            .field("qubits", &self.topology.qubits)
            .finish()
    }
}

impl BridgeExecutor {
    /// Create a bridge executor from an endpoint and the cluster wiring.
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        topology: TopologyMap,
        request_timeout: Duration,
    ) -> HalResult<Self> {
        let client = BridgeClient::new(endpoint, token, request_timeout)?;
        let name = ExecutorKind::HardwareBridge.key().to_string();
        Ok(Self {
            capabilities: Capabilities::hardware(name.clone(), topology.qubits),
            name,
            client,
            topology,
        })
    }

    /// The control server client.
    pub fn client(&self) -> &BridgeClient {
        &self.client
    }
}

#[async_trait]
impl Executor for BridgeExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::HardwareBridge
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn topology(&self) -> &TopologyMap {
        &self.topology
    }

    #[instrument(skip(self))]
    async fn prepare(&self) -> HalResult<()> {
        let health = self.client.health().await?;
        debug!(
            instruments = health.instruments.len(),
            "Control server {} ready",
            self.client.base_url()
        );
        Ok(())
    }

    #[instrument(skip(self, experiment), fields(experiment = %experiment.name, shots = experiment.shots))]
    async fn execute(&self, experiment: &NativeExperiment) -> HalResult<RawResult> {
        let response = self.client.run(experiment).await?;
        if response.shots != experiment.shots {
            return Err(HalError::Execution(format!(
                "control server returned {} shot(s), expected {}",
                response.shots, experiment.shots
            )));
        }
        info!(run_id = ?response.id, "Experiment finished on cluster");
        Ok(response.into_raw_result(&self.name))
    }

    async fn abort(&self) -> HalResult<()> {
        self.client.abort().await?;
        Ok(())
    }

    async fn shutdown(&self) -> HalResult<()> {
        // HTTP connections are pooled per request; nothing is held open
        Ok(())
    }
}

impl ExecutorFactory for BridgeExecutor {
    fn from_config(config: ExecutorConfig) -> HalResult<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| HalError::from(BridgeError::MissingEndpoint))?;
        let topology = config.topology.clone().ok_or_else(|| {
            HalError::Configuration("the hardware bridge needs a topology map".into())
        })?;
        let request_timeout = config
            .extra_u64("request_timeout_ms")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        Self::new(endpoint, config.token.clone(), topology, request_timeout)
    }
}
