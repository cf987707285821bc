//! Control server REST client.
//!
//! The instrument cluster is fronted by a control server that speaks a
//! small JSON protocol:
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | `GET` | `/health` | | [`HealthResponse`] |
//! | `POST` | `/experiments` | [`RunRequest`] | [`RunResponse`] once the run finished |
//! | `POST` | `/abort` | | 2xx when the sequencers stopped |

use std::time::Duration;

use reqwest::{Client, StatusCode};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use qpipe_hal::{Counts, NativeExperiment, RawResult};

use crate::error::{BridgeError, BridgeResult};

/// Upper bound on one HTTP exchange. The pipeline enforces its own,
/// shorter run timeout on top of this.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Control server REST client.
pub struct BridgeClient {
    client: Client,
    /// Base URL (without trailing slash).
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl BridgeClient {
    /// Create a client for a control server.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        request_timeout: Duration,
    ) -> BridgeResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Base URL of the control server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> BridgeResult<T> {
        let status = response.status();
        if status.is_success() {
            let body = response.text().await?;
            return Ok(serde_json::from_str(&body)?);
        }

        let message = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNPROCESSABLE_ENTITY => Err(BridgeError::Rejected(message)),
            _ => Err(BridgeError::ApiError {
                status: status.as_u16(),
                message,
            }),
        }
    }

    /// Check that the cluster is reachable and idle enough to accept runs.
    #[instrument(skip(self))]
    pub async fn health(&self) -> BridgeResult<HealthResponse> {
        let url = self.url("health");
        debug!("GET {}", url);
        let resp = self.authorize(self.client.get(&url)).send().await?;
        let health: HealthResponse = self.handle_response(resp).await?;
        if !health.is_ready() {
            return Err(BridgeError::NotReady(health.status));
        }
        Ok(health)
    }

    /// Run an experiment and wait for its measurement data.
    #[instrument(skip(self, experiment), fields(experiment = %experiment.name))]
    pub async fn run(&self, experiment: &NativeExperiment) -> BridgeResult<RunResponse> {
        let url = self.url("experiments");
        debug!("POST {}", url);
        let body = RunRequest { experiment };
        let resp = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        let run: RunResponse = self.handle_response(resp).await?;
        if let Some(error) = run.error {
            return Err(BridgeError::Rejected(error));
        }
        Ok(run)
    }

    /// Stop whatever the sequencers are playing.
    #[instrument(skip(self))]
    pub async fn abort(&self) -> BridgeResult<()> {
        let url = self.url("abort");
        debug!("POST {}", url);
        let resp = self.authorize(self.client.post(&url)).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            Err(BridgeError::ApiError { status, message })
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` when the cluster accepts experiments.
    pub status: String,
    /// Instruments reporting in.
    #[serde(default)]
    pub instruments: Vec<String>,
}

impl HealthResponse {
    pub fn is_ready(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

/// `POST /experiments` request.
#[derive(Debug, Serialize)]
pub struct RunRequest<'a> {
    pub experiment: &'a NativeExperiment,
}

/// `POST /experiments` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResponse {
    /// Run identifier assigned by the control server.
    #[serde(default)]
    pub id: Option<String>,
    /// Counts keyed by memory-slot bitstring.
    #[serde(default)]
    pub counts: FxHashMap<String, u64>,
    #[serde(default)]
    pub shots: u32,
    /// Per-shot bitstrings, when the server records them.
    #[serde(default)]
    pub memory: Vec<String>,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    /// Set when the cluster could not run the experiment.
    #[serde(default)]
    pub error: Option<String>,
}

impl RunResponse {
    /// Convert into a raw result attributed to `backend`.
    pub fn into_raw_result(self, backend: &str) -> RawResult {
        let mut result = RawResult::new(backend, Counts::from_pairs(self.counts), self.shots)
            .with_memory(self.memory)
            .with_metadata(serde_json::json!({ "run_id": self.id }));
        if let Some(ms) = self.execution_time_ms {
            result = result.with_execution_time(ms);
        }
        result
    }
}
