//! Executor configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HalError, HalResult};
use crate::topology::TopologyMap;

/// Configuration for one executor instance, loaded once at startup.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Backend key, resolved through the executor registry.
    pub backend: String,
    /// Channel bindings. Variants fall back to their standard wiring when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<TopologyMap>,
    /// Control server URL, for the hardware bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Authentication token.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    /// Variant-specific settings (`seed`, `rabi_rate`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ExecutorConfig {
    /// Create a configuration for a backend key.
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            topology: None,
            endpoint: None,
            token: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Set the topology map.
    pub fn with_topology(mut self, topology: TopologyMap) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Set the endpoint URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the authentication token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Add extra configuration.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Read an unsigned integer setting.
    pub fn extra_u64(&self, key: &str) -> HalResult<Option<u64>> {
        match self.extra.get(key) {
            None => Ok(None),
            Some(v) => v.as_u64().map(Some).ok_or_else(|| {
                HalError::Configuration(format!("'{key}' must be an unsigned integer, got {v}"))
            }),
        }
    }

    /// Read a floating point setting.
    pub fn extra_f64(&self, key: &str) -> HalResult<Option<f64>> {
        match self.extra.get(key) {
            None => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| {
                HalError::Configuration(format!("'{key}' must be a number, got {v}"))
            }),
        }
    }

    /// Read a boolean setting.
    pub fn extra_bool(&self, key: &str) -> HalResult<Option<bool>> {
        match self.extra.get(key) {
            None => Ok(None),
            Some(v) => v.as_bool().map(Some).ok_or_else(|| {
                HalError::Configuration(format!("'{key}' must be a boolean, got {v}"))
            }),
        }
    }
}

impl fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("backend", &self.backend)
            .field("topology", &self.topology)
            .field("endpoint", &self.endpoint)
            .field("token", &"[REDACTED]")
            .field("extra", &self.extra)
            .finish()
    }
}
