//! Service configuration.
//!
//! Loaded once at startup from YAML. Lookup order for the file:
//! `--config`, then `$QPIPE_CONFIG`, then `<config dir>/qpipe/config.yaml`;
//! without any file the built-in defaults apply (single-qubit simulator,
//! SQLite store in the state directory).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use qpipe_hal::ExecutorConfig;
use qpipe_sched::PipelineConfig;

/// Job store selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Jobs are lost when the process exits.
    Memory,
    /// SQLite database; defaults to `<state_dir>/jobs.db`.
    Sqlite {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Sqlite { path: None }
    }
}

/// Complete `qpipe` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_executor")]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Directory receiving one `result.json` per finished job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<PathBuf>,
}

fn default_executor() -> ExecutorConfig {
    ExecutorConfig::new("sim1q")
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            executor: default_executor(),
            pipeline: PipelineConfig::default(),
            store: StoreConfig::default(),
            sink: None,
        }
    }
}

impl ServiceConfig {
    /// Parse a YAML document.
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml_ng::from_str(source).context("Invalid service configuration")
    }

    /// Load the configuration and apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::locate(explicit) {
            Some(path) => {
                let source = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                tracing::debug!("Loaded configuration from {}", path.display());
                Self::from_yaml(&source)
                    .with_context(|| format!("Failed to parse config: {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var("QPIPE_CONFIG") {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join("qpipe").join("config.yaml"))
            .filter(|path| path.exists())
    }

    /// Apply `QPIPE_BACKEND` and `QPIPE_STATE_DIR`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(backend) = var("QPIPE_BACKEND").filter(|b| !b.is_empty()) {
            self.executor.backend = backend;
        }
        if let Some(dir) = var("QPIPE_STATE_DIR").filter(|d| !d.is_empty()) {
            self.pipeline.state_dir = PathBuf::from(dir);
        }
    }

    /// Path of the SQLite job store, if one is configured.
    pub fn sqlite_path(&self) -> Option<PathBuf> {
        match &self.store {
            StoreConfig::Memory => None,
            StoreConfig::Sqlite { path } => Some(
                path.clone()
                    .unwrap_or_else(|| self.pipeline.state_dir.join("jobs.db")),
            ),
        }
    }
}
