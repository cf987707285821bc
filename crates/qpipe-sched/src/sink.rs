//! Result sink.
//!
//! After a successful run the orchestrator hands the raw result to a
//! [`ResultSink`], which persists it somewhere outside the job store and
//! returns an [`ArtifactRef`] recorded on the job.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use qpipe_hal::RawResult;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SchedError, SchedResult};
use crate::job::JobId;

/// Opaque reference to a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Destination for finished results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Store a result and return where it went.
    async fn store(&self, job_id: &JobId, result: &RawResult) -> SchedResult<ArtifactRef>;

    /// Read a stored result back.
    async fn load(&self, artifact: &ArtifactRef) -> SchedResult<RawResult>;
}

/// Writes each result to `<root>/<job_id>/result.json`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, job_id: &JobId) -> PathBuf {
        self.root.join(job_id.to_string()).join("result.json")
    }
}

#[async_trait]
impl ResultSink for DirectorySink {
    async fn store(&self, job_id: &JobId, result: &RawResult) -> SchedResult<ArtifactRef> {
        let path = self.path_for(job_id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let content = serde_json::to_string_pretty(result)?;
        // Write to a sibling and rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(job_id = %job_id, path = %path.display(), "Result stored");
        Ok(ArtifactRef(path.to_string_lossy().into_owned()))
    }

    async fn load(&self, artifact: &ArtifactRef) -> SchedResult<RawResult> {
        let path = Path::new(artifact.as_str());
        if !path.starts_with(&self.root) {
            return Err(SchedError::PersistenceError(format!(
                "artifact '{artifact}' is outside {}",
                self.root.display()
            )));
        }
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qpipe_hal::Counts;

    #[tokio::test]
    async fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        let job_id = JobId::new();
        let result = RawResult::new("sim1q", Counts::from_pairs([("0", 700), ("1", 324)]), 1024)
            .with_execution_time(12);

        let artifact = sink.store(&job_id, &result).await.unwrap();
        assert!(artifact.as_str().ends_with("result.json"));
        assert!(artifact.as_str().contains(&job_id.to_string()));

        let loaded = sink.load(&artifact).await.unwrap();
        assert_eq!(loaded, result);
    }

    #[tokio::test]
    async fn test_load_rejects_foreign_path() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("results"));
        let err = sink
            .load(&ArtifactRef("/etc/passwd".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedError::PersistenceError(_)));
    }

    #[tokio::test]
    async fn test_load_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        let missing = ArtifactRef(dir.path().join("nope/result.json").to_string_lossy().into());
        assert!(matches!(
            sink.load(&missing).await,
            Err(SchedError::IoError(_))
        ));
    }
}
