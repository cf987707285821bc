//! In-memory job store.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobFilter, JobId, JobPatch, JobStatus};
use crate::persistence::{JobStore, apply_transition, finish_listing};

/// Job store kept entirely in memory.
///
/// Suitable for tests and single-process runs that do not need to survive
/// a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<FxHashMap<JobId, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, job: &Job) -> SchedResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(SchedError::PersistenceError(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> SchedResult<Option<Job>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn compare_and_set_status(
        &self,
        job_id: &JobId,
        expected: JobStatus,
        next: JobStatus,
        patch: JobPatch,
    ) -> SchedResult<Job> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedError::JobNotFound(job_id.to_string()))?;

        // Work on a copy so a rejected transition leaves the stored job as it was
        let mut updated = stored.clone();
        apply_transition(&mut updated, expected, next, patch)?;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn purge(&self, job_id: &JobId) -> SchedResult<bool> {
        Ok(self.jobs.write().await.remove(job_id).is_some())
    }

    async fn list(&self, filter: &JobFilter) -> SchedResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let matching = jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        Ok(finish_listing(matching, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::contract;

    #[tokio::test]
    async fn test_create_and_get() {
        contract::create_and_get(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        contract::compare_and_set(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_patch_is_persisted() {
        contract::patch_is_persisted(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_list_and_purge() {
        let store = MemoryStore::new();
        contract::list_and_purge(&store).await;
        assert_eq!(store.len().await, 2);
    }
}
