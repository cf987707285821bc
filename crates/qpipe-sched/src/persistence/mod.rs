//! Persistence layer for job state.

mod memory_store;
mod sqlite_store;

pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;

use async_trait::async_trait;

use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobFilter, JobId, JobPatch, JobStatus};

/// Trait for job storage.
///
/// `compare_and_set_status` is the only way a stored job changes after
/// creation. It succeeds only when the stored status equals `expected`,
/// which is what keeps two workers from processing the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails if the id already exists.
    async fn create(&self, job: &Job) -> SchedResult<()>;

    /// Load a job from the store.
    async fn get(&self, job_id: &JobId) -> SchedResult<Option<Job>>;

    /// Move a job from `expected` to `next`, applying `patch` atomically.
    ///
    /// Returns the updated job, `StatusConflict` if the stored status is not
    /// `expected`, or `InvalidJobState` if the edge is not allowed.
    async fn compare_and_set_status(
        &self,
        job_id: &JobId,
        expected: JobStatus,
        next: JobStatus,
        patch: JobPatch,
    ) -> SchedResult<Job>;

    /// Delete a job from the store.
    async fn purge(&self, job_id: &JobId) -> SchedResult<bool>;

    /// List jobs matching a filter, oldest submission first.
    async fn list(&self, filter: &JobFilter) -> SchedResult<Vec<Job>>;
}

/// Shared compare-and-set logic applied to an in-hand copy of the job.
pub(crate) fn apply_transition(
    job: &mut Job,
    expected: JobStatus,
    next: JobStatus,
    patch: JobPatch,
) -> SchedResult<()> {
    if job.status != expected {
        return Err(SchedError::StatusConflict {
            job_id: job.id.to_string(),
            expected: expected.to_string(),
            found: job.status.to_string(),
        });
    }
    job.transition(next, patch)
}

/// Sort by submission time and apply the filter's limit.
pub(crate) fn finish_listing(mut jobs: Vec<Job>, filter: &JobFilter) -> Vec<Job> {
    jobs.sort_by(|a, b| {
        a.timestamps
            .submitted
            .cmp(&b.timestamps.submitted)
            .then_with(|| a.id.0.cmp(&b.id.0))
    });
    if let Some(limit) = filter.limit {
        jobs.truncate(limit);
    }
    jobs
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every store must show.

    use super::*;
    use qpipe_hal::{Counts, PulseInstruction, PulseProgram, RawResult};

    pub fn job(name: &str) -> Job {
        Job::new(
            PulseProgram::new(name)
                .with_channel("d0")
                .with_instruction(PulseInstruction::delay("d0", 0, 16)),
        )
    }

    pub async fn create_and_get(store: &dyn JobStore) {
        let job = job("bell");
        store.create(&job).await.unwrap();

        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.name(), "bell");
        assert_eq!(loaded.status, JobStatus::Registered);

        assert!(store.get(&JobId::new()).await.unwrap().is_none());
        assert!(store.create(&job).await.is_err());
    }

    pub async fn compare_and_set(store: &dyn JobStore) {
        let job = job("rabi");
        store.create(&job).await.unwrap();

        let updated = store
            .compare_and_set_status(
                &job.id,
                JobStatus::Registered,
                JobStatus::Preprocessing,
                JobPatch::none(),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, JobStatus::Preprocessing);

        // Second writer with the stale expectation loses
        let err = store
            .compare_and_set_status(
                &job.id,
                JobStatus::Registered,
                JobStatus::Preprocessing,
                JobPatch::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedError::StatusConflict { .. }));

        // Edge not in the state machine
        let err = store
            .compare_and_set_status(
                &job.id,
                JobStatus::Preprocessing,
                JobStatus::Done,
                JobPatch::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedError::InvalidJobState { .. }));

        let err = store
            .compare_and_set_status(
                &JobId::new(),
                JobStatus::Registered,
                JobStatus::Failed,
                JobPatch::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedError::JobNotFound(_)));
    }

    pub async fn patch_is_persisted(store: &dyn JobStore) {
        let job = job("ramsey");
        store.create(&job).await.unwrap();
        for (from, to) in [
            (JobStatus::Registered, JobStatus::Preprocessing),
            (JobStatus::Preprocessing, JobStatus::QueuedForExecution),
            (JobStatus::QueuedForExecution, JobStatus::Executing),
        ] {
            store
                .compare_and_set_status(&job.id, from, to, JobPatch::none())
                .await
                .unwrap();
        }

        let result = RawResult::new("sim1q", Counts::from_pairs([("0", 10), ("1", 6)]), 16);
        store
            .compare_and_set_status(
                &job.id,
                JobStatus::Executing,
                JobStatus::Done,
                JobPatch::result(result.clone()).with_attempts(1),
            )
            .await
            .unwrap();

        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Done);
        assert_eq!(loaded.result, Some(result));
        assert_eq!(loaded.attempts, 1);
        assert!(loaded.timestamps.completed.is_some());
    }

    pub async fn list_and_purge(store: &dyn JobStore) {
        let a = job("a");
        let b = job("b");
        let c = job("c");
        for j in [&a, &b, &c] {
            store.create(j).await.unwrap();
        }
        store
            .compare_and_set_status(
                &b.id,
                JobStatus::Registered,
                JobStatus::Cancelled,
                JobPatch::none(),
            )
            .await
            .unwrap();

        let all = store.list(&JobFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let active = store.list(&JobFilter::active()).await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|j| j.id != b.id));

        let limited = store
            .list(&JobFilter::default().with_limit(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        assert!(store.purge(&b.id).await.unwrap());
        assert!(!store.purge(&b.id).await.unwrap());
        assert!(store.get(&b.id).await.unwrap().is_none());
    }
}
