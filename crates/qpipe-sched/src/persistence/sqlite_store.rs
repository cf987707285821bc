//! SQLite-based persistence for production use.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobFilter, JobId, JobPatch, JobStatus};
use crate::persistence::{JobStore, apply_transition, finish_listing};

/// SQLite-based job store.
///
/// Jobs survive a restart, which is what makes recovery on startup
/// possible. Status changes are conditional updates on the stored status.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    pub fn new(path: impl AsRef<Path>) -> SchedResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    /// Create a new in-memory SQLite store.
    pub fn in_memory() -> SchedResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    fn init_schema_sync(&self) -> SchedResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SchedError::DatabaseError(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                data TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_submitted_at ON jobs(submitted_at);
            "#,
        )?;
        Ok(())
    }

    fn load_sync(conn: &Connection, job_id: &JobId) -> SchedResult<Option<Job>> {
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM jobs WHERE id = ?1",
                rusqlite::params![job_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(SchedError::from))
            .transpose()
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn create(&self, job: &Job) -> SchedResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SchedError::DatabaseError(e.to_string()))?;
        let data = serde_json::to_string(job)?;

        conn.execute(
            r#"
            INSERT INTO jobs (id, name, status, priority, data, submitted_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            rusqlite::params![
                job.id.to_string(),
                job.name(),
                job.status.name(),
                job.priority.value(),
                data,
                job.timestamps.submitted.to_rfc3339(),
                job.timestamps.completed.map(|t| t.to_rfc3339()),
            ],
        )?;

        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> SchedResult<Option<Job>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SchedError::DatabaseError(e.to_string()))?;
        Self::load_sync(&conn, job_id)
    }

    async fn compare_and_set_status(
        &self,
        job_id: &JobId,
        expected: JobStatus,
        next: JobStatus,
        patch: JobPatch,
    ) -> SchedResult<Job> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SchedError::DatabaseError(e.to_string()))?;

        let mut job = Self::load_sync(&conn, job_id)?
            .ok_or_else(|| SchedError::JobNotFound(job_id.to_string()))?;
        apply_transition(&mut job, expected, next, patch)?;
        let data = serde_json::to_string(&job)?;

        let updated = conn.execute(
            r#"
            UPDATE jobs SET status = ?1, data = ?2, completed_at = ?3
            WHERE id = ?4 AND status = ?5
            "#,
            rusqlite::params![
                next.name(),
                data,
                job.timestamps.completed.map(|t| t.to_rfc3339()),
                job_id.to_string(),
                expected.name(),
            ],
        )?;

        if updated == 0 {
            let found: Option<String> = conn
                .query_row(
                    "SELECT status FROM jobs WHERE id = ?1",
                    rusqlite::params![job_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(SchedError::StatusConflict {
                job_id: job_id.to_string(),
                expected: expected.to_string(),
                found: found.unwrap_or_else(|| "deleted".into()),
            });
        }

        debug!(job_id = %job_id, from = %expected, to = %next, "Status updated");
        Ok(job)
    }

    async fn purge(&self, job_id: &JobId) -> SchedResult<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SchedError::DatabaseError(e.to_string()))?;
        let deleted = conn.execute(
            "DELETE FROM jobs WHERE id = ?1",
            rusqlite::params![job_id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    async fn list(&self, filter: &JobFilter) -> SchedResult<Vec<Job>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SchedError::DatabaseError(e.to_string()))?;

        let mut stmt = conn.prepare("SELECT status, data FROM jobs ORDER BY submitted_at")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut jobs = Vec::new();
        for row in rows {
            let (status, data) = row?;
            // Cheap pre-filter on the indexed column before deserializing
            if let (Some(wanted), Some(status)) = (&filter.status, JobStatus::from_name(&status)) {
                if !wanted.contains(&status) {
                    continue;
                }
            }
            let job: Job = serde_json::from_str(&data)?;
            if filter.matches(&job) {
                jobs.push(job);
            }
        }

        Ok(finish_listing(jobs, filter))
    }
}
