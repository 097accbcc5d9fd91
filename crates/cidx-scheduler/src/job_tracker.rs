//! Durable registry of background operations (spec.md §4.5), backed by the
//! `background_jobs` table of `server.db` plus an in-memory hot map for
//! active jobs — mirroring the teacher's pattern of an authoritative
//! in-memory structure backed by a durable table (`index-scheduler`'s
//! `IndexMap` over an LMDB database), adapted to SQLite per
//! SPEC_FULL.md §4.5.A.
//!
//! All job-tracker-integrated components accept `Option<Arc<JobTracker>>`
//! and must swallow (log, never propagate) any error the tracker itself
//! raises — tracker failures never abort the operation being tracked
//! (spec.md §4.5, §4.11). `log_tracker_failure` is the one place that
//! happens.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use cidx_types::error::JOBTRACKER_OBSERVER_FAILURE;
use cidx_types::job::{JobStatus, OperationType, TrackedJob};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::Result;

const TABLE: &str = "background_jobs";

pub struct JobTracker {
    conn: Mutex<Connection>,
    hot: RwLock<HashMap<Uuid, TrackedJob>>,
}

impl JobTracker {
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Arc<Self>> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Arc<Self>> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                job_id TEXT PRIMARY KEY,
                operation_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                progress INTEGER NOT NULL,
                progress_info TEXT,
                error TEXT,
                username TEXT,
                repo_alias TEXT,
                metadata TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_background_jobs_cleanup
                ON {TABLE} (operation_type, status, completed_at);"
        ))?;
        Ok(Arc::new(JobTracker { conn: Mutex::new(conn), hot: RwLock::new(HashMap::new()) }))
    }

    pub fn register(
        &self,
        operation_type: OperationType,
        username: Option<String>,
        repo_alias: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<TrackedJob> {
        let job = TrackedJob::new(Uuid::now_v7(), operation_type, username, repo_alias, metadata);
        self.persist(&job)?;
        self.hot.write().unwrap().insert(job.job_id, job.clone());
        Ok(job)
    }

    /// Idempotent; silently ignores an unknown `job_id` (spec.md §4.5).
    /// The first transition into `Running` stamps `started_at`; entering a
    /// terminal state stamps `completed_at` exactly once.
    pub fn update_status(
        &self,
        job_id: Uuid,
        status: Option<JobStatus>,
        progress: Option<u8>,
        progress_info: Option<String>,
        error_message: Option<String>,
    ) -> Result<()> {
        let mut hot = self.hot.write().unwrap();
        let Some(job) = hot.get_mut(&job_id) else {
            warn!(%job_id, "update_status on unknown job id, ignoring");
            return Ok(());
        };
        if let Some(status) = status {
            if job.status.can_transition_to(status) || job.status == status {
                if status == JobStatus::Running && job.started_at.is_none() {
                    job.started_at = Some(OffsetDateTime::now_utc());
                }
                if status.is_terminal() && job.completed_at.is_none() {
                    job.completed_at = Some(OffsetDateTime::now_utc());
                }
                job.status = status;
            }
        }
        if let Some(progress) = progress {
            job.progress = progress;
        }
        if let Some(info) = progress_info {
            job.progress_info = Some(info);
        }
        if let Some(err) = error_message {
            job.error = Some(err);
        }
        let snapshot = job.clone();
        drop(hot);
        self.persist(&snapshot)
    }

    pub fn get_job(&self, job_id: Uuid) -> Result<Option<TrackedJob>> {
        if let Some(job) = self.hot.read().unwrap().get(&job_id).cloned() {
            return Ok(Some(job));
        }
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM {TABLE} WHERE job_id = ?1"),
                params![job_id.to_string()],
                row_to_job,
            )
            .optional()?)
    }

    pub fn query_jobs(
        &self,
        operation_type: Option<OperationType>,
        status: Option<JobStatus>,
        username: Option<&str>,
        since: Option<OffsetDateTime>,
    ) -> Result<Vec<TrackedJob>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = format!("SELECT {COLUMNS} FROM {TABLE} WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(op) = operation_type {
            sql.push_str(&format!(" AND operation_type = ?{}", args.len() + 1));
            args.push(Box::new(op.as_str().to_string()));
        }
        if let Some(status) = status {
            sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
            args.push(Box::new(status.as_str().to_string()));
        }
        if let Some(username) = username {
            sql.push_str(&format!(" AND username = ?{}", args.len() + 1));
            args.push(Box::new(username.to_string()));
        }
        if let Some(since) = since {
            sql.push_str(&format!(" AND created_at >= ?{}", args.len() + 1));
            args.push(Box::new(
                since.format(&time::format_description::well_known::Rfc3339).unwrap(),
            ));
        }
        sql.push_str(" ORDER BY created_at DESC");
        let refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(refs.as_slice(), row_to_job)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Deletes `completed`/`failed` rows of `operation_type` older than
    /// `max_age_hours`; never touches `running` or `pending` rows
    /// (spec.md §4.5). Returns the number of rows deleted.
    pub fn cleanup_old_jobs(&self, operation_type: OperationType, max_age_hours: i64) -> Result<usize> {
        let threshold = OffsetDateTime::now_utc() - time::Duration::hours(max_age_hours);
        let threshold_str = threshold.format(&time::format_description::well_known::Rfc3339).unwrap();
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            &format!(
                "DELETE FROM {TABLE}
                 WHERE operation_type = ?1
                   AND status IN ('completed', 'failed')
                   AND completed_at IS NOT NULL
                   AND completed_at < ?2"
            ),
            params![operation_type.as_str(), threshold_str],
        )?;
        drop(conn);
        let mut hot = self.hot.write().unwrap();
        hot.retain(|_, job| {
            !(job.operation_type == operation_type
                && job.status.is_terminal()
                && job.completed_at.is_some_and(|t| t < threshold))
        });
        Ok(deleted)
    }

    fn persist(&self, job: &TrackedJob) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {TABLE} (job_id, operation_type, status, created_at, started_at,
                                       completed_at, progress, progress_info, error, username,
                                       repo_alias, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(job_id) DO UPDATE SET
                     status = excluded.status,
                     started_at = excluded.started_at,
                     completed_at = excluded.completed_at,
                     progress = excluded.progress,
                     progress_info = excluded.progress_info,
                     error = excluded.error"
            ),
            params![
                job.job_id.to_string(),
                job.operation_type.as_str(),
                job.status.as_str(),
                job.created_at.format(&time::format_description::well_known::Rfc3339).unwrap(),
                job.started_at
                    .map(|t| t.format(&time::format_description::well_known::Rfc3339).unwrap()),
                job.completed_at
                    .map(|t| t.format(&time::format_description::well_known::Rfc3339).unwrap()),
                job.progress,
                job.progress_info,
                job.error,
                job.username,
                job.repo_alias,
                job.metadata.to_string(),
            ],
        )?;
        Ok(())
    }
}

const COLUMNS: &str = "job_id, operation_type, status, created_at, started_at, completed_at,
                        progress, progress_info, error, username, repo_alias, metadata";

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<TrackedJob> {
    let job_id: String = row.get(0)?;
    let operation_type: String = row.get(1)?;
    let status: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    let started_at: Option<String> = row.get(4)?;
    let completed_at: Option<String> = row.get(5)?;
    let metadata: String = row.get(11)?;
    Ok(TrackedJob {
        job_id: Uuid::parse_str(&job_id).unwrap_or_default(),
        operation_type: OperationType::parse(&operation_type).unwrap_or(OperationType::MultiSearch),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        created_at: parse_rfc3339(&created_at),
        started_at: started_at.map(|s| parse_rfc3339(&s)),
        completed_at: completed_at.map(|s| parse_rfc3339(&s)),
        progress: row.get(6)?,
        progress_info: row.get(7)?,
        error: row.get(8)?,
        username: row.get(9)?,
        repo_alias: row.get(10)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
    })
}

fn parse_rfc3339(s: &str) -> OffsetDateTime {
    OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Call at every site that talks to an optional `JobTracker`: logs with the
/// stable `JOBTRACKER-OBSERVER-001` code and never propagates (spec.md §7).
pub fn log_tracker_failure(context: &str, err: &crate::error::Error) {
    error!(code = %JOBTRACKER_OBSERVER_FAILURE, context, error = %err, "job tracker observer failed");
}
