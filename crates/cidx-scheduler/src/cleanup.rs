//! Queue of versioned snapshot directories waiting for deletion once no
//! query pins them (spec.md §4.4). Does not reference `RefreshScheduler` —
//! only `QueryRefTracker` and the filesystem — breaking the scheduler /
//! cleanup / registry cycle by arranging leaves first (spec.md §9).

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use cidx_types::cleanup::{CleanupEntry, CleanupState};
use cidx_types::job::OperationType;
use cidx_types::GoldenRepo;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::job_tracker::{log_tracker_failure, JobTracker};
use crate::ref_tracker::QueryRefTracker;

const MAX_STORED_ERROR_LEN: usize = 2000;

pub struct CleanupManager {
    queue: Mutex<VecDeque<CleanupEntry>>,
    ref_tracker: Arc<QueryRefTracker>,
    job_tracker: Option<Arc<JobTracker>>,
}

impl CleanupManager {
    pub fn new(ref_tracker: Arc<QueryRefTracker>, job_tracker: Option<Arc<JobTracker>>) -> Self {
        CleanupManager { queue: Mutex::new(VecDeque::new()), ref_tracker, job_tracker }
    }

    /// Adds `path` to the queue, idempotently (duplicates collapse).
    /// Rejects paths lacking the `.versioned/` marker: scheduling a master
    /// path is a programming error and must raise, not silently no-op
    /// (spec.md §4.4, bug #236 guard).
    pub fn schedule(&self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        if !GoldenRepo::is_versioned_path(&path) {
            return Err(Error::MasterPathScheduledForCleanup(path));
        }
        let mut queue = self.queue.lock().unwrap();
        // Entries left in the queue are always `Waiting` or `Skipped` —
        // `Deleted` entries are removed from the queue the pass they're
        // deleted (see `process`) — so either state collapses a duplicate.
        if queue.iter().any(|e| e.path == path) {
            return Ok(());
        }
        queue.push_back(CleanupEntry {
            path,
            scheduled_at: OffsetDateTime::now_utc(),
            state: CleanupState::Waiting,
        });
        Ok(())
    }

    pub fn pending(&self) -> Vec<CleanupEntry> {
        self.queue.lock().unwrap().iter().cloned().collect()
    }

    /// One pass over the queue: entries in state `Waiting` or `Skipped` are
    /// reconsidered; paths with `ref_count > 0` are marked `Skipped` and
    /// requeued for a later pass; everything else is deleted (or marked
    /// `Deleted` if already gone from disk, then dropped from the queue).
    /// Never holds the `QueryRefTracker` lock across the filesystem delete —
    /// it only samples the ref count, which is itself internally locked and
    /// released before `std::fs::remove_dir_all` runs (spec.md §5 lock
    /// discipline).
    pub fn process(&self) -> ProcessReport {
        let candidates: Vec<CleanupEntry> = {
            let mut queue = self.queue.lock().unwrap();
            let mut candidates = Vec::new();
            let mut keep = VecDeque::new();
            while let Some(entry) = queue.pop_front() {
                if entry.state == CleanupState::Waiting || entry.state == CleanupState::Skipped {
                    candidates.push(entry);
                } else {
                    keep.push_back(entry);
                }
            }
            *queue = keep;
            candidates
        };

        let mut report = ProcessReport::default();
        for mut entry in candidates {
            if self.ref_tracker.ref_count(&entry.path) > 0 {
                entry.state = CleanupState::Skipped;
                report.requeued += 1;
                self.queue.lock().unwrap().push_back(entry);
                continue;
            }

            let job = self.job_tracker.as_ref().and_then(|tracker| {
                match tracker.register(
                    OperationType::IndexCleanup,
                    None,
                    None,
                    Some(serde_json::json!({ "path": entry.path })),
                ) {
                    Ok(job) => {
                        if let Err(err) = tracker.update_status(
                            job.job_id,
                            Some(cidx_types::JobStatus::Running),
                            None,
                            None,
                            None,
                        ) {
                            log_tracker_failure("cleanup.process.running", &err);
                        }
                        Some(job)
                    }
                    Err(err) => {
                        log_tracker_failure("cleanup.process.register", &err);
                        None
                    }
                }
            });

            match delete_path(&entry.path) {
                Ok(()) => {
                    entry.state = CleanupState::Deleted;
                    info!(path = %entry.path, "deleted obsolete index snapshot");
                    report.deleted += 1;
                    self.complete_job(job, true, None);
                }
                Err(err) => {
                    warn!(path = %entry.path, error = %err, "failed to delete snapshot, will retry next pass");
                    let mut message = err.to_string();
                    message.truncate(MAX_STORED_ERROR_LEN);
                    report.failed += 1;
                    self.complete_job(job, false, Some(message));
                    // Retry on the next tick, not immediately: requeue.
                    self.queue.lock().unwrap().push_back(entry);
                }
            }
        }
        report
    }

    fn complete_job(&self, job: Option<cidx_types::TrackedJob>, success: bool, error: Option<String>) {
        let (Some(tracker), Some(job)) = (self.job_tracker.as_ref(), job) else { return };
        let status =
            if success { cidx_types::JobStatus::Completed } else { cidx_types::JobStatus::Failed };
        if let Err(err) = tracker.update_status(job.job_id, Some(status), Some(100), None, error) {
            log_tracker_failure("cleanup.process.complete", &err);
        }
    }
}

#[derive(Debug, Default)]
pub struct ProcessReport {
    pub deleted: usize,
    pub failed: usize,
    pub requeued: usize,
}

fn delete_path(path: &str) -> std::io::Result<()> {
    let p = Path::new(path);
    if !p.exists() {
        // Already removed: treated as success, matching "a scheduled entry
        // that disappears from disk is marked deleted without error"
        // (spec.md §4.4).
        return Ok(());
    }
    std::fs::remove_dir_all(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn versioned(root: &Path, alias: &str, v: u64) -> String {
        let p = root.join(alias).join(".versioned").join(alias).join(format!("v_{v}"));
        fs::create_dir_all(&p).unwrap();
        p.to_string_lossy().into_owned()
    }

    #[test]
    fn scheduling_a_master_path_is_rejected() {
        let manager = CleanupManager::new(QueryRefTracker::new(), None);
        let err = manager.schedule("/gr/A").unwrap_err();
        assert!(matches!(err, Error::MasterPathScheduledForCleanup(_)));
    }

    #[test]
    fn duplicate_schedule_calls_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let path = versioned(dir.path(), "A", 100);
        let manager = CleanupManager::new(QueryRefTracker::new(), None);
        manager.schedule(path.clone()).unwrap();
        manager.schedule(path.clone()).unwrap();
        assert_eq!(manager.pending().len(), 1);
    }

    #[test]
    fn unpinned_snapshot_is_deleted_on_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = versioned(dir.path(), "A", 100);
        let manager = CleanupManager::new(QueryRefTracker::new(), None);
        manager.schedule(path.clone()).unwrap();
        let report = manager.process();
        assert_eq!(report.deleted, 1);
        assert!(!Path::new(&path).exists());
    }

    #[test]
    fn pinned_snapshot_survives_a_pass_then_is_deleted_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = versioned(dir.path(), "A", 100);
        let ref_tracker = QueryRefTracker::new();
        let manager = CleanupManager::new(Arc::clone(&ref_tracker), None);
        manager.schedule(path.clone()).unwrap();

        let guard = ref_tracker.pin(&path);
        let report = manager.process();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.requeued, 1);
        assert!(Path::new(&path).exists());
        assert_eq!(manager.pending()[0].state, CleanupState::Skipped);

        drop(guard);
        let report = manager.process();
        assert_eq!(report.deleted, 1);
        assert!(!Path::new(&path).exists());
    }

    #[test]
    fn a_second_schedule_call_collapses_even_after_a_skipped_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = versioned(dir.path(), "A", 100);
        let ref_tracker = QueryRefTracker::new();
        let manager = CleanupManager::new(Arc::clone(&ref_tracker), None);
        manager.schedule(path.clone()).unwrap();

        let guard = ref_tracker.pin(&path);
        manager.process();
        assert_eq!(manager.pending()[0].state, CleanupState::Skipped);

        manager.schedule(path.clone()).unwrap();
        assert_eq!(manager.pending().len(), 1, "duplicate schedule still collapses once skipped");

        drop(guard);
        let report = manager.process();
        assert_eq!(report.deleted, 1);
    }

    #[test]
    fn already_removed_path_is_marked_deleted_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = versioned(dir.path(), "A", 100);
        let manager = CleanupManager::new(QueryRefTracker::new(), None);
        manager.schedule(path.clone()).unwrap();
        fs::remove_dir_all(&path).unwrap();
        let report = manager.process();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.failed, 0);
    }
}
