//! Time-driven loop that decides which repos to refresh, runs the refresh
//! pipeline, swaps aliases, and schedules cleanup of obsolete snapshots
//! (spec.md §4.8) — the largest and most load-bearing component in this
//! crate, mirroring the teacher's own `index-scheduler` being the largest
//! crate in `meilisearch-meilisearch`.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cidx_types::job::OperationType;
use cidx_types::GoldenRepo;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{error, info, warn};

use crate::alias_store::AliasStore;
use crate::cleanup::CleanupManager;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::job_tracker::{log_tracker_failure, JobTracker};
use crate::refresh_pipeline::RefreshPipeline;
use crate::registry::Registry;

/// RAII guard for a named write lock (spec.md §4.8 step 4: "acquire a
/// named write lock per logical scope ... release it in a
/// finally-equivalent, but only release if acquire returned true"). The
/// "only release if acquired" rule falls out naturally here: there is no
/// guard to drop unless `try_acquire` returned `Some`.
pub struct NamedLockGuard {
    name: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        self.held.lock().unwrap().remove(&self.name);
    }
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub spread: usize,
    pub dispatched: Vec<String>,
    pub skipped_in_flight: Vec<String>,
}

pub struct RefreshScheduler {
    registry: Arc<Registry>,
    alias_store: Arc<AliasStore>,
    cleanup: Arc<CleanupManager>,
    job_tracker: Option<Arc<JobTracker>>,
    pipeline: Arc<dyn RefreshPipeline>,
    config: Config,
    golden_repos_root: PathBuf,
    in_flight: Mutex<HashSet<String>>,
    named_locks: Arc<Mutex<HashSet<String>>>,
    pool: rayon::ThreadPool,
    stop: Arc<AtomicBool>,
}

impl RefreshScheduler {
    pub fn new(
        registry: Arc<Registry>,
        alias_store: Arc<AliasStore>,
        cleanup: Arc<CleanupManager>,
        job_tracker: Option<Arc<JobTracker>>,
        pipeline: Arc<dyn RefreshPipeline>,
        config: Config,
        golden_repos_root: PathBuf,
    ) -> Result<Arc<Self>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrent_background_jobs.max(1))
            .thread_name(|i| format!("cidx-refresh-worker-{i}"))
            .build()
            .map_err(|e| Error::InvalidParameter(e.to_string()))?;
        Ok(Arc::new(RefreshScheduler {
            registry,
            alias_store,
            cleanup,
            job_tracker,
            pipeline,
            config,
            golden_repos_root,
            in_flight: Mutex::new(HashSet::new()),
            named_locks: Arc::new(Mutex::new(HashSet::new())),
            pool,
        stop: Arc::new(AtomicBool::new(false)),
        }))
    }

    pub fn try_acquire_named_lock(&self, name: &str) -> Option<NamedLockGuard> {
        let mut held = self.named_locks.lock().unwrap();
        if held.insert(name.to_string()) {
            Some(NamedLockGuard { name: name.to_string(), held: Arc::clone(&self.named_locks) })
        } else {
            None
        }
    }

    fn is_in_flight(&self, alias: &str) -> bool {
        self.in_flight.lock().unwrap().contains(alias)
    }

    fn mark_in_flight(&self, alias: &str) -> bool {
        self.in_flight.lock().unwrap().insert(alias.to_string())
    }

    fn clear_in_flight(&self, alias: &str) {
        self.in_flight.lock().unwrap().remove(alias);
    }

    /// Initial spread (spec.md §4.8 step 1): for N repos with
    /// `next_refresh_at = NULL`, slot `i` is the smallest value `>= now +
    /// (i+1) * interval / N`, so the earliest slot is `>= now +
    /// interval/N` and the latest is exactly `now + interval`. Integer
    /// ceiling division keeps every slot strictly in `(now, now+interval]`
    /// without floating-point drift.
    fn spread_new_repos(&self, now: OffsetDateTime) -> usize {
        let pending = match self.registry.repos_pending_initial_spread() {
            Ok(p) => p,
            Err(err) => {
                error!(error = %err, "failed to list repos pending initial spread");
                return 0;
            }
        };
        let n = pending.len() as u64;
        if n == 0 {
            return 0;
        }
        let interval_secs = self.config.refresh_interval_seconds;
        for (i, repo) in pending.iter().enumerate() {
            let i = i as u64 + 1;
            let slot_secs = (interval_secs * i).div_ceil(n);
            let next = now + TimeDuration::seconds(slot_secs as i64);
            if let Err(err) = self.registry.set_next_refresh(&repo.alias, next) {
                error!(alias = %repo.alias, error = %err, "failed to persist initial spread slot");
            }
        }
        pending.len()
    }

    /// One scheduler tick (spec.md §4.8). Does not perform network I/O
    /// itself; it only dispatches refresh work onto the bounded pool.
    pub fn tick(self: &Arc<Self>, now: OffsetDateTime) -> TickReport {
        let spread = self.spread_new_repos(now);
        let due = match self.registry.repos_due_for_refresh(now) {
            Ok(d) => d,
            Err(err) => {
                error!(error = %err, "failed to list repos due for refresh");
                return TickReport { spread, dispatched: vec![], skipped_in_flight: vec![] };
            }
        };

        let mut report = TickReport { spread, dispatched: vec![], skipped_in_flight: vec![] };
        for repo in due {
            if !self.mark_in_flight(&repo.alias) {
                report.skipped_in_flight.push(repo.alias);
                continue;
            }
            self.dispatch_refresh(repo.alias.clone());
            report.dispatched.push(repo.alias);
        }
        report
    }

    /// Submits `_executeRefresh(alias)` on the bounded pool and records a
    /// `refresh_golden` job (spec.md §4.8 step 3).
    fn dispatch_refresh(self: &Arc<Self>, alias: String) -> Option<uuid::Uuid> {
        let job = self.job_tracker.as_ref().and_then(|tracker| {
            match tracker.register(
                OperationType::RefreshGolden,
                None,
                Some(alias.clone()),
                None,
            ) {
                Ok(job) => Some(job),
                Err(err) => {
                    log_tracker_failure("refresh_scheduler.dispatch.register", &err);
                    None
                }
            }
        });
        let job_id = job.as_ref().map(|j| j.job_id);

        let scheduler = Arc::clone(self);
        self.pool.spawn(move || {
            if let (Some(tracker), Some(job_id)) = (scheduler.job_tracker.as_ref(), job_id) {
                if let Err(err) = tracker.update_status(
                    job_id,
                    Some(cidx_types::JobStatus::Running),
                    None,
                    None,
                    None,
                ) {
                    log_tracker_failure("refresh_scheduler.run.running", &err);
                }
            }

            let outcome = scheduler.execute_refresh(&alias);

            if let (Some(tracker), Some(job_id)) = (scheduler.job_tracker.as_ref(), job_id) {
                let (status, error) = match &outcome {
                    Ok(()) => (cidx_types::JobStatus::Completed, None),
                    Err(err) => (cidx_types::JobStatus::Failed, Some(err.to_string())),
                };
                if let Err(err) = tracker.update_status(job_id, Some(status), Some(100), None, error)
                {
                    log_tracker_failure("refresh_scheduler.run.complete", &err);
                }
            }

            if let Err(err) = &outcome {
                warn!(alias = %alias, error = %err, "refresh failed, alias left pointing at previous snapshot");
            }

            scheduler.clear_in_flight(&alias);
        });
        job_id
    }

    /// `RefreshGolden` operation (spec.md §6): refresh a single alias on
    /// demand. Coalesces with an already-in-flight refresh of the same
    /// alias rather than running twice concurrently (spec.md §4.8 state
    /// machine).
    pub fn refresh_now(self: &Arc<Self>, alias: &str) -> Result<Option<uuid::Uuid>> {
        if self.registry.get(alias)?.is_none() {
            return Err(Error::AliasUnknown(alias.to_string()));
        }
        if !self.mark_in_flight(alias) {
            return Err(Error::InFlight(alias.to_string()));
        }
        Ok(self.dispatch_refresh(alias.to_string()))
    }

    /// `_executeRefresh` (spec.md §4.8): clone/pull, build a new snapshot,
    /// swap the alias, update the registry, and schedule cleanup of the
    /// previous snapshot — but only if it's a versioned path, never the
    /// master (bug #236 guard).
    fn execute_refresh(&self, alias: &str) -> Result<()> {
        let repo = self
            .registry
            .get(alias)?
            .ok_or_else(|| Error::AliasUnknown(alias.to_string()))?;

        let cur_target = self.alias_store.read(alias)?;
        let master_path = self.golden_repos_root.join(alias);

        let outcome = self.pipeline.clone_or_pull(&repo.source_url, &master_path)?;
        if !outcome.changed {
            info!(alias, "no changes since last refresh, skipping rebuild");
            return Ok(());
        }

        let version = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let snapshot_path =
            master_path.join(".versioned").join(alias).join(format!("v_{version}"));
        std::fs::create_dir_all(&snapshot_path)?;
        self.pipeline.build_index(&master_path, &snapshot_path, &repo.enabled_backends)?;

        let new_path = snapshot_path.to_string_lossy().into_owned();
        self.alias_store.swap(alias, &new_path)?;
        self.registry.set_index_path(alias, &new_path)?;

        let now = OffsetDateTime::now_utc();
        let next = now + TimeDuration::seconds(self.config.refresh_interval_seconds as i64);
        self.registry.set_last_and_next_refresh(alias, now, next)?;

        // Cleanup guard (spec.md §4.8 step 6, bug #236): only schedule the
        // previous target if it is a versioned snapshot. A master path is
        // only ever overwritten in place, never deleted.
        if GoldenRepo::is_versioned_path(&cur_target) {
            if let Err(err) = self.cleanup.schedule(cur_target.clone()) {
                error!(alias, path = %cur_target, error = %err, "failed to schedule previous snapshot for cleanup");
            }
        } else {
            info!(alias, path = %cur_target, "previous target is the master path, not scheduling for cleanup");
        }

        Ok(())
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Spawns the ticker loop at `interval` (default 30s, independent of
/// `refresh_interval_seconds`, which is the per-repo cadence). The loop
/// itself performs no I/O; it only calls `tick`, which dispatches to the
/// worker pool (spec.md §4.8, §5).
pub fn spawn_loop(scheduler: Arc<RefreshScheduler>, tick_period: std::time::Duration) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !scheduler.stop.load(Ordering::Acquire) {
            std::thread::sleep(tick_period);
            if scheduler.stop.load(Ordering::Acquire) {
                break;
            }
            let report = scheduler.tick(OffsetDateTime::now_utc());
            if !report.dispatched.is_empty() || report.spread > 0 {
                info!(
                    spread = report.spread,
                    dispatched = report.dispatched.len(),
                    "refresh scheduler tick"
                );
            }
        }
    })
}

#[allow(dead_code)]
fn assert_versioned(path: &Path) -> bool {
    GoldenRepo::is_versioned_path(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::CleanupManager;
    use crate::ref_tracker::QueryRefTracker;
    use cidx_types::golden_repo::RepoConfig;
    use std::sync::atomic::AtomicUsize;

    struct FakePipeline {
        calls: AtomicUsize,
    }

    impl RefreshPipeline for FakePipeline {
        fn clone_or_pull(
            &self,
            _source_url: &str,
            master_path: &Path,
        ) -> std::result::Result<crate::refresh_pipeline::RefreshOutcome, Error> {
            std::fs::create_dir_all(master_path).unwrap();
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(crate::refresh_pipeline::RefreshOutcome { changed: true })
        }

        fn build_index(
            &self,
            _master_path: &Path,
            snapshot_path: &Path,
            _backends: &BTreeSet<cidx_types::Backend>,
        ) -> std::result::Result<(), Error> {
            std::fs::create_dir_all(snapshot_path)?;
            std::fs::write(snapshot_path.join("index.bin"), b"data")?;
            Ok(())
        }
    }

    fn fixture(root: &Path) -> (Arc<Registry>, Arc<AliasStore>, Arc<RefreshScheduler>) {
        let registry = Arc::new(Registry::in_memory().unwrap());
        let alias_store = Arc::new(AliasStore::in_memory().unwrap());
        let cleanup = Arc::new(CleanupManager::new(QueryRefTracker::new(), None));
        let pipeline = Arc::new(FakePipeline { calls: AtomicUsize::new(0) });
        let mut config = Config::default();
        config.max_concurrent_background_jobs = 2;
        let scheduler = RefreshScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&alias_store),
            cleanup,
            None,
            pipeline,
            config,
            root.to_path_buf(),
        )
        .unwrap();
        (registry, alias_store, scheduler)
    }

    fn wait_until_idle(scheduler: &Arc<RefreshScheduler>, alias: &str) {
        for _ in 0..200 {
            if !scheduler.is_in_flight(alias) {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("refresh never completed");
    }

    #[test]
    fn s1_first_refresh_never_deletes_master() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, alias_store, scheduler) = fixture(dir.path());
        let master = dir.path().join("A").to_string_lossy().into_owned();
        registry
            .register("A-global", "https://example.invalid/a.git", &master, &BTreeSet::from([cidx_types::Backend::Fts]), &RepoConfig::default())
            .unwrap();
        alias_store.create("A-global", &master).unwrap();

        scheduler.refresh_now("A-global").unwrap();
        wait_until_idle(&scheduler, "A-global");

        let new_path = alias_store.read("A-global").unwrap();
        assert!(new_path.contains(".versioned/"));
        assert!(Path::new(&master).exists(), "master must still exist after first refresh");
    }

    #[test]
    fn s2_second_refresh_schedules_previous_snapshot_for_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, alias_store, scheduler) = fixture(dir.path());
        let master = dir.path().join("A").to_string_lossy().into_owned();
        registry
            .register("A-global", "https://example.invalid/a.git", &master, &BTreeSet::from([cidx_types::Backend::Fts]), &RepoConfig::default())
            .unwrap();
        alias_store.create("A-global", &master).unwrap();

        scheduler.refresh_now("A-global").unwrap();
        wait_until_idle(&scheduler, "A-global");
        let first_snapshot = alias_store.read("A-global").unwrap();

        // Force another refresh past in-flight coalescing by re-marking idle.
        scheduler.refresh_now("A-global").unwrap();
        wait_until_idle(&scheduler, "A-global");
        let second_snapshot = alias_store.read("A-global").unwrap();
        assert_ne!(first_snapshot, second_snapshot);

        let pending = scheduler.cleanup.pending();
        assert!(pending.iter().any(|e| e.path == first_snapshot));
    }

    #[test]
    fn concurrent_refresh_now_coalesces_to_one_in_flight_run() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, alias_store, scheduler) = fixture(dir.path());
        let master = dir.path().join("A").to_string_lossy().into_owned();
        registry
            .register("A-global", "https://example.invalid/a.git", &master, &BTreeSet::from([cidx_types::Backend::Fts]), &RepoConfig::default())
            .unwrap();
        alias_store.create("A-global", &master).unwrap();

        assert!(scheduler.refresh_now("A-global").is_ok());
        let second = scheduler.refresh_now("A-global");
        assert!(matches!(second, Err(Error::InFlight(_))));
        wait_until_idle(&scheduler, "A-global");
    }

    #[test]
    fn s4_initial_spread_assigns_distinct_future_slots_and_skips_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, alias_store, scheduler) = fixture(dir.path());
        let mut config = Config::default();
        config.refresh_interval_seconds = 3600;
        for name in ["R1", "R2", "R3", "R4"] {
            let master = dir.path().join(name).to_string_lossy().into_owned();
            registry
                .register(name, "https://example.invalid/r.git", &master, &BTreeSet::from([cidx_types::Backend::Fts]), &RepoConfig::default())
                .unwrap();
            alias_store.create(name, &master).unwrap();
        }

        let now = OffsetDateTime::now_utc();
        let report = scheduler.tick(now);
        assert_eq!(report.spread, 4);
        assert!(report.dispatched.is_empty());

        let mut slots = Vec::new();
        for name in ["R1", "R2", "R3", "R4"] {
            let repo = registry.get(name).unwrap().unwrap();
            let next = repo.next_refresh_at.unwrap();
            assert!(next > now);
            assert!(next <= now + TimeDuration::seconds(3600));
            slots.push(next);
        }
        slots.sort();
        slots.dedup();
        assert_eq!(slots.len(), 4, "all four slots must be distinct");
    }

    #[test]
    fn named_lock_releases_only_if_acquired() {
        let dir = tempfile::tempdir().unwrap();
        let (_registry, _alias_store, scheduler) = fixture(dir.path());
        let first = scheduler.try_acquire_named_lock("cidx-meta");
        assert!(first.is_some());
        assert!(scheduler.try_acquire_named_lock("cidx-meta").is_none());
        drop(first);
        assert!(scheduler.try_acquire_named_lock("cidx-meta").is_some());
    }
}
