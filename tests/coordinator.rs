//! End-to-end exercises of `Coordinator`, wiring every collaborator crate
//! together behind fakes for the two named-only external collaborators
//! (`RefreshPipeline`, `IndexLoader`) per spec.md §1. These mirror the
//! concrete scenarios spec.md §8 lists (S1/S2/S6 in particular).

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cidx::coordinator::SearchDispatch;
use cidx::{Coordinator, NullEventSink};
use cidx_scheduler::backend::{BackendError, HealthStatus, IndexHandle, IndexLoader, SearchHit};
use cidx_scheduler::refresh_pipeline::{RefreshOutcome, RefreshPipeline};
use cidx_scheduler::{
    AliasStore, CleanupManager, Config, IndexCache, JobTracker, MultiSearchDispatcher,
    PayloadCache, QueryRefTracker, Registry, RefreshScheduler,
};
use cidx_types::golden_repo::Backend;
use cidx_types::{Role, User};
use tempfile::TempDir;

struct FakePipeline {
    pulls: AtomicUsize,
}

impl RefreshPipeline for FakePipeline {
    fn clone_or_pull(
        &self,
        _source_url: &str,
        master_path: &Path,
    ) -> Result<RefreshOutcome, cidx_scheduler::Error> {
        std::fs::create_dir_all(master_path)?;
        self.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(RefreshOutcome { changed: true })
    }

    fn build_index(
        &self,
        _master_path: &Path,
        snapshot_path: &Path,
        _backends: &BTreeSet<cidx_types::Backend>,
    ) -> Result<(), cidx_scheduler::Error> {
        std::fs::create_dir_all(snapshot_path)?;
        std::fs::write(snapshot_path.join("index.bin"), b"fake-index")?;
        Ok(())
    }
}

struct FakeHandle {
    hits: Vec<SearchHit>,
}

impl IndexHandle for FakeHandle {
    fn reload(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchHit>, BackendError> {
        Ok(self.hits.iter().take(limit).cloned().collect())
    }

    fn health(&self) -> HealthStatus {
        HealthStatus { healthy: true, detail: "ok".to_string() }
    }
}

struct FakeLoader;

impl IndexLoader for FakeLoader {
    type Handle = FakeHandle;

    fn load(&self, _kind: cidx_types::Backend, index_path: &Path) -> Result<Self::Handle, BackendError> {
        Ok(FakeHandle {
            hits: vec![SearchHit {
                file_path: format!("{}/lib.rs", index_path.display()),
                start_line: 1,
                end_line: 10,
                score: 0.9,
                snippet: "fn main() {}".to_string(),
            }],
        })
    }
}

struct Fixture {
    coordinator: Coordinator,
    registry: Arc<Registry>,
    alias_store: Arc<AliasStore>,
    job_tracker: Arc<JobTracker>,
    _tmp: TempDir,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(Registry::in_memory().unwrap());
    let alias_store = Arc::new(AliasStore::in_memory().unwrap());
    let ref_tracker = QueryRefTracker::new();
    let cleanup = Arc::new(CleanupManager::new(Arc::clone(&ref_tracker), None));
    let job_tracker = JobTracker::in_memory().unwrap();
    let payload_cache = PayloadCache::new();
    payload_cache.mark_initialized();

    let pipeline = Arc::new(FakePipeline { pulls: AtomicUsize::new(0) });
    let mut config = Config::default();
    config.max_concurrent_background_jobs = 2;
    config.multi_search_max_workers = 2;
    config.multi_search_timeout_seconds = 5;

    let refresh_scheduler = RefreshScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&alias_store),
        Arc::clone(&cleanup),
        Some(Arc::clone(&job_tracker)),
        pipeline.clone(),
        config.clone(),
        tmp.path().to_path_buf(),
    )
    .unwrap();

    let cache = IndexCache::<FakeHandle>::new(Duration::from_secs(600), false);
    let dispatcher = MultiSearchDispatcher::new(
        Arc::clone(&alias_store),
        Arc::clone(&ref_tracker),
        cache,
        Arc::new(FakeLoader),
        Backend::Fts,
        config.multi_search_max_workers,
        Duration::from_secs(config.multi_search_timeout_seconds),
    )
    .unwrap();
    let mut dispatchers: BTreeMap<Backend, Arc<dyn SearchDispatch>> = BTreeMap::new();
    dispatchers.insert(Backend::Fts, Arc::new(dispatcher));

    let users = Arc::new(cidx_auth::UserStore::in_memory().unwrap());
    let groups = Arc::new(cidx_auth::GroupStore::in_memory().unwrap());
    users.set_role("admin", Role::Admin).unwrap();

    let coordinator = Coordinator::new(
        Arc::clone(&registry),
        Arc::clone(&alias_store),
        Arc::clone(&ref_tracker),
        Arc::clone(&cleanup),
        Some(Arc::clone(&job_tracker)),
        Arc::clone(&refresh_scheduler),
        payload_cache,
        users,
        groups,
        pipeline,
        dispatchers,
        Arc::new(NullEventSink),
        tmp.path().to_path_buf(),
    );

    Fixture { coordinator, registry, alias_store, job_tracker, _tmp: tmp }
}

#[test]
fn add_golden_provisions_master_and_creates_alias() {
    let fx = fixture();
    let admin = User::new("admin");
    let job_id = fx
        .coordinator
        .add_golden(&admin, "svc-a", "https://example.invalid/svc-a.git", BTreeSet::from([Backend::Fts]), None)
        .unwrap();
    assert!(job_id.is_some());

    let repo = fx.registry.get("svc-a").unwrap().unwrap();
    assert!(repo.next_refresh_at.is_none(), "new repos wait for the scheduler's initial spread");
    let aliased = fx.alias_store.try_read("svc-a").unwrap();
    assert_eq!(aliased.as_deref(), Some(repo.index_path.as_str()));

    let job = fx.job_tracker.get_job(job_id.unwrap()).unwrap().unwrap();
    assert_eq!(job.status, cidx_types::job::JobStatus::Completed);
}

#[test]
fn add_golden_twice_upserts_without_resetting_schedule() {
    let fx = fixture();
    let admin = User::new("admin");
    fx.coordinator
        .add_golden(&admin, "svc-b", "https://example.invalid/svc-b.git", BTreeSet::from([Backend::Fts]), None)
        .unwrap();

    let next = time::OffsetDateTime::now_utc() + time::Duration::hours(1);
    fx.registry.set_last_and_next_refresh("svc-b", time::OffsetDateTime::now_utc(), next).unwrap();
    let created_before = fx.registry.get("svc-b").unwrap().unwrap().created_at;

    // Re-registering (§4.2) must not wipe next_refresh_at or created_at.
    fx.coordinator
        .add_golden(&admin, "svc-b", "https://example.invalid/svc-b-moved.git", BTreeSet::from([Backend::Fts]), None)
        .unwrap();

    let repo = fx.registry.get("svc-b").unwrap().unwrap();
    assert_eq!(repo.next_refresh_at, Some(next));
    assert_eq!(repo.created_at, created_before);
    assert_eq!(repo.source_url, "https://example.invalid/svc-b-moved.git");
}

#[test]
fn non_admin_cannot_add_golden() {
    let fx = fixture();
    fx.coordinator.users_ref().set_role("mallory", Role::Member).unwrap();
    let member = User::new("mallory");
    let err = fx
        .coordinator
        .add_golden(&member, "svc-c", "https://example.invalid/svc-c.git", BTreeSet::new(), None)
        .unwrap_err();
    assert!(matches!(err, cidx::Error::Forbidden(_)));
}

#[test]
fn search_returns_hits_for_visible_aliases_only() {
    let fx = fixture();
    let admin = User::new("admin");
    fx.coordinator
        .add_golden(&admin, "svc-d", "https://example.invalid/svc-d.git", BTreeSet::from([Backend::Fts]), None)
        .unwrap();

    let result = fx
        .coordinator
        .search(&admin, "fn main", None, 10, Some(BTreeSet::from([Backend::Fts])))
        .unwrap();
    assert_eq!(result.hits.len(), 1);
    assert!(result.hits[0].hit.file_path.ends_with("lib.rs"));
}

#[test]
fn refresh_golden_swaps_alias_and_schedules_cleanup_of_old_snapshot() {
    let fx = fixture();
    let admin = User::new("admin");
    fx.coordinator
        .add_golden(&admin, "svc-e", "https://example.invalid/svc-e.git", BTreeSet::from([Backend::Fts]), None)
        .unwrap();
    let master_path = fx.registry.get("svc-e").unwrap().unwrap().index_path;

    // First refresh: builds a versioned snapshot, master must never be
    // scheduled for cleanup (spec.md §8 S1).
    let job_id = fx.coordinator.refresh_golden(&admin, "svc-e").unwrap().unwrap();
    for _ in 0..200 {
        if fx.job_tracker.get_job(job_id).unwrap().unwrap().status.is_terminal() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let job = fx.job_tracker.get_job(job_id).unwrap().unwrap();
    assert_eq!(job.status, cidx_types::job::JobStatus::Completed);

    let aliased_after_first = fx.alias_store.read("svc-e").unwrap();
    assert!(cidx_types::GoldenRepo::is_versioned_path(&aliased_after_first));
    assert!(std::path::Path::new(&master_path).exists());

    // Second refresh: the first snapshot becomes the old target and
    // should be scheduled for cleanup (spec.md §8 S2).
    let job_id2 = fx.coordinator.refresh_golden(&admin, "svc-e").unwrap().unwrap();
    for _ in 0..200 {
        if fx.job_tracker.get_job(job_id2).unwrap().unwrap().status.is_terminal() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let aliased_after_second = fx.alias_store.read("svc-e").unwrap();
    assert_ne!(aliased_after_second, aliased_after_first);
    assert!(cidx_types::GoldenRepo::is_versioned_path(&aliased_after_second));
}

#[test]
fn get_payload_paginates_stored_content() {
    let fx = fixture();
    let handle = fx.coordinator.payload_cache_ref().store_with_page_size(
        b"0123456789".to_vec(),
        Duration::from_secs(60),
        4,
    );
    let first = fx.coordinator.get_payload(&handle, 0).unwrap();
    assert_eq!(first.content, b"0123".to_vec());
    let last = fx.coordinator.get_payload(&handle, first.total_pages - 1).unwrap();
    assert_eq!(last.content, b"9".to_vec());
}

#[test]
fn health_check_reports_unregistered_alias() {
    let fx = fixture();
    let health = fx.coordinator.health_check("does-not-exist").unwrap();
    assert!(!health.registered);
    assert!(health.index_path.is_none());
}
