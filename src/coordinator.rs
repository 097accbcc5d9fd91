//! Thin orchestration layer binding access control, the alias/registry/
//! cache machinery, and the pluggable search/refresh collaborators into
//! the operation set spec.md §6 exposes to any transport (spec.md §4.11).
//! This crate does not itself expose HTTP or an RPC surface — wiring a
//! transport on top of `Coordinator` is left to the embedder, consistent
//! with spec.md §1 scoping the transport out.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cidx_auth::{AccessResolver, GroupStore, UserStore};
use cidx_scheduler::backend::IndexLoader;
use cidx_scheduler::multi_search::MultiSearchResult;
use cidx_scheduler::refresh_pipeline::RefreshPipeline;
use cidx_scheduler::{
    AliasStore, CleanupManager, JobTracker, MultiSearchDispatcher, PayloadCache, QueryRefTracker,
    Registry, RefreshScheduler,
};
use cidx_types::golden_repo::{Backend, RepoConfig};
use cidx_types::job::{JobStatus, OperationType, TrackedJob};
use cidx_types::{GoldenRepo, Role, User};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event_sink::EventSink;

/// Object-safe wrapper around `MultiSearchDispatcher<L>` so `Coordinator`
/// can hold one per backend kind without naming `L` at the struct level —
/// the backend implementations (HNSW, FTS, SCIP, temporal) are each a
/// different `IndexLoader`, but `Coordinator` only ever needs to call
/// `dispatch`.
pub trait SearchDispatch: Send + Sync {
    fn dispatch(&self, aliases: &[String], query: &str, limit: usize) -> MultiSearchResult;
}

impl<L: IndexLoader> SearchDispatch for MultiSearchDispatcher<L> {
    fn dispatch(&self, aliases: &[String], query: &str, limit: usize) -> MultiSearchResult {
        MultiSearchDispatcher::dispatch(self, aliases, query, limit)
    }
}

#[derive(Debug, Clone)]
pub struct GoldenStatus {
    pub alias: String,
    pub source_url: String,
    pub last_refresh_at: Option<time::OffsetDateTime>,
    pub next_refresh_at: Option<time::OffsetDateTime>,
}

pub struct Coordinator {
    registry: Arc<Registry>,
    alias_store: Arc<AliasStore>,
    ref_tracker: Arc<QueryRefTracker>,
    cleanup: Arc<CleanupManager>,
    job_tracker: Option<Arc<JobTracker>>,
    refresh_scheduler: Arc<RefreshScheduler>,
    payload_cache: Arc<PayloadCache>,
    users: Arc<UserStore>,
    groups: Arc<GroupStore>,
    pipeline: Arc<dyn RefreshPipeline>,
    dispatchers: BTreeMap<Backend, Arc<dyn SearchDispatch>>,
    event_sink: Arc<dyn EventSink>,
    golden_repos_root: PathBuf,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<Registry>,
        alias_store: Arc<AliasStore>,
        ref_tracker: Arc<QueryRefTracker>,
        cleanup: Arc<CleanupManager>,
        job_tracker: Option<Arc<JobTracker>>,
        refresh_scheduler: Arc<RefreshScheduler>,
        payload_cache: Arc<PayloadCache>,
        users: Arc<UserStore>,
        groups: Arc<GroupStore>,
        pipeline: Arc<dyn RefreshPipeline>,
        dispatchers: BTreeMap<Backend, Arc<dyn SearchDispatch>>,
        event_sink: Arc<dyn EventSink>,
        golden_repos_root: PathBuf,
    ) -> Self {
        Coordinator {
            registry,
            alias_store,
            ref_tracker,
            cleanup,
            job_tracker,
            refresh_scheduler,
            payload_cache,
            users,
            groups,
            pipeline,
            dispatchers,
            event_sink,
            golden_repos_root,
        }
    }

    /// Exposes the user store directly for embedders that need to seed or
    /// inspect roles outside the operation set in spec.md §6 (e.g. an
    /// admin provisioning flow or a test fixture).
    pub fn users_ref(&self) -> &UserStore {
        &self.users
    }

    /// Exposes the payload cache directly for embedders that produce
    /// oversized response bodies outside of `Search` (e.g. a raw file-
    /// content endpoint) and need to `store` into the same pagination
    /// cache `GetPayload` reads from.
    pub fn payload_cache_ref(&self) -> &PayloadCache {
        &self.payload_cache
    }

    fn require_admin(&self, user: &User) -> Result<()> {
        match self.users.role_of(&user.username)? {
            Role::Admin => Ok(()),
            Role::Member => Err(Error::Forbidden(format!("{} is not an admin", user.username))),
        }
    }

    /// `Search` (spec.md §6, §4.11): resolves the caller's visible aliases,
    /// fans the query out across every requested backend's dispatcher, and
    /// merges the per-backend results together. Every dispatcher's `Pin`s
    /// are scoped inside `MultiSearchDispatcher::dispatch` itself, so no
    /// separate release step is needed here (spec.md §4.11's "deferred
    /// release pattern" is satisfied one layer down).
    pub fn search(
        &self,
        user: &User,
        query: &str,
        requested_aliases: Option<BTreeSet<String>>,
        limit: usize,
        requested_backends: Option<BTreeSet<Backend>>,
    ) -> Result<MultiSearchResult> {
        let all_aliases: BTreeSet<String> =
            self.registry.list()?.into_iter().map(|r| r.alias).collect();
        let resolver = AccessResolver::new(&self.users, &self.groups);
        let allowed = resolver.resolve(user, requested_aliases.as_ref(), &all_aliases)?;
        if allowed.is_empty() {
            return Err(Error::Forbidden(
                "no accessible golden repositories match this request".to_string(),
            ));
        }
        let allowed: Vec<String> = allowed.into_iter().collect();

        let backends = requested_backends.unwrap_or_else(|| self.dispatchers.keys().copied().collect());
        let mut merged = MultiSearchResult::default();
        for backend in backends {
            let Some(dispatcher) = self.dispatchers.get(&backend) else {
                continue;
            };
            let partial = dispatcher.dispatch(&allowed, query, limit);
            merged.hits.extend(partial.hits);
            merged.per_backend_ms.extend(partial.per_backend_ms);
            merged.timed_out.extend(partial.timed_out);
            merged.errored.extend(partial.errored);
            merged.merge_dedup_ms += partial.merge_dedup_ms;
            merged.total_ms = merged.total_ms.max(partial.total_ms);
        }
        merged.hits.sort_by(|a, b| {
            b.hit
                .score
                .partial_cmp(&a.hit.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.hits.truncate(limit);
        self.event_sink.record("search", serde_json::json!({ "username": user.username, "query": query }));
        Ok(merged)
    }

    /// `AddGolden` (spec.md §4.11): idempotent. A pre-existing alias is
    /// upserted via `Registry::register`'s `ON CONFLICT` path, which never
    /// resets `created_at` or `next_refresh_at` (spec.md §4.2). A brand new
    /// alias is cloned and its initial index built at the master path
    /// before the alias and registry row are created, with
    /// `next_refresh_at` left `NULL` so the scheduler spreads it on the
    /// next tick.
    pub fn add_golden(
        &self,
        user: &User,
        alias: &str,
        source_url: &str,
        enabled_backends: BTreeSet<Backend>,
        config: Option<RepoConfig>,
    ) -> Result<Option<Uuid>> {
        self.require_admin(user)?;
        let job = self.register_job(OperationType::AddGolden, Some(user.username.clone()), Some(alias.to_string()));

        let master_path = self.golden_repos_root.join(alias);
        let already_registered = self.registry.get(alias)?.is_some();
        if !already_registered {
            if let Err(err) = self.provision_new_golden(alias, source_url, &master_path, &enabled_backends) {
                self.fail_job(&job, err.to_string());
                return Err(err.into());
            }
        }

        if let Err(err) = self.registry.register(
            alias,
            source_url,
            &master_path.to_string_lossy(),
            &enabled_backends,
            &config.unwrap_or_default(),
        ) {
            self.fail_job(&job, err.to_string());
            return Err(err.into());
        }

        self.complete_job(&job);
        Ok(job.map(|j| j.job_id))
    }

    fn provision_new_golden(
        &self,
        alias: &str,
        source_url: &str,
        master_path: &std::path::Path,
        enabled_backends: &BTreeSet<Backend>,
    ) -> cidx_scheduler::Result<()> {
        self.pipeline
            .clone_or_pull(source_url, master_path)
            .map_err(|e| cidx_scheduler::Error::GitCloneFailed(alias.to_string(), e.to_string()))?;
        self.pipeline
            .build_index(master_path, master_path, enabled_backends)
            .map_err(|e| cidx_scheduler::Error::BackendUnavailable(alias.to_string(), e.to_string()))?;
        match self.alias_store.create(alias, &master_path.to_string_lossy()) {
            Ok(()) | Err(cidx_scheduler::Error::AliasExists(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// `RefreshGolden` (spec.md §6): on-demand refresh of a single alias.
    pub fn refresh_golden(&self, user: &User, alias: &str) -> Result<Option<Uuid>> {
        self.require_admin(user)?;
        Ok(self.refresh_scheduler.refresh_now(alias)?)
    }

    /// `ListGoldens` (spec.md §6): every alias the caller can see, with its
    /// refresh schedule.
    pub fn list_goldens(&self, user: &User) -> Result<Vec<GoldenStatus>> {
        let all: Vec<GoldenRepo> = self.registry.list()?;
        let all_aliases: BTreeSet<String> = all.iter().map(|r| r.alias.clone()).collect();
        let resolver = AccessResolver::new(&self.users, &self.groups);
        let allowed = resolver.resolve(user, None, &all_aliases)?;
        Ok(all
            .into_iter()
            .filter(|r| allowed.contains(&r.alias))
            .map(|r| GoldenStatus {
                alias: r.alias,
                source_url: r.source_url,
                last_refresh_at: r.last_refresh_at,
                next_refresh_at: r.next_refresh_at,
            })
            .collect())
    }

    /// `GetJob` (spec.md §6).
    pub fn get_job(&self, job_id: Uuid) -> Result<Option<TrackedJob>> {
        match self.job_tracker.as_ref() {
            Some(tracker) => Ok(tracker.get_job(job_id)?),
            None => Ok(None),
        }
    }

    /// `ListJobs` (spec.md §6).
    pub fn list_jobs(
        &self,
        operation_type: Option<OperationType>,
        status: Option<JobStatus>,
        username: Option<&str>,
    ) -> Result<Vec<TrackedJob>> {
        match self.job_tracker.as_ref() {
            Some(tracker) => Ok(tracker.query_jobs(operation_type, status, username, None)?),
            None => Ok(Vec::new()),
        }
    }

    /// `GetPayload` (spec.md §6).
    pub fn get_payload(&self, handle: &str, page: usize) -> Result<cidx_scheduler::Page> {
        Ok(self.payload_cache.retrieve(handle, page)?)
    }

    /// `HealthCheck` (spec.md §6): reports on the alias's current index
    /// path without pinning it for a search — a health probe should not
    /// hold a reference the way a real query does.
    pub fn health_check(&self, alias: &str) -> Result<GoldenHealth> {
        let repo = self.registry.get(alias)?;
        let aliased_path = self.alias_store.try_read(alias)?;
        Ok(GoldenHealth {
            alias: alias.to_string(),
            registered: repo.is_some(),
            index_path: aliased_path,
            pending_cleanup: self.cleanup.pending().len(),
            queried_at: cidx_build_info::queried_at(),
        })
    }

    fn register_job(
        &self,
        operation_type: OperationType,
        username: Option<String>,
        repo_alias: Option<String>,
    ) -> Option<TrackedJob> {
        let tracker = self.job_tracker.as_ref()?;
        match tracker.register(operation_type, username, repo_alias, None) {
            Ok(job) => {
                if let Err(err) =
                    tracker.update_status(job.job_id, Some(JobStatus::Running), None, None, None)
                {
                    cidx_scheduler::job_tracker::log_tracker_failure("coordinator.register_job", &err);
                }
                Some(job)
            }
            Err(err) => {
                cidx_scheduler::job_tracker::log_tracker_failure("coordinator.register_job", &err);
                None
            }
        }
    }

    fn complete_job(&self, job: &Option<TrackedJob>) {
        let (Some(tracker), Some(job)) = (self.job_tracker.as_ref(), job) else { return };
        if let Err(err) =
            tracker.update_status(job.job_id, Some(JobStatus::Completed), Some(100), None, None)
        {
            cidx_scheduler::job_tracker::log_tracker_failure("coordinator.complete_job", &err);
        }
    }

    fn fail_job(&self, job: &Option<TrackedJob>, message: String) {
        let (Some(tracker), Some(job)) = (self.job_tracker.as_ref(), job) else { return };
        if let Err(err) =
            tracker.update_status(job.job_id, Some(JobStatus::Failed), None, None, Some(message))
        {
            cidx_scheduler::job_tracker::log_tracker_failure("coordinator.fail_job", &err);
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoldenHealth {
    pub alias: String,
    pub registered: bool,
    pub index_path: Option<String>,
    pub pending_cleanup: usize,
    pub queried_at: time::OffsetDateTime,
}

/// Default wait used by graceful-shutdown callers draining in-flight
/// queries before tearing down caches; not itself part of any spec.md
/// operation, but a natural companion to `QueryRefTracker::drain`.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
