//! Fans a query out across every alias in scope, bounded to `maxWorkers`
//! concurrent backends, merges and dedups the results, and reports timing
//! metadata per spec.md §4.9. The per-backend deadline is enforced with a
//! `crossbeam-channel` rendezvous rather than a cancellable future, since
//! the underlying `IndexHandle::search` call is synchronous and not
//! cooperatively cancellable — a timed-out search keeps running on its own
//! thread (outside the bounded pool) until it finishes and releases its
//! pin, it is simply no longer waited on.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cidx_types::Backend as BackendKind;
use crossbeam_channel::RecvTimeoutError;
use rayon::prelude::*;

use crate::alias_store::AliasStore;
use crate::backend::{IndexHandle, IndexLoader, SearchHit};
use crate::error::{Error, Result};
use crate::index_cache::IndexCache;
use crate::ref_tracker::QueryRefTracker;

#[derive(Debug, Clone)]
pub struct MergedHit {
    pub alias: String,
    pub hit: SearchHit,
}

#[derive(Debug, Default)]
pub struct MultiSearchResult {
    pub hits: Vec<MergedHit>,
    pub per_backend_ms: BTreeMap<String, u64>,
    pub timed_out: BTreeSet<String>,
    pub errored: BTreeMap<String, String>,
    pub merge_dedup_ms: u64,
    pub total_ms: u64,
}

pub struct MultiSearchDispatcher<L: IndexLoader> {
    alias_store: Arc<AliasStore>,
    ref_tracker: Arc<QueryRefTracker>,
    cache: Arc<IndexCache<L::Handle>>,
    loader: Arc<L>,
    backend_kind: BackendKind,
    pool: rayon::ThreadPool,
    per_backend_timeout: Duration,
}

enum AliasOutcome {
    Ok(Vec<SearchHit>),
    Err(String),
    TimedOut,
}

impl<L: IndexLoader> MultiSearchDispatcher<L> {
    pub fn new(
        alias_store: Arc<AliasStore>,
        ref_tracker: Arc<QueryRefTracker>,
        cache: Arc<IndexCache<L::Handle>>,
        loader: Arc<L>,
        backend_kind: BackendKind,
        max_workers: usize,
        per_backend_timeout: Duration,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_workers.max(1))
            .thread_name(|i| format!("cidx-multi-search-{i}"))
            .build()
            .map_err(|e| Error::InvalidParameter(e.to_string()))?;
        Ok(MultiSearchDispatcher {
            alias_store,
            ref_tracker,
            cache,
            loader,
            backend_kind,
            pool,
            per_backend_timeout,
        })
    }

    /// Runs `query` against every alias in `aliases`, bounded to
    /// `max_workers` concurrent backends (spec.md §4.9).
    pub fn dispatch(&self, aliases: &[String], query: &str, limit: usize) -> MultiSearchResult {
        let total_start = Instant::now();

        let per_alias: Vec<(String, Duration, AliasOutcome)> = self.pool.install(|| {
            aliases
                .par_iter()
                .map(|alias| self.run_one(alias, query, limit))
                .collect()
        });

        let mut result = MultiSearchResult::default();
        let mut scored: Vec<(String, SearchHit)> = Vec::new();
        for (alias, elapsed, outcome) in per_alias {
            result.per_backend_ms.insert(alias.clone(), elapsed.as_millis() as u64);
            match outcome {
                AliasOutcome::Ok(hits) => {
                    scored.extend(hits.into_iter().map(|hit| (alias.clone(), hit)));
                }
                AliasOutcome::TimedOut => {
                    result.timed_out.insert(alias);
                }
                AliasOutcome::Err(message) => {
                    result.errored.insert(alias, message);
                }
            }
        }

        let merge_start = Instant::now();
        result.hits = merge_dedup(scored, limit);
        result.merge_dedup_ms = merge_start.elapsed().as_millis() as u64;
        result.total_ms = total_start.elapsed().as_millis() as u64;
        result
    }

    /// Runs the search for one alias on its own OS thread (outside the
    /// bounded pool, which is already occupied by `dispatch`'s `par_iter`
    /// fan-out) and waits for it with `per_backend_timeout`. The pin is
    /// held for the lifetime of `search_one`, regardless of whether the
    /// caller gave up waiting (spec.md §4.3, §4.9).
    fn run_one(&self, alias: &str, query: &str, limit: usize) -> (String, Duration, AliasOutcome) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let alias_store = Arc::clone(&self.alias_store);
        let ref_tracker = Arc::clone(&self.ref_tracker);
        let cache = Arc::clone(&self.cache);
        let loader = Arc::clone(&self.loader);
        let backend_kind = self.backend_kind;
        let alias_owned = alias.to_string();
        let query_owned = query.to_string();

        std::thread::spawn(move || {
            let started = Instant::now();
            let result = search_one(
                &alias_store,
                &ref_tracker,
                &cache,
                loader.as_ref(),
                backend_kind,
                &alias_owned,
                &query_owned,
                limit,
            );
            let _ = tx.send((result, started.elapsed()));
        });

        match rx.recv_timeout(self.per_backend_timeout) {
            Ok((Ok(hits), elapsed)) => (alias.to_string(), elapsed, AliasOutcome::Ok(hits)),
            Ok((Err(err), elapsed)) => (alias.to_string(), elapsed, AliasOutcome::Err(err.to_string())),
            Err(RecvTimeoutError::Timeout) => {
                (alias.to_string(), self.per_backend_timeout, AliasOutcome::TimedOut)
            }
            Err(RecvTimeoutError::Disconnected) => (
                alias.to_string(),
                self.per_backend_timeout,
                AliasOutcome::Err("search worker thread panicked".to_string()),
            ),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn search_one<L: IndexLoader>(
    alias_store: &AliasStore,
    ref_tracker: &Arc<QueryRefTracker>,
    cache: &IndexCache<L::Handle>,
    loader: &L,
    backend_kind: BackendKind,
    alias: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let path = alias_store.read(alias)?;
    let _pin = ref_tracker.pin(path.clone());
    let handle = cache
        .get_or_load(&path, || loader.load(backend_kind, Path::new(&path)))
        .map_err(|e| Error::BackendUnavailable(alias.to_string(), e.to_string()))?;
    handle.search(query, limit).map_err(|e| Error::BackendUnavailable(alias.to_string(), e.to_string()))
}

/// Merge + dedup by `(filePath, startLine, endLine)` (spec.md §4.9): sort
/// by score descending with a stable `(alias, filePath, startLine)`
/// tiebreak first, then keep the first (highest-ranked) occurrence of each
/// key. This means a duplicate hit surfaced by two aliases is resolved in
/// favor of whichever ranked higher, not whichever alias happened to run
/// first.
fn merge_dedup(mut scored: Vec<(String, SearchHit)>, limit: usize) -> Vec<MergedHit> {
    scored.sort_by(|(alias_a, a), (alias_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| alias_a.cmp(alias_b))
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });

    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for (alias, hit) in scored {
        let key = (hit.file_path.clone(), hit.start_line, hit.end_line);
        if seen.insert(key) {
            merged.push(MergedHit { alias, hit });
            if merged.len() >= limit {
                break;
            }
        }
    }
    merged
}
