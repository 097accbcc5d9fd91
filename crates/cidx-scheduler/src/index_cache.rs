//! Keyed cache of loaded index handles with TTL eviction and
//! reload-on-access (spec.md §4.6). One `IndexCache<H>` instantiation
//! backs the HNSW variant, another backs FTS — sharing this one generic
//! implementation rather than duplicating it, since the spec itself says
//! "HNSW and FTS variants share a design".
//!
//! Lock discipline (spec.md §5): the cache's single `Mutex` is held across
//! `IndexHandle::reload` so a reload is atomic with respect to other
//! readers of the same key (this workspace's resolution of the open
//! question in spec.md §9 about Tantivy-style reload-under-lock). It must
//! never be held across another key's I/O, which holds here because the
//! whole cache is guarded by one lock scoped to a single `get_or_load`
//! call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::backend::{BackendError, IndexHandle};

struct Entry<H> {
    handle: Arc<H>,
    last_access: Instant,
}

struct Inner<H> {
    entries: HashMap<String, Entry<H>>,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub reloads: u64,
    pub size: usize,
    pub last_access: Vec<(String, Instant)>,
}

pub struct IndexCache<H: IndexHandle> {
    inner: Mutex<Inner<H>>,
    ttl: Duration,
    reload_on_access: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    reloads: AtomicU64,
    stop_refresher: AtomicBool,
}

impl<H: IndexHandle> IndexCache<H> {
    pub fn new(ttl: Duration, reload_on_access: bool) -> Arc<Self> {
        Arc::new(IndexCache {
            inner: Mutex::new(Inner { entries: HashMap::new() }),
            ttl,
            reload_on_access,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            stop_refresher: AtomicBool::new(false),
        })
    }

    /// Matches spec.md §4.6 step by step: on a live hit, bump
    /// `last_access`, optionally reload while still holding the lock, and
    /// return; on a miss, call `loader` and insert. Concurrent calls for
    /// the same key that miss at the same time both invoke `loader`
    /// holding the same lock serializes them, so there is no thundering
    /// herd beyond whichever call's insert wins — acceptable because
    /// `loader` is expected to be idempotent (re-opening the same on-disk
    /// index).
    pub fn get_or_load(
        &self,
        key: &str,
        loader: impl FnOnce() -> Result<H, BackendError>,
    ) -> Result<Arc<H>, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(key) {
            if entry.last_access.elapsed() <= self.ttl {
                entry.last_access = Instant::now();
                if self.reload_on_access {
                    entry.handle.reload()?;
                    self.reloads.fetch_add(1, Ordering::Relaxed);
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(&entry.handle));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(loader()?);
        inner.entries.insert(
            key.to_string(),
            Entry { handle: Arc::clone(&handle), last_access: Instant::now() },
        );
        Ok(handle)
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.lock().unwrap().entries.remove(key);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }

    /// Evicts entries whose `last_access` is older than `ttl`. Intended to
    /// be called periodically from a background thread (every `ttl / 2`
    /// for the FTS variant, per spec.md §4.6).
    pub fn evict_expired(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let ttl = self.ttl;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.last_access.elapsed() <= ttl);
        before - inner.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            size: inner.entries.len(),
            last_access: inner.entries.iter().map(|(k, e)| (k.clone(), e.last_access)).collect(),
        }
    }

    pub fn stop_background_refresher(&self) {
        self.stop_refresher.store(true, Ordering::Release);
    }
}

/// Spawns the background refresher thread named in spec.md §4.6: wakes
/// every `ttl / 2` and calls `evict_expired`. Returns the join handle so a
/// caller (typically the `Coordinator`) can wait for clean shutdown.
pub fn spawn_background_refresher<H: IndexHandle>(cache: Arc<IndexCache<H>>) -> JoinHandle<()> {
    let period = (cache.ttl / 2).max(Duration::from_millis(50));
    std::thread::spawn(move || {
        while !cache.stop_refresher.load(Ordering::Acquire) {
            std::thread::sleep(period);
            if cache.stop_refresher.load(Ordering::Acquire) {
                break;
            }
            let evicted = cache.evict_expired();
            if evicted > 0 {
                tracing::debug!(evicted, "index cache background refresher evicted stale entries");
            }
        }
    })
}
