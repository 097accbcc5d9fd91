//! Server-side pagination store for oversized response bodies (spec.md
//! §4.7). An LRU-capped TTL map keyed by an opaque handle.
//!
//! The "wait on an explicit initialized event before the first sweep"
//! requirement (spec.md §4.7, bug #178) is `PayloadCache::mark_initialized`
//! plus the background sweeper's `Condvar` wait — the cross-cutting
//! initialization race the teacher's source hit is resolved here with a
//! proper signal rather than a plain boolean read outside a lock (spec.md
//! §9's `MCPSelfRegistration` open question, applied here too).

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::{Error, Result};

const DEFAULT_FETCH_SIZE: usize = 64 * 1024;
const MAX_ENTRIES: usize = 10_000;

struct Entry {
    content: Vec<u8>,
    fetch_size: usize,
    created_at: Instant,
    ttl: Duration,
}

struct Inner {
    entries: HashMap<String, Entry>,
    lru_order: Vec<String>,
}

pub struct PayloadCache {
    inner: Mutex<Inner>,
    initialized: Mutex<bool>,
    initialized_condvar: Condvar,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub content: Vec<u8>,
    pub page: usize,
    pub total_pages: usize,
    pub has_more: bool,
}

impl PayloadCache {
    pub fn new() -> Arc<Self> {
        Arc::new(PayloadCache {
            inner: Mutex::new(Inner { entries: HashMap::new(), lru_order: Vec::new() }),
            initialized: Mutex::new(false),
            initialized_condvar: Condvar::new(),
        })
    }

    /// Signals that whatever table/storage setup this cache depends on
    /// has completed; the background sweeper blocks on this before its
    /// first pass (spec.md §4.7, bug #178).
    pub fn mark_initialized(&self) {
        let mut guard = self.initialized.lock().unwrap();
        *guard = true;
        self.initialized_condvar.notify_all();
    }

    fn wait_until_initialized(&self) {
        let guard = self.initialized.lock().unwrap();
        let _unused = self.initialized_condvar.wait_while(guard, |ready| !*ready).unwrap();
    }

    pub fn store(&self, content: Vec<u8>, ttl: Duration) -> String {
        self.store_with_page_size(content, ttl, DEFAULT_FETCH_SIZE)
    }

    pub fn store_with_page_size(&self, content: Vec<u8>, ttl: Duration, fetch_size: usize) -> String {
        let handle = Uuid::now_v7().to_string();
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.len() >= MAX_ENTRIES {
            if let Some(oldest) = inner.lru_order.first().cloned() {
                inner.entries.remove(&oldest);
                inner.lru_order.retain(|h| h != &oldest);
            }
        }
        inner.entries.insert(
            handle.clone(),
            Entry { content, fetch_size: fetch_size.max(1), created_at: Instant::now(), ttl },
        );
        inner.lru_order.push(handle.clone());
        handle
    }

    /// `total_pages = ceil(len(content) / fetch_size)`; page `0` returns
    /// bytes `[0, fetch_size)` (spec.md §4.7).
    pub fn retrieve(&self, handle: &str, page: usize) -> Result<Page> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.entries.get(handle).ok_or_else(|| Error::HandleUnknown(handle.to_string()))?;
        if entry.created_at.elapsed() > entry.ttl {
            inner.entries.remove(handle);
            inner.lru_order.retain(|h| h != handle);
            return Err(Error::HandleExpired(handle.to_string()));
        }
        let fetch_size = entry.fetch_size;
        let total_pages = entry.content.len().div_ceil(fetch_size).max(1);
        let start = page * fetch_size;
        let end = (start + fetch_size).min(entry.content.len());
        let content = if start >= entry.content.len() { Vec::new() } else { entry.content[start..end].to_vec() };
        inner.lru_order.retain(|h| h != handle);
        inner.lru_order.push(handle.to_string());
        Ok(Page { content, page, total_pages, has_more: page + 1 < total_pages })
    }

    /// Deletes entries whose `now - created_at > ttl`. Returns the count
    /// deleted.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.entries.len();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.created_at.elapsed() > e.ttl)
            .map(|(h, _)| h.clone())
            .collect();
        for handle in &expired {
            inner.entries.remove(handle);
        }
        inner.lru_order.retain(|h| !expired.contains(h));
        before - inner.entries.len()
    }
}

/// Spawns the periodic sweep daemon (spec.md §4.7). Blocks on
/// `mark_initialized` before the first pass.
pub fn spawn_sweeper(cache: Arc<PayloadCache>, interval: Duration) -> JoinHandle<()> {
    std::thread::spawn(move || {
        cache.wait_until_initialized();
        loop {
            std::thread::sleep(interval);
            let deleted = cache.cleanup_expired();
            if deleted > 0 {
                tracing::debug!(deleted, "payload cache sweep removed expired handles");
            }
        }
    })
}
