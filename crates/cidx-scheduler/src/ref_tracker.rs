//! Pure in-memory ref-counting of in-flight queries against index paths
//! (spec.md §4.3). A single mutex plus condvar, matching the spec's own
//! description; no entry is ever left at 0 (testable property #2).
//!
//! The scoped-acquisition pattern named in spec.md §9 ("use a
//! language-native scoped-acquisition pattern so every path from `Pin` to
//! response termination guarantees `Release`") is `PinGuard`: its `Drop`
//! impl calls `release`, so callers never sprinkle their own
//! `try`/`finally`.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Inner {
    counts: HashMap<String, u64>,
}

pub struct QueryRefTracker {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl Default for QueryRefTracker {
    fn default() -> Self {
        QueryRefTracker { inner: Mutex::new(Inner::default()), condvar: Condvar::new() }
    }
}

impl QueryRefTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Increments the ref count and returns a guard whose `Drop`
    /// decrements it exactly once, even if `Pin` is called again for the
    /// same path from another task — counts are per-call, not per-path
    /// singleton.
    pub fn pin(self: &Arc<Self>, path: impl Into<String>) -> PinGuard {
        let path = path.into();
        {
            let mut inner = self.inner.lock().unwrap();
            *inner.counts.entry(path.clone()).or_insert(0) += 1;
        }
        PinGuard { tracker: Arc::clone(self), path, released: false }
    }

    pub fn ref_count(&self, path: &str) -> u64 {
        let inner = self.inner.lock().unwrap();
        *inner.counts.get(path).unwrap_or(&0)
    }

    fn release(&self, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(count) = inner.counts.get_mut(path) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.counts.remove(path);
                self.condvar.notify_all();
            }
        }
    }

    /// Blocks until `ref_count(path) == 0` or `timeout` elapses. Returns
    /// `true` if the ref count reached zero, `false` on timeout
    /// (spec.md §4.3).
    pub fn drain(&self, path: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        while inner.counts.contains_key(path) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return !inner.counts.contains_key(path);
            }
            let (next_inner, result) = self.condvar.wait_timeout(inner, remaining).unwrap();
            inner = next_inner;
            if result.timed_out() {
                break;
            }
        }
        !inner.counts.contains_key(path)
    }
}

/// RAII handle returned by `pin`. Idempotent: calling `release` more than
/// once (explicitly, then again via `Drop`) only decrements the underlying
/// count once.
pub struct PinGuard {
    tracker: Arc<QueryRefTracker>,
    path: String,
    released: bool,
}

impl PinGuard {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.tracker.release(&self.path);
            self.released = true;
        }
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn pin_then_release_returns_to_zero() {
        let tracker = QueryRefTracker::new();
        let guard = tracker.pin("/gr/A");
        assert_eq!(tracker.ref_count("/gr/A"), 1);
        drop(guard);
        assert_eq!(tracker.ref_count("/gr/A"), 0);
    }

    #[test]
    fn explicit_release_is_idempotent_with_drop() {
        let tracker = QueryRefTracker::new();
        let guard = tracker.pin("/gr/A");
        guard.release();
        assert_eq!(tracker.ref_count("/gr/A"), 0);
    }

    #[test]
    fn ten_concurrent_pins_all_release_to_zero() {
        let tracker = QueryRefTracker::new();
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    let guard = tracker.pin("/gr/A");
                    thread::sleep(std::time::Duration::from_millis(5));
                    drop(guard);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.ref_count("/gr/A"), 0);
    }

    #[test]
    fn drain_blocks_until_release() {
        let tracker = QueryRefTracker::new();
        let guard = tracker.pin("/gr/A");
        let tracker2 = Arc::clone(&tracker);
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(guard);
        });
        let drained = tracker.drain("/gr/A", Duration::from_secs(1));
        assert!(drained);
        releaser.join().unwrap();
        let _ = tracker2.ref_count("/gr/A");
    }

    #[test]
    fn drain_times_out_while_pinned() {
        let tracker = QueryRefTracker::new();
        let _guard = tracker.pin("/gr/A");
        let drained = tracker.drain("/gr/A", Duration::from_millis(20));
        assert!(!drained);
    }
}
