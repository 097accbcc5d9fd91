//! The pluggable backend capability set (spec.md §1, §9): the actual
//! vector/FTS/SCIP/temporal engines are out of scope for this crate and are
//! expressed purely as this trait, matching "define a capability set
//! `{Search, Reload, Health}` and express the concrete engines as variants
//! behind that set, not through inheritance" (spec.md §9).

use std::path::Path;

use cidx_types::Backend as BackendKind;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub score: f32,
    pub snippet: String,
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub detail: String,
}

/// A loaded handle to one index of one kind, for one repo. Implementations
/// are provided by the embedding/FTS/SCIP clients this crate does not own.
pub trait IndexHandle: Send + Sync + 'static {
    /// Re-reads the index from disk in place. Called while the owning
    /// `IndexCache`'s lock is held, so it must be atomic with respect to
    /// other cache users touching the same key (spec.md §4.6, §9).
    fn reload(&self) -> Result<(), BackendError>;

    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, BackendError>;

    fn health(&self) -> HealthStatus;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("embedding key missing for this backend")]
    EmbeddingKeyMissing,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("query timed out")]
    TimedOut,
}

/// Loads (or opens) an `IndexHandle` for a given index directory and
/// backend kind. Supplied by the caller so `IndexCache` never needs to
/// know how any particular engine opens its files.
pub trait IndexLoader: Send + Sync + 'static {
    type Handle: IndexHandle;

    fn load(&self, kind: BackendKind, index_path: &Path) -> Result<Self::Handle, BackendError>;
}
