//! The git-clone/index-build collaborator `RefreshScheduler` drives. Like
//! `backend::IndexLoader`, this is deliberately a trait: the actual git
//! plumbing and index builder are named-only external collaborators per
//! spec.md §1.

use std::path::Path;

use crate::error::Error;

pub struct RefreshOutcome {
    /// Whether the master working copy changed since the last refresh. A
    /// `false` with a fresh cache lets `_executeRefresh` return early
    /// without building a new snapshot (spec.md §4.8 step 2).
    pub changed: bool,
}

pub trait RefreshPipeline: Send + Sync + 'static {
    /// Clones (if `master_path` doesn't exist) or pulls (if it does) the
    /// repo at `source_url` into `master_path`.
    fn clone_or_pull(&self, source_url: &str, master_path: &Path) -> Result<RefreshOutcome, Error>;

    /// Builds a new index snapshot at `snapshot_path` from the working
    /// copy at `master_path`, for the given set of enabled backends.
    fn build_index(
        &self,
        master_path: &Path,
        snapshot_path: &Path,
        backends: &std::collections::BTreeSet<cidx_types::Backend>,
    ) -> Result<(), Error>;
}
