use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupState {
    Waiting,
    Deleted,
    Skipped,
}

/// A path waiting for deletion once no query pins it (spec.md §3).
/// Invariant: `path` must contain the `.versioned/` marker before it may
/// ever be constructed — enforced by `CleanupManager::schedule`, not here,
/// so this type stays a plain data holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupEntry {
    pub path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    pub state: CleanupState,
}
