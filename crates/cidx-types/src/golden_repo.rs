use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One of the pluggable query backends a golden repo can expose.
/// Modeled as a closed set rather than an open string, matching §3's
/// `enabledBackends` set `{vector, temporal, scip, fts}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Vector,
    Temporal,
    Scip,
    Fts,
}

impl Backend {
    pub const ALL: [Backend; 4] = [Backend::Vector, Backend::Temporal, Backend::Scip, Backend::Fts];

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Vector => "vector",
            Backend::Temporal => "temporal",
            Backend::Scip => "scip",
            Backend::Fts => "fts",
        }
    }

    pub fn parse(s: &str) -> Option<Backend> {
        match s {
            "vector" => Some(Backend::Vector),
            "temporal" => Some(Backend::Temporal),
            "scip" => Some(Backend::Scip),
            "fts" => Some(Backend::Fts),
            _ => None,
        }
    }
}

/// Per-repo opaque configuration: branch set and language hints. Kept as a
/// typed struct (not a raw `serde_json::Value`) for the fields the core
/// itself inspects, with an escape hatch for everything else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoConfig {
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub language_hints: Vec<String>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A registered golden repository: the authoritative record the
/// `Registry` persists and the `RefreshScheduler`/`AliasStore` act on.
///
/// Invariants (spec.md §3): `alias` uniquely maps to at most one
/// `index_path` at any instant; `AliasStore` and this record's
/// `index_path` must agree after any successful refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenRepo {
    pub alias: String,
    pub source_url: String,
    pub index_path: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refresh_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_refresh_at: Option<OffsetDateTime>,
    pub enabled_backends: BTreeSet<Backend>,
    pub config: RepoConfig,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl GoldenRepo {
    /// A `local://...` pseudo-URL never participates in the time-based
    /// refresh scheduler (spec.md §4.8 step 1 and 2).
    pub fn is_local(&self) -> bool {
        self.source_url.starts_with("local://")
    }

    /// `.versioned/` is the marker that distinguishes a deletable snapshot
    /// directory from a master working copy (spec.md §3, §4.4, §4.8).
    pub fn is_versioned_path(path: &str) -> bool {
        path.contains(".versioned/")
    }
}
