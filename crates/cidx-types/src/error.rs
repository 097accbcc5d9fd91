//! Stable error codes shared across the workspace.
//!
//! Modeled on the teacher's `meilisearch-types::error::{Code, ErrorCode}`
//! split: a `Display`-able `Error` per crate carries the human message,
//! while `Code` gives every error kind a stable machine-readable name and a
//! status family, without pulling in an HTTP framework (the transport layer
//! is out of scope for this crate — see spec.md §1).

use std::fmt;

/// Coarse classification used by callers to decide surface semantics
/// (401/403 vs 4xx vs 5xx) without this crate depending on an HTTP crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFamily {
    /// Forbidden / unauthenticated.
    Auth,
    /// Bad input from the caller (unknown alias, unknown handle, ...).
    ClientError,
    /// A collaborator (git, backend, embedding key) is unavailable.
    DependencyError,
    /// A programming invariant was violated; this should never happen in
    /// correct code and is not meant to be silently downgraded.
    ConfigurationError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Forbidden,
    Unauthenticated,
    AliasUnknown,
    AliasExists,
    HandleUnknown,
    HandleExpired,
    InvalidParameter,
    InFlight,
    BackendUnavailable,
    EmbeddingKeyMissing,
    GitCloneFailed,
    MasterPathScheduledForCleanup,
}

impl Code {
    pub const fn name(self) -> &'static str {
        match self {
            Code::Forbidden => "forbidden",
            Code::Unauthenticated => "unauthenticated",
            Code::AliasUnknown => "alias_unknown",
            Code::AliasExists => "alias_exists",
            Code::HandleUnknown => "handle_unknown",
            Code::HandleExpired => "handle_expired",
            Code::InvalidParameter => "invalid_parameter",
            Code::InFlight => "in_flight",
            Code::BackendUnavailable => "backend_unavailable",
            Code::EmbeddingKeyMissing => "embedding_key_missing",
            Code::GitCloneFailed => "git_clone_failed",
            Code::MasterPathScheduledForCleanup => "master_path_scheduled_for_cleanup",
        }
    }

    pub const fn family(self) -> StatusFamily {
        match self {
            Code::Forbidden | Code::Unauthenticated => StatusFamily::Auth,
            Code::AliasUnknown
            | Code::AliasExists
            | Code::HandleUnknown
            | Code::HandleExpired
            | Code::InvalidParameter
            | Code::InFlight => StatusFamily::ClientError,
            Code::BackendUnavailable | Code::EmbeddingKeyMissing | Code::GitCloneFailed => {
                StatusFamily::DependencyError
            }
            Code::MasterPathScheduledForCleanup => StatusFamily::ConfigurationError,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub trait ErrorCode {
    fn error_code(&self) -> Code;

    fn status_family(&self) -> StatusFamily {
        self.error_code().family()
    }
}

/// A structured log code of the form `<SUBSYSTEM>-<CATEGORY>-<NNN>`, used
/// exclusively for errors the core swallows after logging (observers:
/// job tracker, audit log, cache eviction thread). Never used for
/// user-facing errors, which propagate as `Code` instead (spec.md §7).
#[derive(Debug, Clone, Copy)]
pub struct ObserverErrorCode {
    pub subsystem: &'static str,
    pub category: &'static str,
    pub number: u16,
}

impl fmt::Display for ObserverErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{:03}", self.subsystem, self.category, self.number)
    }
}

pub const JOBTRACKER_OBSERVER_FAILURE: ObserverErrorCode =
    ObserverErrorCode { subsystem: "JOBTRACKER", category: "OBSERVER", number: 1 };
pub const CACHE_EVICTION_FAILURE: ObserverErrorCode =
    ObserverErrorCode { subsystem: "INDEXCACHE", category: "EVICTION", number: 1 };
pub const PAYLOADCACHE_SWEEP_FAILURE: ObserverErrorCode =
    ObserverErrorCode { subsystem: "PAYLOADCACHE", category: "SWEEP", number: 1 };
