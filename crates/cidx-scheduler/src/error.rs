use cidx_types::error::{Code, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("alias `{0}` is unknown")]
    AliasUnknown(String),
    #[error("alias `{0}` already exists")]
    AliasExists(String),
    #[error("payload handle `{0}` is unknown")]
    HandleUnknown(String),
    #[error("payload handle `{0}` has expired")]
    HandleExpired(String),
    #[error("refresh already in flight for alias `{0}`")]
    InFlight(String),
    #[error("backend unavailable for alias `{0}`: {1}")]
    BackendUnavailable(String, String),
    #[error("clone/pull failed for alias `{0}`: {1}")]
    GitCloneFailed(String, String),
    #[error(
        "refusing to schedule non-versioned path `{0}` for cleanup; master paths must never be deleted"
    )]
    MasterPathScheduledForCleanup(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl ErrorCode for Error {
    fn error_code(&self) -> Code {
        match self {
            Error::Sqlite(_) | Error::Io(_) => Code::BackendUnavailable,
            Error::AliasUnknown(_) => Code::AliasUnknown,
            Error::AliasExists(_) => Code::AliasExists,
            Error::HandleUnknown(_) => Code::HandleUnknown,
            Error::HandleExpired(_) => Code::HandleExpired,
            Error::InFlight(_) => Code::InFlight,
            Error::BackendUnavailable(..) => Code::BackendUnavailable,
            Error::GitCloneFailed(..) => Code::GitCloneFailed,
            Error::MasterPathScheduledForCleanup(_) => Code::MasterPathScheduledForCleanup,
            Error::InvalidParameter(_) => Code::InvalidParameter,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
