use cidx_types::error::{Code, ErrorCode};
use thiserror::Error;

/// The `Coordinator`'s own error type: wraps every collaborator crate's
/// error plus the permission/authentication kinds that only make sense at
/// this orchestration layer (spec.md §7).
#[derive(Debug, Error)]
pub enum Error {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unauthenticated")]
    Unauthenticated,
    #[error(transparent)]
    Scheduler(#[from] cidx_scheduler::Error),
    #[error(transparent)]
    Auth(#[from] cidx_auth::Error),
}

impl ErrorCode for Error {
    fn error_code(&self) -> Code {
        match self {
            Error::Forbidden(_) => Code::Forbidden,
            Error::Unauthenticated => Code::Unauthenticated,
            Error::Scheduler(err) => err.error_code(),
            Error::Auth(err) => err.error_code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
