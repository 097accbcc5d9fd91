use cidx_types::error::{Code, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sqlite error in groups.db: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl ErrorCode for Error {
    fn error_code(&self) -> Code {
        match self {
            Error::Sqlite(_) => Code::BackendUnavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
