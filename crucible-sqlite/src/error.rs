use thiserror::Error;

/// Errors from the FTS index manager (C2) and query layer (C3).
///
/// [`FtsError::Unavailable`] is non-recoverable for the lifetime of the
/// connection (the index is missing or corrupt); [`FtsError::QueryError`]
/// carries a `recoverable` flag so callers know whether to fall back to a
/// non-indexed scan (spec §4.3 "Errors are typed").
#[derive(Debug, Error)]
pub enum FtsError {
    #[error("full-text index is unavailable: {0}")]
    Unavailable(String),

    #[error("full-text query failed: {message}")]
    QueryError { message: String, recoverable: bool },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl FtsError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FtsError::QueryError { recoverable: true, .. })
    }
}

pub type FtsResult<T> = Result<T, FtsError>;
