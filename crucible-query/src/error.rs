use thiserror::Error;

/// A parse failure with a precise source location (spec §4.4: "the parser
/// MUST produce precise error locations"). Never thrown — always returned.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("parse error at offset {offset}: {message}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Top-level error surfaced to callers of [`crate::search`].
///
/// Most failure modes inside a query (FTS errors, decryption failures,
/// regex timeouts) are absorbed and logged by the evaluator rather than
/// propagated here -- this enum is reserved for failures that prevent a
/// result list from being produced at all.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("full-text index unavailable: {0}")]
    FtsUnavailable(String),

    #[error("a protected session is required for this query")]
    ProtectedSessionRequired,

    #[error("search deadline exceeded after returning {partial_count} results")]
    Timeout { partial_count: usize },

    #[error("underlying storage error: {0}")]
    Storage(#[from] crucible_sqlite::FtsError),
}

pub type QueryResult<T> = Result<T, SearchError>;
