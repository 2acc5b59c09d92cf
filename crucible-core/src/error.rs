use thiserror::Error;

/// Errors produced by the graph cache and the data model it owns.
///
/// Dangling relation targets (spec invariant I3) are deliberately **not**
/// represented here: a relation whose target is absent from the cache is a
/// normal, silently-non-matching condition, not a failure.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("note {0} not found in graph cache")]
    NoteNotFound(String),

    #[error("attribute {0} not found in graph cache")]
    AttributeNotFound(String),

    #[error("branch {0} not found in graph cache")]
    BranchNotFound(String),

    #[error("note {0} is protected and no protected session is active")]
    ProtectedSessionRequired(String),

    #[error("failed to decrypt note {note_id}: {reason}")]
    DecryptionFailed { note_id: String, reason: String },

    #[error("the root note may not be deleted or protected")]
    RootInvariantViolated,
}

pub type CoreResult<T> = Result<T, CoreError>;
