//! Data model and in-memory graph cache for the notes search engine.
//!
//! This crate owns the shape of the knowledge base (notes, branches,
//! attributes), the cache that answers structural questions about it
//! (ancestors, effective attributes, subtree), and the protected-session
//! lifecycle. It has no opinion on full-text indexing or query parsing --
//! see `crucible-sqlite` and `crucible-query` for those.

pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod model;
pub mod protected;

pub use config::EngineConfig;
pub use error::{CoreError, CoreResult};
pub use events::EntityChange;
pub use graph::{AttributeCounts, GraphCache};
pub use model::{
    Attribute, AttributeId, AttributeType, Blob, BlobId, Branch, BranchId, Note, NoteId, NoteType,
    ROOT_NOTE_ID,
};
pub use protected::{ProtectedSession, SessionKey};
