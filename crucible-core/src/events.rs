use crate::model::{Attribute, AttributeId, Branch, BranchId, Note, NoteId};

/// A single entity-change event as delivered by the host application's
/// change stream (spec §3 "Lifecycles"). The cache applies these in the
/// order they are received; `apply_entity_change` is idempotent for any
/// individual event replayed twice.
#[derive(Debug, Clone)]
pub enum EntityChange {
    NoteUpserted(Note),
    NoteDeleted(NoteId),
    BranchUpserted(Branch),
    BranchDeleted(BranchId),
    AttributeUpserted(Attribute),
    AttributeDeleted(AttributeId),
    /// The children of `parent_note_id` were reordered; `child_note_id` now
    /// sits at `new_position` within its branch.
    ChildrenReordered {
        parent_note_id: NoteId,
        child_note_id: NoteId,
        new_position: i32,
    },
}

impl EntityChange {
    /// The note whose memoized caches (effective attributes, ancestors,
    /// flat text) must be invalidated as a direct result of this change.
    /// Subtree invalidation (for inheritable/template attribute changes) is
    /// computed separately by the graph cache, which alone knows the
    /// parent/child edges.
    pub fn directly_affected_note(&self) -> Option<&NoteId> {
        match self {
            EntityChange::NoteUpserted(n) => Some(&n.note_id),
            EntityChange::NoteDeleted(id) => Some(id),
            EntityChange::BranchUpserted(b) => Some(&b.child_note_id),
            EntityChange::BranchDeleted(_) => None,
            EntityChange::AttributeUpserted(a) => Some(&a.note_id),
            EntityChange::AttributeDeleted(_) => None,
            EntityChange::ChildrenReordered {
                child_note_id, ..
            } => Some(child_note_id),
        }
    }
}
