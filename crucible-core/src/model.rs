use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

opaque_id!(NoteId);
opaque_id!(BranchId);
opaque_id!(AttributeId);
opaque_id!(BlobId);

pub const ROOT_NOTE_ID: &str = "root";

/// Every note type the engine is aware of. Unknown types are rejected at
/// ingestion rather than represented here, matching the closed-world
/// assumption the original schema makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoteType {
    Text,
    Code,
    Mermaid,
    Canvas,
    MindMap,
    Book,
    Render,
    RelationMap,
    Search,
    Doc,
    File,
    Image,
}

impl NoteType {
    /// Types eligible for the FTS index per the C2 eligibility rule.
    pub fn is_fts_eligible(self) -> bool {
        matches!(
            self,
            NoteType::Text
                | NoteType::Code
                | NoteType::Mermaid
                | NoteType::Canvas
                | NoteType::MindMap
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NoteType::Text => "text",
            NoteType::Code => "code",
            NoteType::Mermaid => "mermaid",
            NoteType::Canvas => "canvas",
            NoteType::MindMap => "mindMap",
            NoteType::Book => "book",
            NoteType::Render => "render",
            NoteType::RelationMap => "relationMap",
            NoteType::Search => "search",
            NoteType::Doc => "doc",
            NoteType::File => "file",
            NoteType::Image => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub note_id: NoteId,
    pub title: String,
    pub note_type: NoteType,
    pub mime: String,
    pub is_protected: bool,
    pub is_deleted: bool,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub utc_date_created: DateTime<Utc>,
    pub utc_date_modified: DateTime<Utc>,
    pub blob_id: BlobId,
}

impl Note {
    pub fn is_root(&self) -> bool {
        self.note_id.as_str() == ROOT_NOTE_ID
    }
}

/// Content blob. Two notes may share one via `blob_id` (content-addressed
/// dedup) -- the cache never assumes a 1:1 note/blob mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub blob_id: BlobId,
    /// Plaintext for unprotected notes; an opaque encrypted envelope
    /// (see [`crate::protected`]) for protected ones.
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: BranchId,
    pub child_note_id: NoteId,
    pub parent_note_id: NoteId,
    pub note_position: i32,
    pub prefix: Option<String>,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    Label,
    Relation,
}

impl AttributeType {
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeType::Label => "label",
            AttributeType::Relation => "relation",
        }
    }
}

/// Relation names that are created automatically by the editor when the user
/// inserts a link, rather than deliberately by the user. Excluded from
/// "relation count" but included in the "...IncludingLinks" variants
/// (spec §4.1).
pub const AUTO_LINK_RELATION_NAMES: &[&str] = &[
    "internalLink",
    "imageLink",
    "relationMapLink",
    "includeNoteLink",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub attribute_id: AttributeId,
    pub note_id: NoteId,
    pub attribute_type: AttributeType,
    pub name: String,
    /// For a relation, this is the target note's id.
    pub value: String,
    pub position: i32,
    pub is_inheritable: bool,
    pub is_deleted: bool,
}

impl Attribute {
    pub fn is_auto_link(&self) -> bool {
        self.attribute_type == AttributeType::Relation
            && AUTO_LINK_RELATION_NAMES.contains(&self.name.as_str())
    }

    pub fn relation_target(&self) -> Option<NoteId> {
        if self.attribute_type == AttributeType::Relation {
            Some(NoteId(self.value.clone()))
        } else {
            None
        }
    }

    pub fn is_template(&self) -> bool {
        self.attribute_type == AttributeType::Relation && self.name == "template"
    }

    pub fn is_archived_label(&self) -> bool {
        self.attribute_type == AttributeType::Label && self.name == "archived"
    }
}
