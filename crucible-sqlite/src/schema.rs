//! Source tables plus the two FTS5 trigram virtual tables and the triggers
//! that keep them in sync (spec §3 "Lifecycles", §6 "Index persistence").

use rusqlite::Connection;

use crate::error::FtsResult;

const ELIGIBLE_TYPES: &str = "'text', 'code', 'mermaid', 'canvas', 'mindMap'";

pub fn apply_migrations(conn: &Connection) -> FtsResult<()> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS blobs (
            blob_id TEXT PRIMARY KEY,
            content BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notes (
            note_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            type TEXT NOT NULL,
            mime TEXT NOT NULL,
            is_protected INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            blob_id TEXT NOT NULL REFERENCES blobs(blob_id),
            date_created TEXT NOT NULL,
            date_modified TEXT NOT NULL,
            utc_date_created TEXT NOT NULL,
            utc_date_modified TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS branches (
            branch_id TEXT PRIMARY KEY,
            child_note_id TEXT NOT NULL,
            parent_note_id TEXT NOT NULL,
            note_position INTEGER NOT NULL DEFAULT 0,
            prefix TEXT,
            is_deleted INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS attributes (
            attribute_id TEXT PRIMARY KEY,
            note_id TEXT NOT NULL,
            type TEXT NOT NULL,
            name TEXT NOT NULL,
            value TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0,
            is_inheritable INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts USING fts5(
            note_id UNINDEXED,
            title,
            content,
            tokenize = 'trigram',
            detail = 'full'
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS attributes_fts USING fts5(
            attribute_id UNINDEXED,
            note_id UNINDEXED,
            name,
            value,
            tokenize = 'trigram',
            detail = 'full'
        );

        -- notes: insert
        CREATE TRIGGER IF NOT EXISTS trg_notes_fts_ai
        AFTER INSERT ON notes
        WHEN new.is_deleted = 0 AND new.is_protected = 0 AND new.type IN ({ELIGIBLE_TYPES})
        BEGIN
            INSERT INTO notes_fts (note_id, title, content)
            SELECT new.note_id, new.title, content FROM blobs WHERE blob_id = new.blob_id;
        END;

        -- notes: title/type/mime/blob_id change. The delete is unconditional
        -- so a type change out of the eligible set still drops the stale
        -- row; the insert is gated by the WHERE clause on the SELECT the
        -- way trg_attrs_fts_au gates its re-insert below.
        CREATE TRIGGER IF NOT EXISTS trg_notes_fts_au_content
        AFTER UPDATE OF title, type, mime, blob_id ON notes
        BEGIN
            DELETE FROM notes_fts WHERE note_id = old.note_id;
            INSERT INTO notes_fts (note_id, title, content)
            SELECT new.note_id, new.title, content FROM blobs
            WHERE blob_id = new.blob_id
              AND new.is_deleted = 0 AND new.is_protected = 0 AND new.type IN ({ELIGIBLE_TYPES});
        END;

        -- notes: hard delete
        CREATE TRIGGER IF NOT EXISTS trg_notes_fts_ad
        AFTER DELETE ON notes
        BEGIN
            DELETE FROM notes_fts WHERE note_id = old.note_id;
        END;

        -- notes: soft delete
        CREATE TRIGGER IF NOT EXISTS trg_notes_fts_soft_delete
        AFTER UPDATE OF is_deleted ON notes
        WHEN new.is_deleted = 1
        BEGIN
            DELETE FROM notes_fts WHERE note_id = old.note_id;
        END;

        -- notes: protect
        CREATE TRIGGER IF NOT EXISTS trg_notes_fts_protect
        AFTER UPDATE OF is_protected ON notes
        WHEN new.is_protected = 1
        BEGIN
            DELETE FROM notes_fts WHERE note_id = old.note_id;
        END;

        -- notes: unprotect
        CREATE TRIGGER IF NOT EXISTS trg_notes_fts_unprotect
        AFTER UPDATE OF is_protected ON notes
        WHEN new.is_protected = 0 AND old.is_protected = 1
             AND new.is_deleted = 0 AND new.type IN ({ELIGIBLE_TYPES})
        BEGIN
            INSERT INTO notes_fts (note_id, title, content)
            SELECT new.note_id, new.title, content FROM blobs WHERE blob_id = new.blob_id;
        END;

        -- blobs: content change propagates to every eligible note referencing it
        CREATE TRIGGER IF NOT EXISTS trg_blobs_fts_aiu
        AFTER INSERT ON blobs
        BEGIN
            DELETE FROM notes_fts WHERE note_id IN (
                SELECT note_id FROM notes WHERE blob_id = new.blob_id
            );
            INSERT INTO notes_fts (note_id, title, content)
            SELECT note_id, title, new.content FROM notes
            WHERE blob_id = new.blob_id
              AND is_deleted = 0 AND is_protected = 0 AND type IN ({ELIGIBLE_TYPES});
        END;

        CREATE TRIGGER IF NOT EXISTS trg_blobs_fts_au
        AFTER UPDATE ON blobs
        BEGIN
            DELETE FROM notes_fts WHERE note_id IN (
                SELECT note_id FROM notes WHERE blob_id = new.blob_id
            );
            INSERT INTO notes_fts (note_id, title, content)
            SELECT note_id, title, new.content FROM notes
            WHERE blob_id = new.blob_id
              AND is_deleted = 0 AND is_protected = 0 AND type IN ({ELIGIBLE_TYPES});
        END;

        -- attributes: mirror non-deleted attributes
        CREATE TRIGGER IF NOT EXISTS trg_attrs_fts_ai
        AFTER INSERT ON attributes
        WHEN new.is_deleted = 0
        BEGIN
            INSERT INTO attributes_fts (attribute_id, note_id, name, value)
            VALUES (new.attribute_id, new.note_id, new.name, new.value);
        END;

        CREATE TRIGGER IF NOT EXISTS trg_attrs_fts_au
        AFTER UPDATE ON attributes
        BEGIN
            DELETE FROM attributes_fts WHERE attribute_id = old.attribute_id;
            INSERT INTO attributes_fts (attribute_id, note_id, name, value)
            SELECT new.attribute_id, new.note_id, new.name, new.value
            WHERE new.is_deleted = 0;
        END;

        CREATE TRIGGER IF NOT EXISTS trg_attrs_fts_ad
        AFTER DELETE ON attributes
        BEGIN
            DELETE FROM attributes_fts WHERE attribute_id = old.attribute_id;
        END;
        "#
    ))?;
    Ok(())
}

pub fn eligible_types() -> &'static [&'static str] {
    &["text", "code", "mermaid", "canvas", "mindMap"]
}
