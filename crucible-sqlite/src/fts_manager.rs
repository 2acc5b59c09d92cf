//! FTS Index Manager (C2): presence checks, the `syncMissingNotes` sweep,
//! full rebuilds, and the single-row update/remove hooks triggers call into.

use once_cell::sync::OnceCell;
use rusqlite::OptionalExtension;
use tracing::{info, warn};

use crate::error::{FtsError, FtsResult};
use crate::pool::SqlitePool;
use crate::schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub total_documents: usize,
    pub total_attributes: usize,
    pub is_complete: bool,
}

pub struct FtsIndexManager {
    pool: SqlitePool,
    availability: OnceCell<bool>,
}

impl FtsIndexManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            availability: OnceCell::new(),
        }
    }

    /// Checks whether the two FTS virtual tables exist. The result is
    /// cached for the lifetime of this manager -- a schema that is present
    /// at startup does not need re-checking on every query.
    pub fn ensure_available(&self) -> FtsResult<()> {
        let available = *self.availability.get_or_try_init(|| -> FtsResult<bool> {
            self.pool.with_connection(|conn| {
                let count: i64 = conn
                    .query_row(
                        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name IN ('notes_fts', 'attributes_fts')",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?
                    .unwrap_or(0);
                Ok(count == 2)
            })
        })?;

        if available {
            Ok(())
        } else {
            Err(FtsError::Unavailable(
                "notes_fts/attributes_fts virtual tables are missing".to_string(),
            ))
        }
    }

    /// Inserts rows for eligible notes absent from `notes_fts`. Returns the
    /// number of rows added; calling this twice in a row returns 0 the
    /// second time (spec P2, idempotence of indexing).
    pub fn sync_missing_notes(&self) -> FtsResult<usize> {
        self.ensure_available()?;
        let eligible = schema::eligible_types()
            .iter()
            .map(|t| format!("'{t}'"))
            .collect::<Vec<_>>()
            .join(", ");

        self.pool.with_connection_mut(|conn| {
            let sql = format!(
                "INSERT INTO notes_fts (note_id, title, content)
                 SELECT n.note_id, n.title, b.content
                 FROM notes n JOIN blobs b ON b.blob_id = n.blob_id
                 WHERE n.is_deleted = 0 AND n.is_protected = 0
                   AND n.type IN ({eligible})
                   AND n.note_id NOT IN (SELECT note_id FROM notes_fts)"
            );
            let added = conn.execute(&sql, [])?;
            if added > 0 {
                info!(added, "sync_missing_notes repaired the trigram index");
            }
            Ok(added)
        })
    }

    /// Drops and re-populates the index from scratch, using bulk-insert
    /// tuning knobs (spec §4.2) and a final optimize pass.
    pub fn rebuild_index(&self) -> FtsResult<()> {
        self.ensure_available()?;
        let eligible = schema::eligible_types()
            .iter()
            .map(|t| format!("'{t}'"))
            .collect::<Vec<_>>()
            .join(", ");

        self.pool.with_connection_mut(|conn| {
            conn.execute("INSERT INTO notes_fts(notes_fts) VALUES ('delete-all')", [])?;
            conn.execute(
                "INSERT INTO notes_fts(notes_fts, rank) VALUES ('automerge', 0)",
                [],
            )?;
            conn.execute(
                "INSERT INTO notes_fts(notes_fts, rank) VALUES ('crisismerge', 64)",
                [],
            )?;

            let sql = format!(
                "INSERT INTO notes_fts (note_id, title, content)
                 SELECT n.note_id, n.title, b.content
                 FROM notes n JOIN blobs b ON b.blob_id = n.blob_id
                 WHERE n.is_deleted = 0 AND n.is_protected = 0
                   AND n.type IN ({eligible})"
            );
            conn.execute(&sql, [])?;
            conn.execute("INSERT INTO notes_fts(notes_fts) VALUES ('optimize')", [])?;

            conn.execute("INSERT INTO attributes_fts(attributes_fts) VALUES ('delete-all')", [])?;
            conn.execute(
                "INSERT INTO attributes_fts (attribute_id, note_id, name, value)
                 SELECT attribute_id, note_id, name, value FROM attributes WHERE is_deleted = 0",
                [],
            )?;
            conn.execute(
                "INSERT INTO attributes_fts(attributes_fts) VALUES ('optimize')",
                [],
            )?;
            info!("rebuilt notes_fts and attributes_fts from source tables");
            Ok(())
        })
    }

    /// Re-indexes a single note; used by the host's trigger-equivalent
    /// write path when content changes outside a single SQL statement
    /// (e.g. across a transaction boundary the triggers don't see).
    pub fn update_note(&self, note_id: &str) -> FtsResult<()> {
        self.ensure_available()?;
        self.pool.with_connection_mut(|conn| {
            conn.execute("DELETE FROM notes_fts WHERE note_id = ?1", [note_id])?;
            let eligible = schema::eligible_types()
                .iter()
                .map(|t| format!("'{t}'"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO notes_fts (note_id, title, content)
                 SELECT n.note_id, n.title, b.content
                 FROM notes n JOIN blobs b ON b.blob_id = n.blob_id
                 WHERE n.note_id = ?1 AND n.is_deleted = 0 AND n.is_protected = 0
                   AND n.type IN ({eligible})"
            );
            conn.execute(&sql, [note_id])?;
            Ok(())
        })
    }

    pub fn remove_note(&self, note_id: &str) -> FtsResult<()> {
        self.ensure_available()?;
        self.pool.with_connection_mut(|conn| {
            conn.execute("DELETE FROM notes_fts WHERE note_id = ?1", [note_id])?;
            Ok(())
        })
    }

    pub fn index_stats(&self) -> FtsResult<IndexStats> {
        self.ensure_available()?;
        self.pool.with_connection(|conn| {
            let total_documents: i64 =
                conn.query_row("SELECT count(*) FROM notes_fts", [], |row| row.get(0))?;
            let total_attributes: i64 =
                conn.query_row("SELECT count(*) FROM attributes_fts", [], |row| row.get(0))?;

            let eligible = schema::eligible_types()
                .iter()
                .map(|t| format!("'{t}'"))
                .collect::<Vec<_>>()
                .join(", ");
            let expected: i64 = conn.query_row(
                &format!(
                    "SELECT count(*) FROM notes
                     WHERE is_deleted = 0 AND is_protected = 0 AND type IN ({eligible})"
                ),
                [],
                |row| row.get(0),
            )?;

            if total_documents as i64 != expected {
                warn!(
                    total_documents,
                    expected, "notes_fts is missing eligible notes; run sync_missing_notes"
                );
            }

            Ok(IndexStats {
                total_documents: total_documents as usize,
                total_attributes: total_attributes as usize,
                is_complete: total_documents as i64 == expected,
            })
        })
    }
}
