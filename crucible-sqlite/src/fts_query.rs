//! FTS Query Layer (C3): translates a token vector and an operator into
//! MATCH/LIKE SQL, post-filters phrase hits, extracts snippets, and runs
//! the protected-notes fallback scan.

use std::time::Instant;

use crucible_core::{CoreError, EngineConfig, ProtectedSession};
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use rusqlite::OptionalExtension;
use tracing::{debug, warn};

use crate::error::{FtsError, FtsResult};
use crate::pool::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsOperator {
    /// `=` and `!=` share a dispatch path: both compute "notes containing
    /// the phrase"; the caller applies the set complement for `!=` (spec
    /// §9 open question, resolved as "no content match").
    Phrase,
    ContainsAll,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsScope {
    Notes,
    Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FtsHit {
    pub note_id: String,
    pub snippet: Option<String>,
}

/// Either a set of hits, or a signal that the caller should fall back to
/// the non-indexed scan because the tokens are too short for trigram
/// matching (spec §4.3, "Tokens shorter than 3 characters").
pub enum FtsOutcome {
    Hits(Vec<FtsHit>),
    TooShortForTrigram,
}

pub struct FtsQueryLayer {
    pool: SqlitePool,
}

impl FtsQueryLayer {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn search(
        &self,
        tokens: &[String],
        operator: FtsOperator,
        scope: FtsScope,
        candidate_note_ids: Option<&[String]>,
        config: &EngineConfig,
        want_snippet: bool,
    ) -> FtsResult<FtsOutcome> {
        let started = Instant::now();
        let tokens: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();

        if tokens.is_empty() || tokens.iter().any(|t| t.chars().count() < config.min_fts_token_len)
        {
            return Ok(FtsOutcome::TooShortForTrigram);
        }

        let result = match operator {
            FtsOperator::Phrase => self.search_phrase(&tokens, scope, candidate_note_ids, config, want_snippet),
            FtsOperator::ContainsAll | FtsOperator::StartsWith | FtsOperator::EndsWith => {
                self.search_like(&tokens, operator, scope, candidate_note_ids, config, want_snippet)
            }
        };

        debug!(
            tokens = ?tokens,
            operator = ?operator,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fts query dispatched"
        );

        result
    }

    fn search_like(
        &self,
        tokens: &[String],
        operator: FtsOperator,
        scope: FtsScope,
        candidate_note_ids: Option<&[String]>,
        config: &EngineConfig,
        want_snippet: bool,
    ) -> FtsResult<FtsOutcome> {
        let (table, id_col, col_a, col_b) = scope.columns();
        let mut base_clauses = Vec::new();
        let mut base_params: Vec<SqlValue> = Vec::new();

        for token in tokens {
            let pattern = like_pattern(token, operator);
            base_clauses.push(format!(
                "({col_a} LIKE ? ESCAPE '\\' OR {col_b} LIKE ? ESCAPE '\\')"
            ));
            base_params.push(SqlValue::Text(pattern.clone()));
            base_params.push(SqlValue::Text(pattern));
        }
        let base_sql = format!("SELECT {id_col} FROM {table} WHERE {}", base_clauses.join(" AND "));

        let mut note_ids = Vec::new();
        for chunk in self.candidate_filter_plan(candidate_note_ids, config) {
            let mut sql = base_sql.clone();
            let mut params = base_params.clone();
            self.append_candidate_filter(&mut sql, &mut params, chunk.as_deref(), id_col);

            let chunk_ids = self.pool.with_connection(|conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    row.get::<_, String>(0)
                })?;
                let mut out = Vec::new();
                for r in rows {
                    out.push(r?);
                }
                Ok(out)
            })?;
            note_ids.extend(chunk_ids);
        }

        let hits = self.attach_snippets(note_ids, scope, want_snippet, config)?;
        Ok(FtsOutcome::Hits(hits))
    }

    fn search_phrase(
        &self,
        tokens: &[String],
        scope: FtsScope,
        candidate_note_ids: Option<&[String]>,
        config: &EngineConfig,
        want_snippet: bool,
    ) -> FtsResult<FtsOutcome> {
        let (fts_table, id_col, col_a, col_b) = scope.fts_columns();
        let sanitized: Vec<String> = tokens.iter().map(|t| sanitize_fts_token(t)).collect();
        if sanitized.iter().any(|t| t.is_empty()) {
            return Err(FtsError::QueryError {
                message: "phrase query reduced to an empty token after sanitization".to_string(),
                recoverable: true,
            });
        }
        let phrase_query = format!("\"{}\"", sanitized.join(" "));
        let base_sql = format!("SELECT {id_col} FROM {fts_table} WHERE {fts_table} MATCH ?");

        let mut raw_hits = Vec::new();
        for chunk in self.candidate_filter_plan(candidate_note_ids, config) {
            let mut sql = base_sql.clone();
            let mut params: Vec<SqlValue> = vec![SqlValue::Text(phrase_query.clone())];
            self.append_candidate_filter(&mut sql, &mut params, chunk.as_deref(), id_col);

            let chunk_hits = self.pool.with_connection(|conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    row.get::<_, String>(0)
                })?;
                let mut out = Vec::new();
                for r in rows {
                    out.push(r?);
                }
                Ok(out)
            })?;
            raw_hits.extend(chunk_hits);
        }

        // Post-filter: the trigram tokenizer produces false positives
        // ("test123" matching "test1234"), so re-check with a
        // word-boundary regex against the actual stored text.
        let phrase = tokens.join(" ");
        let boundary = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&phrase))).map_err(|e| {
            FtsError::QueryError {
                message: format!("invalid phrase pattern: {e}"),
                recoverable: true,
            }
        })?;

        let mut confirmed = Vec::new();
        for note_id in raw_hits {
            let (a, b): (String, String) = self.pool.with_connection(|conn| {
                conn.query_row(
                    &format!(
                        "SELECT {col_a}, {col_b} FROM {fts_table} WHERE {id_col} = ?1"
                    ),
                    [&note_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(FtsError::from)
            })?;
            if boundary.is_match(&a) || boundary.is_match(&b) {
                confirmed.push(note_id);
            }
        }

        let hits = self.attach_snippets(confirmed, scope, want_snippet, config)?;
        Ok(FtsOutcome::Hits(hits))
    }

    /// Splits the candidate set into one or more fixed statements to run
    /// (`None` meaning "no `IN (...)` filter, trust the index/caller").
    /// Each chunk is at most `config.candidate_chunk_size` ids; a set
    /// larger than `config.candidate_filter_threshold` skips filtering
    /// entirely rather than building dozens of statements. The candidate
    /// list is sorted first so chunk boundaries -- and thus which ids are
    /// queried together -- are stable across runs regardless of the
    /// caller's (e.g. hash-map-backed) iteration order.
    fn candidate_filter_plan(
        &self,
        candidate_note_ids: Option<&[String]>,
        config: &EngineConfig,
    ) -> Vec<Option<Vec<String>>> {
        let Some(ids) = candidate_note_ids else {
            return vec![None];
        };
        if ids.len() > config.candidate_filter_threshold {
            return vec![None];
        }
        let mut sorted: Vec<String> = ids.to_vec();
        sorted.sort();
        sorted
            .chunks(config.candidate_chunk_size.max(1))
            .map(|c| Some(c.to_vec()))
            .collect()
    }

    fn append_candidate_filter(
        &self,
        sql: &mut String,
        params: &mut Vec<SqlValue>,
        chunk: Option<&[String]>,
        id_col: &str,
    ) {
        let Some(ids) = chunk else {
            return;
        };
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        sql.push_str(&format!(" AND {id_col} IN ({placeholders})"));
        for id in ids {
            params.push(SqlValue::Text(id.clone()));
        }
    }

    fn attach_snippets(
        &self,
        note_ids: Vec<String>,
        scope: FtsScope,
        want_snippet: bool,
        config: &EngineConfig,
    ) -> FtsResult<Vec<FtsHit>> {
        if !want_snippet || scope != FtsScope::Notes {
            return Ok(note_ids
                .into_iter()
                .map(|note_id| FtsHit { note_id, snippet: None })
                .collect());
        }
        self.pool.with_connection(|conn| {
            let mut out = Vec::with_capacity(note_ids.len());
            for note_id in note_ids {
                let snippet: Option<String> = conn
                    .query_row(
                        "SELECT snippet(notes_fts, 2, ?1, ?2, '...', ?3) FROM notes_fts WHERE note_id = ?4",
                        rusqlite::params![
                            config.snippet_open_tag,
                            config.snippet_close_tag,
                            config.snippet_max_tokens as i64,
                            note_id
                        ],
                        |row| row.get(0),
                    )
                    .ok();
                out.push(FtsHit { note_id, snippet });
            }
            Ok(out)
        })
    }

    /// Reads a single note's raw content for a `note.content` property
    /// comparison (as distinct from the indexed, tokenized fulltext path).
    /// Protected notes are decrypted with `session` if one is active;
    /// with no active session a protected note's content is unreadable
    /// and this returns `Ok(None)`, same as a missing note.
    pub fn read_content(&self, note_id: &str, session: &ProtectedSession) -> FtsResult<Option<String>> {
        let row: Option<(bool, Vec<u8>)> = self.pool.with_connection(|conn| {
            conn.query_row(
                "SELECT n.is_protected, b.content
                 FROM notes n JOIN blobs b ON b.blob_id = n.blob_id
                 WHERE n.note_id = ?1",
                [note_id],
                |row| Ok((row.get::<_, i64>(0)? != 0, row.get(1)?)),
            )
            .optional()
            .map_err(FtsError::from)
        })?;

        let Some((is_protected, raw)) = row else {
            return Ok(None);
        };

        if !is_protected {
            return Ok(Some(String::from_utf8_lossy(&raw).to_string()));
        }

        let Some(key) = session.snapshot() else {
            return Ok(None);
        };
        match crucible_core::protected::decrypt(&key, &raw, note_id) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
            Err(CoreError::DecryptionFailed { reason, .. }) => {
                warn!(note_id, reason, "read_content: decryption failed");
                Ok(None)
            }
            Err(other) => Err(FtsError::QueryError {
                message: other.to_string(),
                recoverable: true,
            }),
        }
    }

    /// Scans protected notes in-process, decrypting each with `session`
    /// and checking the token(s) as a plain substring/phrase. Never
    /// indexed, never cached; returns empty when no session is active.
    /// Individual decryption failures are logged and the note skipped.
    pub fn search_protected_notes_sync(
        &self,
        session: &ProtectedSession,
        tokens: &[String],
        phrase_mode: bool,
    ) -> FtsResult<Vec<FtsHit>> {
        let Some(key) = session.snapshot() else {
            return Ok(Vec::new());
        };

        let rows: Vec<(String, String, Vec<u8>, Vec<u8>)> = self.pool.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.note_id, n.title, n.title, b.content
                 FROM notes n JOIN blobs b ON b.blob_id = n.blob_id
                 WHERE n.is_protected = 1 AND n.is_deleted = 0",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?.into_bytes(),
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })?;

        let needle = tokens.join(" ").to_lowercase();
        let mut hits = Vec::new();
        for (note_id, _title_plain, title_envelope, content_envelope) in rows {
            let title = match crucible_core::protected::decrypt(&key, &title_envelope, &note_id) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                Err(CoreError::DecryptionFailed { reason, .. }) => {
                    warn!(note_id, reason, "skipping protected note title: decryption failed");
                    continue;
                }
                Err(other) => return Err(FtsError::QueryError {
                    message: other.to_string(),
                    recoverable: true,
                }),
            };
            let content = match crucible_core::protected::decrypt(&key, &content_envelope, &note_id) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                Err(CoreError::DecryptionFailed { reason, .. }) => {
                    warn!(note_id, reason, "skipping protected note content: decryption failed");
                    continue;
                }
                Err(other) => return Err(FtsError::QueryError {
                    message: other.to_string(),
                    recoverable: true,
                }),
            };

            let haystack = format!("{} {}", title.to_lowercase(), content.to_lowercase());
            let matched = if phrase_mode {
                haystack.contains(&needle)
            } else {
                tokens.iter().all(|t| haystack.contains(&t.to_lowercase()))
            };
            if matched {
                hits.push(FtsHit { note_id, snippet: None });
            }
        }
        Ok(hits)
    }
}

impl FtsScope {
    fn columns(self) -> (&'static str, &'static str, &'static str, &'static str) {
        match self {
            FtsScope::Notes => ("notes_fts", "note_id", "title", "content"),
            FtsScope::Attributes => ("attributes_fts", "attribute_id", "name", "value"),
        }
    }

    fn fts_columns(self) -> (&'static str, &'static str, &'static str, &'static str) {
        self.columns()
    }
}

fn like_pattern(token: &str, operator: FtsOperator) -> String {
    let escaped = token.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    match operator {
        FtsOperator::ContainsAll => format!("%{escaped}%"),
        FtsOperator::StartsWith => format!("{escaped}%"),
        FtsOperator::EndsWith => format!("%{escaped}"),
        FtsOperator::Phrase => escaped,
    }
}

/// Strips FTS5 query-meta characters that would otherwise be interpreted
/// as syntax rather than literal text (spec §4.3, "Token sanitization").
fn sanitize_fts_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| !matches!(c, '"' | '(' | ')' | ':' | '*'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::SqliteConfig;

    fn seeded_pool() -> SqlitePool {
        let pool = SqlitePool::new(SqliteConfig::in_memory()).unwrap();
        pool.with_connection_mut(|conn| {
            conn.execute_batch(
                r#"
                INSERT INTO blobs (blob_id, content) VALUES
                    ('b1', 'This contains the search term.'),
                    ('b2', 'Another search term here.'),
                    ('b3', 'No matching words.');
                INSERT INTO notes (note_id, title, type, mime, blob_id,
                    date_created, date_modified, utc_date_created, utc_date_modified)
                VALUES
                    ('n1', 'Book One', 'text', 'text/plain', 'b1', '', '', '', ''),
                    ('n2', 'Book Two', 'text', 'text/plain', 'b2', '', '', '', ''),
                    ('n3', 'Different', 'text', 'text/plain', 'b3', '', '', '', '');
                "#,
            )?;
            Ok(())
        })
        .unwrap();
        pool
    }

    #[test]
    fn phrase_search_excludes_non_matching_note() {
        let pool = seeded_pool();
        let manager = crate::fts_manager::FtsIndexManager::new(pool.clone());
        manager.sync_missing_notes().unwrap();

        let layer = FtsQueryLayer::new(pool);
        let cfg = EngineConfig::default();
        let tokens = vec!["search".to_string(), "term".to_string()];
        let outcome = layer
            .search(&tokens, FtsOperator::Phrase, FtsScope::Notes, None, &cfg, false)
            .unwrap();
        let FtsOutcome::Hits(hits) = outcome else {
            panic!("expected hits");
        };
        let ids: Vec<&str> = hits.iter().map(|h| h.note_id.as_str()).collect();
        assert!(ids.contains(&"n1"));
        assert!(ids.contains(&"n2"));
        assert!(!ids.contains(&"n3"));
    }

    #[test]
    fn short_tokens_signal_fallback() {
        let pool = seeded_pool();
        let layer = FtsQueryLayer::new(pool);
        let cfg = EngineConfig::default();
        let outcome = layer
            .search(&["ab".to_string()], FtsOperator::ContainsAll, FtsScope::Notes, None, &cfg, false)
            .unwrap();
        assert!(matches!(outcome, FtsOutcome::TooShortForTrigram));
    }

    #[test]
    fn contains_all_requires_every_token() {
        let pool = seeded_pool();
        let manager = crate::fts_manager::FtsIndexManager::new(pool.clone());
        manager.sync_missing_notes().unwrap();

        let layer = FtsQueryLayer::new(pool);
        let cfg = EngineConfig::default();
        let tokens = vec!["book".to_string(), "one".to_string()];
        let outcome = layer
            .search(&tokens, FtsOperator::ContainsAll, FtsScope::Notes, None, &cfg, false)
            .unwrap();
        let FtsOutcome::Hits(hits) = outcome else {
            panic!("expected hits");
        };
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].note_id, "n1");
    }

    #[test]
    fn candidate_filter_chunks_across_statements() {
        let pool = seeded_pool();
        let manager = crate::fts_manager::FtsIndexManager::new(pool.clone());
        manager.sync_missing_notes().unwrap();

        let layer = FtsQueryLayer::new(pool);
        let mut cfg = EngineConfig::default();
        cfg.candidate_chunk_size = 1; // forces n1 and n2 into separate chunks

        let candidates = vec!["n1".to_string(), "n2".to_string(), "n3".to_string()];
        let tokens = vec!["search".to_string(), "term".to_string()];
        let outcome = layer
            .search(&tokens, FtsOperator::Phrase, FtsScope::Notes, Some(&candidates), &cfg, false)
            .unwrap();
        let FtsOutcome::Hits(hits) = outcome else {
            panic!("expected hits");
        };
        let ids: Vec<&str> = hits.iter().map(|h| h.note_id.as_str()).collect();
        assert!(ids.contains(&"n1"));
        assert!(ids.contains(&"n2"));
        assert!(!ids.contains(&"n3"));
    }

    #[test]
    fn no_protected_session_returns_empty() {
        let pool = seeded_pool();
        let layer = FtsQueryLayer::new(pool);
        let session = ProtectedSession::new();
        let hits = layer
            .search_protected_notes_sync(&session, &["search".to_string()], false)
            .unwrap();
        assert!(hits.is_empty());
    }
}
