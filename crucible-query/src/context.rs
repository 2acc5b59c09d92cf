//! `SearchContext`: the per-call options and shared handles the evaluator
//! and query layer read from (spec §4.2 "External interfaces", §9 ambient
//! options).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crucible_core::{EngineConfig, GraphCache, NoteId, ProtectedSession};
use crucible_sqlite::FtsQueryLayer;
use tracing::warn;

/// Per-node candidate-set sizes and the parsed tree, captured only when
/// `debug` is requested (spec §9 "debug mode").
#[derive(Debug, Clone, Default)]
pub struct DebugReport {
    pub parse_tree: String,
    pub candidate_counts: Vec<(String, usize)>,
    pub elapsed_ms: u64,
}

pub struct SearchContext {
    pub cache: Arc<GraphCache>,
    pub fts: Arc<FtsQueryLayer>,
    pub protected_session: Arc<ProtectedSession>,
    pub config: EngineConfig,

    /// Skips content fulltext evaluation entirely; only structural and
    /// title/attribute atoms are considered.
    pub fast_search: bool,
    pub include_archived_notes: bool,
    /// Restricts the initial candidate set to this note's subtree.
    pub ancestor_note_id: Option<NoteId>,
    /// Rewrites `=` on labels/properties to a substring match.
    pub fuzzy_attribute_search: bool,
    pub debug: bool,
    pub limit: Option<usize>,
    pub offset: usize,

    started: Instant,
    errors: Mutex<Vec<String>>,
    candidate_counts: Mutex<Vec<(String, usize)>>,
}

impl SearchContext {
    pub fn new(
        cache: Arc<GraphCache>,
        fts: Arc<FtsQueryLayer>,
        protected_session: Arc<ProtectedSession>,
        config: EngineConfig,
    ) -> Self {
        Self {
            cache,
            fts,
            protected_session,
            config,
            fast_search: false,
            include_archived_notes: false,
            ancestor_note_id: None,
            fuzzy_attribute_search: false,
            debug: false,
            limit: None,
            offset: 0,
            started: Instant::now(),
            errors: Mutex::new(Vec::new()),
            candidate_counts: Mutex::new(Vec::new()),
        }
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(message, "query evaluation recorded a non-fatal error");
        self.errors.lock().unwrap().push(message);
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn record_candidate_count(&self, label: impl Into<String>, count: usize) {
        if self.debug {
            self.candidate_counts.lock().unwrap().push((label.into(), count));
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn take_debug_report(&self, parse_tree: String) -> Option<DebugReport> {
        if !self.debug {
            return None;
        }
        Some(DebugReport {
            parse_tree,
            candidate_counts: self.candidate_counts.lock().unwrap().clone(),
            elapsed_ms: self.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_sqlite::{SqliteConfig, SqlitePool};

    fn test_context() -> SearchContext {
        let pool = SqlitePool::new(SqliteConfig::in_memory()).unwrap();
        SearchContext::new(
            Arc::new(GraphCache::new()),
            Arc::new(FtsQueryLayer::new(pool)),
            Arc::new(ProtectedSession::new()),
            EngineConfig::default(),
        )
    }

    #[test]
    fn debug_report_is_none_unless_requested() {
        let ctx = test_context();
        assert!(ctx.take_debug_report("True".to_string()).is_none());
    }

    #[test]
    fn debug_report_collects_candidate_counts() {
        let mut ctx = test_context();
        ctx.debug = true;
        ctx.record_candidate_count("labelComparison:author", 3);
        let report = ctx.take_debug_report("LabelComparison".to_string()).unwrap();
        assert_eq!(report.candidate_counts, vec![("labelComparison:author".to_string(), 3)]);
    }

    #[test]
    fn errors_accumulate_across_calls() {
        let ctx = test_context();
        ctx.record_error("fts unavailable");
        ctx.record_error("regex budget exceeded");
        assert_eq!(ctx.errors().len(), 2);
    }
}
