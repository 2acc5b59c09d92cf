use serde::{Deserialize, Serialize};

/// Engine-wide tunables that spec.md leaves as inline prose constants
/// (§4.3, §4.5). Centralizing them lets a host override any one of them
/// without hunting through the evaluator and query layer for literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Trigram minimum: tokens shorter than this skip FTS and fall back to
    /// the non-indexed flat-text scan.
    pub min_fts_token_len: usize,
    /// Above this many candidate note ids, the `IN (...)` filter is skipped
    /// and the query relies on the index alone.
    pub candidate_filter_threshold: usize,
    /// Maximum bound parameters per chunk when filtering by candidate ids.
    pub candidate_chunk_size: usize,
    pub snippet_open_tag: String,
    pub snippet_close_tag: String,
    pub snippet_max_tokens: usize,
    /// Per-match budget for `%=` regex evaluation; matches that exceed this
    /// are treated as non-matches rather than stalling the query.
    pub regex_match_budget_ms: u64,
    /// Cap on accumulated per-note score (spec §4.5 "Deduplication").
    pub score_cap: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_fts_token_len: 3,
            candidate_filter_threshold: 5_000,
            candidate_chunk_size: 900,
            snippet_open_tag: "<b>".to_string(),
            snippet_close_tag: "</b>".to_string(),
            snippet_max_tokens: 30,
            regex_match_budget_ms: 100,
            score_cap: 500.0,
        }
    }
}
