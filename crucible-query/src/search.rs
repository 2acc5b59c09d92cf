//! Public search entry point (spec §4.6, §6): parses a query, evaluates
//! it, orders and paginates the result, and assembles the per-note
//! [`SearchResult`] the host displays.

use tracing::{debug, instrument};

use crucible_core::{GraphCache, NoteId};

use crate::ast::{Expression, FulltextOp};
use crate::context::SearchContext;
use crate::error::{QueryResult, SearchError};
use crate::evaluator::evaluate;
use crate::noteset::NoteSet;
use crate::parser::parse;

#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub column: String,
    pub start: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub note_id: String,
    pub score: f64,
    pub note_path: Option<Vec<String>>,
    pub snippet: Option<String>,
    pub highlights: Option<Vec<Highlight>>,
}

const DEFAULT_LIMIT: usize = 50;

/// Parses and runs `query`, returning ranked results and (when
/// `ctx.debug` is set) a [`crate::context::DebugReport`].
#[instrument(skip(ctx), fields(query))]
pub fn search(
    query: &str,
    ctx: &SearchContext,
) -> QueryResult<(Vec<SearchResult>, Option<crate::context::DebugReport>)> {
    let parsed = parse(query)?;
    let Expression::OrderByAndLimit { child, order_by, limit } = &parsed else {
        unreachable!("parser always wraps the tree in OrderByAndLimit")
    };

    let initial = build_initial_set(ctx);
    ctx.record_candidate_count("initial", initial.len());

    let matched = evaluate(child, &initial, ctx);
    ctx.record_candidate_count("final", matched.len());

    let mut ordered: Vec<(NoteId, f64)> = matched.iter().map(|(id, s)| (id.clone(), *s)).collect();
    if order_by.is_empty() {
        ordered.sort_by(|a, b| default_order(&ctx.cache, a, b));
    } else {
        ordered.sort_by(|a, b| explicit_order(&ctx.cache, order_by, a, b));
    }

    let effective_limit = (*limit).or(ctx.limit).unwrap_or(DEFAULT_LIMIT);
    let page: Vec<(NoteId, f64)> = ordered.into_iter().skip(ctx.offset).take(effective_limit).collect();

    let fulltext = find_fulltext_node(child);
    let results = page
        .into_iter()
        .map(|(id, score)| build_result(&ctx.cache, id, score, fulltext.as_ref(), ctx))
        .collect();

    debug!(elapsed_ms = ctx.elapsed().as_millis() as u64, "search completed");
    let debug_report = ctx.take_debug_report(format!("{child:#?}"));
    Ok((results, debug_report))
}

fn build_initial_set(ctx: &SearchContext) -> NoteSet {
    let ids: Vec<NoteId> = match &ctx.ancestor_note_id {
        Some(root) => ctx
            .cache
            .subtree(root)
            .map(|iter| iter.map(|n| n.note_id).collect())
            .unwrap_or_default(),
        None => ctx.cache.all_note_ids(),
    };

    let filtered: Vec<NoteId> = ids
        .into_iter()
        .filter(|id| ctx.include_archived_notes || !is_archived(&ctx.cache, id))
        .collect();

    NoteSet::from_ids(filtered)
}

fn is_archived(cache: &GraphCache, note_id: &NoteId) -> bool {
    cache
        .effective_attributes(note_id)
        .map(|attrs| attrs.iter().any(|a| a.is_archived_label()))
        .unwrap_or(false)
}

fn default_order(cache: &GraphCache, a: &(NoteId, f64), b: &(NoteId, f64)) -> std::cmp::Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| {
            let am = cache.get_note(&a.0).map(|n| n.utc_date_modified);
            let bm = cache.get_note(&b.0).map(|n| n.utc_date_modified);
            bm.cmp(&am)
        })
        .then_with(|| a.0.as_str().cmp(b.0.as_str()))
}

fn explicit_order(
    cache: &GraphCache,
    order_by: &[crate::ast::OrderByClause],
    a: &(NoteId, f64),
    b: &(NoteId, f64),
) -> std::cmp::Ordering {
    for clause in order_by {
        let av = order_key(cache, &a.0, &clause.property);
        let bv = order_key(cache, &b.0, &clause.property);
        let cmp = av.cmp(&bv);
        let cmp = if clause.descending { cmp.reverse() } else { cmp };
        if cmp != std::cmp::Ordering::Equal {
            return cmp;
        }
    }
    a.0.as_str().cmp(b.0.as_str())
}

fn order_key(cache: &GraphCache, note_id: &NoteId, property: &str) -> String {
    let Some(note) = cache.get_note(note_id) else {
        return String::new();
    };
    match property {
        "title" => note.title.to_lowercase(),
        "type" => note.note_type.as_str().to_string(),
        "mime" => note.mime.clone(),
        "dateCreated" => note.date_created.to_rfc3339(),
        "dateModified" => note.date_modified.to_rfc3339(),
        _ => String::new(),
    }
}

fn find_fulltext_node(expr: &Expression) -> Option<(Vec<String>, FulltextOp)> {
    match expr {
        Expression::NoteContentFulltext { tokens, operator } => Some((tokens.clone(), *operator)),
        Expression::And(children) | Expression::Or(children) => {
            children.iter().find_map(find_fulltext_node)
        }
        Expression::Not(inner)
        | Expression::AnyParent(inner)
        | Expression::AnyChild(inner)
        | Expression::AnyAncestor(inner) => find_fulltext_node(inner),
        Expression::RelationWhere { sub, .. } => find_fulltext_node(sub),
        Expression::OrderByAndLimit { child, .. } => find_fulltext_node(child),
        _ => None,
    }
}

fn build_result(
    cache: &GraphCache,
    note_id: NoteId,
    score: f64,
    fulltext: Option<&(Vec<String>, FulltextOp)>,
    ctx: &SearchContext,
) -> SearchResult {
    let snippet = fulltext.and_then(|(tokens, operator)| {
        let fts_op = match operator {
            FulltextOp::Phrase | FulltextOp::NotPhrase => crucible_sqlite::FtsOperator::Phrase,
            FulltextOp::ContainsAll => crucible_sqlite::FtsOperator::ContainsAll,
            FulltextOp::StartsWith => crucible_sqlite::FtsOperator::StartsWith,
            FulltextOp::EndsWith => crucible_sqlite::FtsOperator::EndsWith,
            FulltextOp::Regex => crucible_sqlite::FtsOperator::ContainsAll,
        };
        let candidate = vec![note_id.as_str().to_string()];
        match ctx.fts.search(
            tokens,
            fts_op,
            crucible_sqlite::FtsScope::Notes,
            Some(&candidate),
            &ctx.config,
            true,
        ) {
            Ok(crucible_sqlite::FtsOutcome::Hits(hits)) => hits.into_iter().next().and_then(|h| h.snippet),
            _ => None,
        }
    });

    SearchResult {
        note_id: note_id.as_str().to_string(),
        score,
        note_path: Some(canonical_note_path(cache, &note_id)),
        snippet,
        highlights: None,
    }
}

fn canonical_note_path(cache: &GraphCache, note_id: &NoteId) -> Vec<String> {
    let mut path = vec![note_id.as_str().to_string()];
    let mut current = note_id.clone();
    for _ in 0..64 {
        let parents = cache.parents(&current);
        let Some(parent) = parents.into_iter().next() else {
            break;
        };
        path.push(parent.note_id.as_str().to_string());
        if parent.is_root() {
            break;
        }
        current = parent.note_id;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crucible_core::{
        Attribute, AttributeId, AttributeType, Branch, BranchId, EngineConfig, EntityChange, NoteType,
        ProtectedSession,
    };
    use crucible_sqlite::{FtsQueryLayer, SqliteConfig, SqlitePool};
    use std::sync::Arc;

    fn note(id: &str, title: &str) -> crucible_core::Note {
        crucible_core::Note {
            note_id: NoteId::from(id),
            title: title.to_string(),
            note_type: NoteType::Text,
            mime: "text/plain".to_string(),
            is_protected: false,
            is_deleted: false,
            date_created: Utc::now(),
            date_modified: Utc::now(),
            utc_date_created: Utc::now(),
            utc_date_modified: Utc::now(),
            blob_id: crucible_core::BlobId::from(format!("{id}-blob")),
        }
    }

    fn build_ctx() -> SearchContext {
        let cache = Arc::new(GraphCache::new());
        cache.apply_entity_change(EntityChange::NoteUpserted(note("root", "Root"))).unwrap();
        cache.apply_entity_change(EntityChange::NoteUpserted(note("n1", "Lord of the Rings"))).unwrap();
        cache.apply_entity_change(EntityChange::NoteUpserted(note("n2", "The Hobbit"))).unwrap();
        cache.apply_entity_change(EntityChange::BranchUpserted(Branch {
            branch_id: BranchId::from("b1"),
            child_note_id: NoteId::from("n1"),
            parent_note_id: NoteId::from("root"),
            note_position: 0,
            prefix: None,
            is_deleted: false,
        })).unwrap();
        cache.apply_entity_change(EntityChange::BranchUpserted(Branch {
            branch_id: BranchId::from("b2"),
            child_note_id: NoteId::from("n2"),
            parent_note_id: NoteId::from("root"),
            note_position: 1,
            prefix: None,
            is_deleted: false,
        })).unwrap();
        cache.apply_entity_change(EntityChange::AttributeUpserted(Attribute {
            attribute_id: AttributeId::from("a1"),
            note_id: NoteId::from("n1"),
            attribute_type: AttributeType::Label,
            name: "author".to_string(),
            value: "Tolkien".to_string(),
            position: 0,
            is_inheritable: false,
            is_deleted: false,
        })).unwrap();

        let pool = SqlitePool::new(SqliteConfig::in_memory()).unwrap();
        SearchContext::new(
            cache,
            Arc::new(FtsQueryLayer::new(pool)),
            Arc::new(ProtectedSession::new()),
            EngineConfig::default(),
        )
    }

    #[test]
    fn label_query_returns_matching_note_first() {
        let ctx = build_ctx();
        let (results, _) = search("#author = Tolkien", &ctx).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].note_id, "n1");
        assert_eq!(results[0].note_path.as_deref(), Some(&["root".to_string(), "n1".to_string()][..]));
    }

    #[test]
    fn parse_error_propagates_as_search_error() {
        let ctx = build_ctx();
        let err = search("#author =", &ctx).unwrap_err();
        assert!(matches!(err, SearchError::Parse(_)));
    }

    #[test]
    fn limit_clause_caps_result_count() {
        let ctx = build_ctx();
        let (results, _) = search("note.type = text limit 1", &ctx).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn debug_mode_attaches_report() {
        let mut ctx = build_ctx();
        ctx.debug = true;
        let (_, report) = search("#author", &ctx).unwrap();
        assert!(report.is_some());
    }
}
