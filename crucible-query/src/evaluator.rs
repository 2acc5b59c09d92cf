//! Expression Evaluator (spec §4.5): walks the parsed tree, threading a
//! [`NoteSet`] through each node and accumulating the scoring contribution
//! described there. Modeled as a free function over the tagged
//! [`Expression`] sum type rather than a method per node kind.

use crucible_core::{AttributeType, GraphCache, Note, NoteId};
use crucible_sqlite::{FtsOperator, FtsOutcome, FtsScope};

use crate::ast::{Expression, FulltextOp, Op, Value};
use crate::context::SearchContext;
use crate::noteset::NoteSet;

const TITLE_EXACT_SCORE: f64 = 100.0;
const TITLE_PARTIAL_SCORE: f64 = 50.0;
const ATTRIBUTE_MATCH_SCORE: f64 = 30.0;
const CONTENT_TOKEN_SCORE: f64 = 10.0;
const INHERITANCE_DECAY: f64 = 0.8;

const NUMERIC_PROPS: &[&str] = &[
    "labelCount",
    "ownedLabelCount",
    "relationCount",
    "ownedRelationCount",
    "targetRelationCount",
    "attributeCount",
    "ownedAttributeCount",
    "parentCount",
    "childrenCount",
];

/// Evaluates `expr` against `input`, returning the subset of `input` (or,
/// for `True`, all of it) that satisfies `expr`, with each surviving
/// note's score increased by whatever this node contributes on top of
/// the score it already carried in `input`.
pub fn evaluate(expr: &Expression, input: &NoteSet, ctx: &SearchContext) -> NoteSet {
    let cap = ctx.config.score_cap;
    match expr {
        Expression::True => input.clone(),

        Expression::And(children) => {
            let ordered = reorder_and_children(children);
            let mut acc = input.clone();
            for child in ordered {
                if acc.is_empty() {
                    break;
                }
                acc = evaluate(child, &acc, ctx);
            }
            ctx.record_candidate_count("and", acc.len());
            acc
        }

        Expression::Or(children) => {
            let mut total = NoteSet::empty();
            for child in children {
                let matched = evaluate(child, input, ctx);
                total = total.union(matched, cap);
            }
            ctx.record_candidate_count("or", total.len());
            total
        }

        Expression::Not(child) => {
            let matched = evaluate(child, input, ctx);
            let result = input.difference(&matched);
            ctx.record_candidate_count("not", result.len());
            result
        }

        Expression::PropertyComparison { property, op, value } => {
            eval_property_comparison(property, *op, value, input, ctx)
        }

        Expression::LabelComparison { name, op, value } => {
            eval_attribute_comparison(AttributeType::Label, name, *op, value, input, ctx)
        }

        Expression::AttributeExists { kind, name, negated } => {
            eval_attribute_exists(*kind, name, *negated, input, ctx)
        }

        Expression::RelationWhere { name, sub } => eval_relation_where(name, sub, input, ctx),

        Expression::AnyParent(sub) => eval_any_related(input, ctx, sub, |cache, id| {
            cache.parents(id).into_iter().map(|n| n.note_id).collect()
        }),

        Expression::AnyChild(sub) => eval_any_related(input, ctx, sub, |cache, id| {
            cache.children(id).into_iter().map(|n| n.note_id).collect()
        }),

        Expression::AnyAncestor(sub) => eval_any_related(input, ctx, sub, |cache, id| {
            cache
                .ancestors(id)
                .map(|notes| notes.into_iter().map(|n| n.note_id).collect())
                .unwrap_or_default()
        }),

        Expression::NoteFlatText { tokens } => eval_flat_text(tokens, input, ctx),

        Expression::NoteContentFulltext { tokens, operator } => {
            eval_content_fulltext(tokens, *operator, input, ctx)
        }

        Expression::OrderByAndLimit { child, .. } => evaluate(child, input, ctx),
    }
}

fn effective_op(ctx: &SearchContext, op: Op) -> Op {
    if ctx.fuzzy_attribute_search && op == Op::Eq {
        Op::ContainsAll
    } else {
        op
    }
}

fn compare_str(actual: &str, op: Op, value: &Value) -> bool {
    let actual_lc = actual.to_lowercase();
    let value_lc = value.as_str().to_lowercase();
    match op {
        Op::Eq => actual_lc == value_lc,
        Op::NotEq => actual_lc != value_lc,
        Op::ContainsAll => value_lc.split_whitespace().all(|tok| actual_lc.contains(tok)),
        Op::StartsWith => actual_lc.starts_with(&value_lc),
        Op::EndsWith => actual_lc.ends_with(&value_lc),
        Op::RegexOp => regex::Regex::new(&value.as_str())
            .map(|re| re.is_match(actual))
            .unwrap_or(false),
        Op::Gt => actual_lc > value_lc,
        Op::Ge => actual_lc >= value_lc,
        Op::Lt => actual_lc < value_lc,
        Op::Le => actual_lc <= value_lc,
    }
}

fn compare_num(actual: f64, op: Op, value: &Value) -> bool {
    let target = match value {
        Value::Num(n) => *n,
        Value::Str(s) => match s.parse::<f64>() {
            Ok(n) => n,
            Err(_) => return false,
        },
    };
    match op {
        Op::Eq => (actual - target).abs() < f64::EPSILON,
        Op::NotEq => (actual - target).abs() >= f64::EPSILON,
        Op::Gt => actual > target,
        Op::Ge => actual >= target,
        Op::Lt => actual < target,
        Op::Le => actual <= target,
        // Textual operators on a numeric property are never satisfied.
        Op::ContainsAll | Op::StartsWith | Op::EndsWith | Op::RegexOp => false,
    }
}

fn basic_property_value(note: &Note, property: &str) -> Option<String> {
    match property {
        "title" => Some(note.title.clone()),
        "type" => Some(note.note_type.as_str().to_string()),
        "mime" => Some(note.mime.clone()),
        "dateCreated" => Some(note.date_created.to_rfc3339()),
        "dateModified" => Some(note.date_modified.to_rfc3339()),
        _ => None,
    }
}

fn numeric_property_value(cache: &GraphCache, note_id: &NoteId, property: &str) -> Option<f64> {
    let counts = cache.attribute_counts(note_id).ok()?;
    Some(match property {
        "labelCount" => counts.label_count as f64,
        "ownedLabelCount" => counts.owned_label_count as f64,
        "relationCount" => counts.relation_count as f64,
        "ownedRelationCount" => counts.owned_relation_count as f64,
        "targetRelationCount" => cache.target_relation_count(note_id) as f64,
        "attributeCount" => counts.attribute_count as f64,
        "ownedAttributeCount" => counts.owned_attribute_count as f64,
        "parentCount" => cache.parent_count(note_id) as f64,
        "childrenCount" => cache.children_count(note_id) as f64,
        _ => return None,
    })
}

fn eval_property_comparison(
    property: &str,
    op: Op,
    value: &Value,
    input: &NoteSet,
    ctx: &SearchContext,
) -> NoteSet {
    let op = effective_op(ctx, op);
    let mut result = NoteSet::empty();
    for id in input.ids() {
        let Some(note) = ctx.cache.get_note(id) else { continue };

        let matched = if NUMERIC_PROPS.contains(&property) {
            numeric_property_value(&ctx.cache, id, property)
                .map(|actual| compare_num(actual, op, value))
                .unwrap_or(false)
        } else if property == "content" {
            match ctx.fts.read_content(id.as_str(), &ctx.protected_session) {
                Ok(Some(text)) => compare_str(&text, op, value),
                Ok(None) => false,
                Err(e) => {
                    ctx.record_error(format!("read_content failed for {id}: {e}"));
                    false
                }
            }
        } else if let Some(actual) = basic_property_value(&note, property) {
            compare_str(&actual, op, value)
        } else {
            false
        };

        if matched {
            let bonus = if property == "title" {
                if op == Op::Eq {
                    TITLE_EXACT_SCORE
                } else {
                    TITLE_PARTIAL_SCORE
                }
            } else {
                0.0
            };
            result.add_score(id.clone(), input.score(id) + bonus, ctx.config.score_cap);
        }
    }
    result
}

fn eval_attribute_comparison(
    kind: AttributeType,
    name: &str,
    op: Op,
    value: &Value,
    input: &NoteSet,
    ctx: &SearchContext,
) -> NoteSet {
    let op = effective_op(ctx, op);
    let mut result = NoteSet::empty();
    for id in input.ids() {
        let Ok(attrs) = ctx.cache.effective_attributes(id) else {
            ctx.record_error(format!("effective_attributes failed for {id}"));
            continue;
        };
        let matched = attrs
            .iter()
            .filter(|a| a.attribute_type == kind && a.name.eq_ignore_ascii_case(name))
            .any(|a| compare_str(&a.value, op, value));
        if matched {
            result.add_score(
                id.clone(),
                input.score(id) + ATTRIBUTE_MATCH_SCORE,
                ctx.config.score_cap,
            );
        }
    }
    ctx.record_candidate_count(format!("labelComparison:{name}"), result.len());
    result
}

fn eval_attribute_exists(
    kind: AttributeType,
    name: &str,
    negated: bool,
    input: &NoteSet,
    ctx: &SearchContext,
) -> NoteSet {
    let mut present_ids: Vec<NoteId> = Vec::new();
    for id in input.ids() {
        let Ok(attrs) = ctx.cache.effective_attributes(id) else {
            ctx.record_error(format!("effective_attributes failed for {id}"));
            continue;
        };
        if attrs.iter().any(|a| a.attribute_type == kind && a.name.eq_ignore_ascii_case(name)) {
            present_ids.push(id.clone());
        }
    }

    if negated {
        let present_set = NoteSet::from_ids(present_ids);
        input.difference(&present_set)
    } else {
        let mut result = NoteSet::empty();
        for id in &present_ids {
            result.add_score(id.clone(), input.score(id) + ATTRIBUTE_MATCH_SCORE, ctx.config.score_cap);
        }
        result
    }
}

fn eval_relation_where(name: &str, sub: &Expression, input: &NoteSet, ctx: &SearchContext) -> NoteSet {
    let mut result = NoteSet::empty();
    for id in input.ids() {
        let targets = match ctx.cache.relation_targets_by_name(id, name) {
            Ok(t) => t,
            Err(_) => {
                ctx.record_error(format!("relation_targets_by_name failed for {id}"));
                continue;
            }
        };
        if targets.is_empty() {
            continue;
        }
        let target_set = NoteSet::from_ids(targets.iter().cloned());
        let sub_result = evaluate(sub, &target_set, ctx);
        let best = targets
            .iter()
            .filter(|t| sub_result.contains(t))
            .map(|t| sub_result.score(t))
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
        if let Some(best) = best {
            result.add_score(
                id.clone(),
                input.score(id) + INHERITANCE_DECAY * best,
                ctx.config.score_cap,
            );
        }
    }
    result
}

fn eval_any_related(
    input: &NoteSet,
    ctx: &SearchContext,
    sub: &Expression,
    related_ids: impl Fn(&GraphCache, &NoteId) -> Vec<NoteId>,
) -> NoteSet {
    let mut result = NoteSet::empty();
    for id in input.ids() {
        let related = related_ids(&ctx.cache, id);
        if related.is_empty() {
            continue;
        }
        let related_set = NoteSet::from_ids(related.iter().cloned());
        let sub_result = evaluate(sub, &related_set, ctx);
        let best = related
            .iter()
            .filter(|r| sub_result.contains(r))
            .map(|r| sub_result.score(r))
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
        if let Some(best) = best {
            result.add_score(
                id.clone(),
                input.score(id) + INHERITANCE_DECAY * best,
                ctx.config.score_cap,
            );
        }
    }
    result
}

fn eval_flat_text(tokens: &[String], input: &NoteSet, ctx: &SearchContext) -> NoteSet {
    let mut matched_ids = Vec::new();
    for id in input.ids() {
        let Ok(text) = ctx.cache.flat_text(id) else {
            ctx.record_error(format!("flat_text failed for {id}"));
            continue;
        };
        if tokens.iter().all(|t| text.contains(t.as_str())) {
            matched_ids.push(id.clone());
        }
    }

    let matched_set = NoteSet::from_ids(matched_ids.iter().cloned());
    let mut result = matched_set.restrict_to(input);
    let bonus = CONTENT_TOKEN_SCORE * tokens.len() as f64;
    for id in matched_ids {
        result.add_score(id, bonus, ctx.config.score_cap);
    }
    result
}

fn eval_content_fulltext(
    tokens: &[String],
    operator: FulltextOp,
    input: &NoteSet,
    ctx: &SearchContext,
) -> NoteSet {
    if ctx.fast_search {
        return input.clone();
    }
    if tokens.is_empty() {
        return input.clone();
    }

    let fts_op = match operator {
        FulltextOp::Phrase | FulltextOp::NotPhrase => FtsOperator::Phrase,
        FulltextOp::ContainsAll => FtsOperator::ContainsAll,
        FulltextOp::StartsWith => FtsOperator::StartsWith,
        FulltextOp::EndsWith => FtsOperator::EndsWith,
        // The indexed layer has no native regex operator; approximate with
        // containment and let the fallback path do the precise matching.
        FulltextOp::Regex => FtsOperator::ContainsAll,
    };

    let mut candidate_ids: Vec<String> = input.ids().map(|id| id.as_str().to_string()).collect();
    candidate_ids.sort();
    let outcome = ctx
        .fts
        .search(tokens, fts_op, FtsScope::Notes, Some(&candidate_ids), &ctx.config, false);

    let matched: Vec<NoteId> = match outcome {
        Ok(FtsOutcome::Hits(hits)) => {
            let mut ids: Vec<NoteId> = hits.into_iter().map(|h| NoteId::from(h.note_id)).collect();
            if let Ok(protected) = ctx.fts.search_protected_notes_sync(
                &ctx.protected_session,
                tokens,
                matches!(operator, FulltextOp::Phrase | FulltextOp::NotPhrase),
            ) {
                ids.extend(protected.into_iter().map(|h| NoteId::from(h.note_id)));
            }
            ids
        }
        Ok(FtsOutcome::TooShortForTrigram) => {
            return eval_flat_text_fallback(tokens, operator, input, ctx);
        }
        Err(e) => {
            ctx.record_error(format!("fts search failed, falling back to flat text: {e}"));
            return eval_flat_text_fallback(tokens, operator, input, ctx);
        }
    };

    let matched_set = NoteSet::from_ids(matched);
    let bonus = CONTENT_TOKEN_SCORE * tokens.len() as f64;

    if matches!(operator, FulltextOp::NotPhrase) {
        let mut result = NoteSet::empty();
        for id in input.ids() {
            if !matched_set.contains(id) {
                result.add_score(id.clone(), input.score(id), ctx.config.score_cap);
            }
        }
        return result;
    }

    let mut result = matched_set.restrict_to(input);
    let bonus_ids: Vec<NoteId> = result.ids().cloned().collect();
    for id in bonus_ids {
        result.add_score(id, bonus, ctx.config.score_cap);
    }
    ctx.record_candidate_count("contentFulltext", result.len());
    result
}

fn eval_flat_text_fallback(
    tokens: &[String],
    operator: FulltextOp,
    input: &NoteSet,
    ctx: &SearchContext,
) -> NoteSet {
    let plain = evaluate(&Expression::NoteFlatText { tokens: tokens.to_vec() }, input, ctx);
    if matches!(operator, FulltextOp::NotPhrase) {
        input.difference(&plain)
    } else {
        plain
    }
}

/// Reorders `AndExp` children for selectivity: attribute-existence and
/// fulltext-token atoms are tried first (index-backed, cheap to
/// intersect), ancestry walks last (spec §4.5 "optimizer").
fn reorder_and_children(children: &[Expression]) -> Vec<&Expression> {
    let mut ranked: Vec<(u8, &Expression)> = children.iter().map(|c| (and_child_rank(c), c)).collect();
    ranked.sort_by_key(|(rank, _)| *rank);
    ranked.into_iter().map(|(_, e)| e).collect()
}

fn and_child_rank(expr: &Expression) -> u8 {
    match expr {
        Expression::AttributeExists { .. }
        | Expression::LabelComparison { .. }
        | Expression::NoteFlatText { .. }
        | Expression::NoteContentFulltext { .. } => 0,
        Expression::PropertyComparison { .. } => 1,
        Expression::RelationWhere { .. } | Expression::AnyParent(_) | Expression::AnyChild(_) => 2,
        Expression::AnyAncestor(_) => 3,
        Expression::And(_) | Expression::Or(_) | Expression::Not(_) | Expression::True | Expression::OrderByAndLimit { .. } => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SearchContext;
    use chrono::Utc;
    use crucible_core::{Attribute, AttributeId, BlobId, Branch, BranchId, EngineConfig, EntityChange, NoteType, ProtectedSession};
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
            blob_id: BlobId::from(format!("{id}-blob")),
        }
    }

    fn test_ctx() -> (Arc<GraphCache>, SearchContext) {
        let cache = Arc::new(GraphCache::new());
        let pool = SqlitePool::new(SqliteConfig::in_memory()).unwrap();
        let ctx = SearchContext::new(
            cache.clone(),
            Arc::new(FtsQueryLayer::new(pool)),
            Arc::new(ProtectedSession::new()),
            EngineConfig::default(),
        );
        (cache, ctx)
    }

    fn seed_two_notes_with_label(cache: &GraphCache) {
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
    }

    #[test]
    fn label_comparison_filters_and_scores() {
        let (cache, ctx) = test_ctx();
        seed_two_notes_with_label(&cache);
        let input = NoteSet::from_ids(vec![NoteId::from("n1"), NoteId::from("n2")]);
        let expr = Expression::LabelComparison {
            name: "author".to_string(),
            op: Op::Eq,
            value: Value::Str("Tolkien".to_string()),
        };
        let result = evaluate(&expr, &input, &ctx);
        assert!(result.contains(&NoteId::from("n1")));
        assert!(!result.contains(&NoteId::from("n2")));
        assert_eq!(result.score(&NoteId::from("n1")), ATTRIBUTE_MATCH_SCORE);
    }

    #[test]
    fn title_exact_match_outscores_partial() {
        let (cache, ctx) = test_ctx();
        seed_two_notes_with_label(&cache);
        let input = NoteSet::from_ids(vec![NoteId::from("n1"), NoteId::from("n2")]);
        let exact = Expression::PropertyComparison {
            property: "title".to_string(),
            op: Op::Eq,
            value: Value::Str("The Hobbit".to_string()),
        };
        let result = evaluate(&exact, &input, &ctx);
        assert_eq!(result.score(&NoteId::from("n2")), TITLE_EXACT_SCORE);

        let partial = Expression::PropertyComparison {
            property: "title".to_string(),
            op: Op::ContainsAll,
            value: Value::Str("hobbit".to_string()),
        };
        let result = evaluate(&partial, &input, &ctx);
        assert_eq!(result.score(&NoteId::from("n2")), TITLE_PARTIAL_SCORE);
    }

    #[test]
    fn not_excludes_matching_notes_and_preserves_score() {
        let (cache, ctx) = test_ctx();
        seed_two_notes_with_label(&cache);
        let mut input = NoteSet::from_ids(vec![NoteId::from("n1"), NoteId::from("n2")]);
        input.add_score(NoteId::from("n2"), 7.0, ctx.config.score_cap);
        let label_attr = Expression::AttributeExists {
            kind: AttributeType::Label,
            name: "author".to_string(),
            negated: false,
        };
        let not_expr = Expression::Not(Box::new(label_attr));
        let result = evaluate(&not_expr, &input, &ctx);
        assert!(!result.contains(&NoteId::from("n1")));
        assert!(result.contains(&NoteId::from("n2")));
        assert_eq!(result.score(&NoteId::from("n2")), 7.0);
    }

    #[test]
    fn or_sums_scores_across_branches_for_overlapping_notes() {
        let (cache, ctx) = test_ctx();
        seed_two_notes_with_label(&cache);
        let input = NoteSet::from_ids(vec![NoteId::from("n1"), NoteId::from("n2")]);
        let left = Expression::LabelComparison {
            name: "author".to_string(),
            op: Op::Eq,
            value: Value::Str("Tolkien".to_string()),
        };
        let right = Expression::PropertyComparison {
            property: "title".to_string(),
            op: Op::ContainsAll,
            value: Value::Str("lord".to_string()),
        };
        let result = evaluate(&Expression::Or(vec![left, right]), &input, &ctx);
        assert_eq!(result.score(&NoteId::from("n1")), ATTRIBUTE_MATCH_SCORE + TITLE_PARTIAL_SCORE);
    }

    #[test]
    fn and_threads_input_and_accumulates_score() {
        let (cache, ctx) = test_ctx();
        seed_two_notes_with_label(&cache);
        let input = NoteSet::from_ids(vec![NoteId::from("n1"), NoteId::from("n2")]);
        let label = Expression::LabelComparison {
            name: "author".to_string(),
            op: Op::Eq,
            value: Value::Str("Tolkien".to_string()),
        };
        let title = Expression::PropertyComparison {
            property: "title".to_string(),
            op: Op::ContainsAll,
            value: Value::Str("lord".to_string()),
        };
        let result = evaluate(&Expression::And(vec![label, title]), &input, &ctx);
        assert_eq!(result.score(&NoteId::from("n1")), ATTRIBUTE_MATCH_SCORE + TITLE_PARTIAL_SCORE);
        assert!(!result.contains(&NoteId::from("n2")));
    }

    #[test]
    fn any_parent_decays_matched_child_score() {
        let (cache, ctx) = test_ctx();
        seed_two_notes_with_label(&cache);
        let input = NoteSet::from_ids(vec![NoteId::from("n1")]);
        let sub = Expression::PropertyComparison {
            property: "title".to_string(),
            op: Op::Eq,
            value: Value::Str("Root".to_string()),
        };
        let result = eval_any_related(&input, &ctx, &sub, |cache, id| {
            cache.parents(id).into_iter().map(|n| n.note_id).collect()
        });
        assert_eq!(result.score(&NoteId::from("n1")), INHERITANCE_DECAY * TITLE_EXACT_SCORE);
    }
}
