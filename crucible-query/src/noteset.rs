//! `NoteSet`: a set of `noteId`s with per-note accumulated scores, the
//! value that flows between expression nodes (spec §4.5, §GLOSSARY).

use std::collections::HashMap;

use crucible_core::NoteId;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteSet {
    scores: HashMap<NoteId, f64>,
}

impl NoteSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_ids<I: IntoIterator<Item = NoteId>>(ids: I) -> Self {
        Self {
            scores: ids.into_iter().map(|id| (id, 0.0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn contains(&self, id: &NoteId) -> bool {
        self.scores.contains_key(id)
    }

    pub fn score(&self, id: &NoteId) -> f64 {
        self.scores.get(id).copied().unwrap_or(0.0)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NoteId> {
        self.scores.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NoteId, &f64)> {
        self.scores.iter()
    }

    /// Adds `delta` to `id`'s score (inserting it if absent), capped at
    /// `cap` (spec §4.5 "Deduplication").
    pub fn add_score(&mut self, id: NoteId, delta: f64, cap: f64) {
        let entry = self.scores.entry(id).or_insert(0.0);
        *entry = (*entry + delta).min(cap);
    }

    /// `OrExp`: every note from either side is kept; a note present on
    /// both sides accumulates both scores (capped).
    pub fn union(mut self, other: Self, cap: f64) -> Self {
        for (id, score) in other.scores {
            self.add_score(id, score, cap);
        }
        self
    }

    /// `NotExp`: notes of `self` that do not appear in `exclude`, keeping
    /// `self`'s scores.
    pub fn difference(&self, exclude: &Self) -> Self {
        Self {
            scores: self
                .scores
                .iter()
                .filter(|(id, _)| !exclude.contains(id))
                .map(|(id, s)| (id.clone(), *s))
                .collect(),
        }
    }

    /// Retains only the ids present in `keep`, discarding `self`'s scores
    /// in favor of `keep`'s (used when a node filters the input set and
    /// assigns its own match score).
    pub fn restrict_to(&self, keep: &Self) -> Self {
        Self {
            scores: keep
                .scores
                .iter()
                .filter(|(id, _)| self.contains(id))
                .map(|(id, s)| (id.clone(), *s))
                .collect(),
        }
    }
}
