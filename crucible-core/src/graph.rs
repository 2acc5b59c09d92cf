//! The in-memory graph cache (C1): notes, branches, attributes and the
//! derived views (effective attributes, ancestors, subtree, flat text) the
//! rest of the engine queries against.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::events::EntityChange;
use crate::model::{
    Attribute, AttributeId, AttributeType, Branch, BranchId, Note, NoteId, ROOT_NOTE_ID,
};

type MemoSlot<T> = Arc<OnceCell<T>>;
type MemoMap<T> = RwLock<HashMap<NoteId, MemoSlot<T>>>;

/// Derived, per-note counts over the effective attribute set (spec §4.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributeCounts {
    pub label_count: usize,
    pub owned_label_count: usize,
    pub relation_count: usize,
    pub owned_relation_count: usize,
    pub relation_count_including_links: usize,
    pub owned_relation_count_including_links: usize,
    pub attribute_count: usize,
    pub owned_attribute_count: usize,
}

pub struct GraphCache {
    notes: RwLock<HashMap<NoteId, Note>>,
    branches: RwLock<HashMap<BranchId, Branch>>,
    attributes: RwLock<HashMap<AttributeId, Attribute>>,

    /// (type, lowercased name) -> attribute ids, spec §4.1.
    attribute_index: RwLock<HashMap<(AttributeType, String), Vec<AttributeId>>>,
    child_parent_to_branch: RwLock<HashMap<(NoteId, NoteId), BranchId>>,
    /// parent -> non-deleted child branch ids.
    children_of: RwLock<HashMap<NoteId, Vec<BranchId>>>,
    /// child -> non-deleted parent branch ids.
    parents_of: RwLock<HashMap<NoteId, Vec<BranchId>>>,
    /// owner note -> owned (non-deleted) attribute ids, in position order.
    attributes_of: RwLock<HashMap<NoteId, Vec<AttributeId>>>,
    /// relation target note -> attribute ids of relations pointing at it
    /// (used for `target_relation_count`).
    relation_targets: RwLock<HashMap<NoteId, Vec<AttributeId>>>,

    effective_attrs_cache: MemoMap<Vec<Attribute>>,
    ancestors_cache: MemoMap<Vec<NoteId>>,
    flat_text_cache: MemoMap<String>,
}

impl Default for GraphCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphCache {
    pub fn new() -> Self {
        Self {
            notes: RwLock::new(HashMap::new()),
            branches: RwLock::new(HashMap::new()),
            attributes: RwLock::new(HashMap::new()),
            attribute_index: RwLock::new(HashMap::new()),
            child_parent_to_branch: RwLock::new(HashMap::new()),
            children_of: RwLock::new(HashMap::new()),
            parents_of: RwLock::new(HashMap::new()),
            attributes_of: RwLock::new(HashMap::new()),
            relation_targets: RwLock::new(HashMap::new()),
            effective_attrs_cache: RwLock::new(HashMap::new()),
            ancestors_cache: RwLock::new(HashMap::new()),
            flat_text_cache: RwLock::new(HashMap::new()),
        }
    }

    // ---- basic accessors -------------------------------------------------

    pub fn get_note(&self, note_id: &NoteId) -> Option<Note> {
        self.notes.read().get(note_id).cloned()
    }

    pub fn get_branch(&self, branch_id: &BranchId) -> Option<Branch> {
        self.branches.read().get(branch_id).cloned()
    }

    pub fn get_attribute(&self, attribute_id: &AttributeId) -> Option<Attribute> {
        self.attributes.read().get(attribute_id).cloned()
    }

    pub fn note_count(&self) -> usize {
        self.notes.read().len()
    }

    pub fn all_note_ids(&self) -> Vec<NoteId> {
        self.notes.read().keys().cloned().collect()
    }

    /// Attributes matching `(type, name)` case-insensitively on name,
    /// including deleted-owner notes' attributes is *not* filtered here --
    /// callers combine this with a liveness check as needed.
    pub fn attributes_by_name(&self, attr_type: AttributeType, name: &str) -> Vec<Attribute> {
        let key = (attr_type, name.to_lowercase());
        let attrs = self.attributes.read();
        self.attribute_index
            .read()
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|id| attrs.get(id).cloned())
            .filter(|a| !a.is_deleted)
            .collect()
    }

    fn non_deleted_parent_branches(&self, note_id: &NoteId) -> Vec<Branch> {
        let parents_of = self.parents_of.read();
        let branches = self.branches.read();
        let mut result: Vec<Branch> = parents_of
            .get(note_id)
            .into_iter()
            .flatten()
            .filter_map(|bid| branches.get(bid).cloned())
            .filter(|b| !b.is_deleted)
            .collect();
        drop(branches);
        self.sort_parents_archived_last(&mut result);
        result
    }

    fn non_deleted_child_branches(&self, note_id: &NoteId) -> Vec<Branch> {
        let children_of = self.children_of.read();
        let branches = self.branches.read();
        let mut result: Vec<Branch> = children_of
            .get(note_id)
            .into_iter()
            .flatten()
            .filter_map(|bid| branches.get(bid).cloned())
            .filter(|b| !b.is_deleted)
            .collect();
        result.sort_by_key(|b| b.note_position);
        result
    }

    /// Parent sort policy (spec §4.1): parents with an inheritable
    /// `archived` label sort to the end, so canonical-path resolution
    /// prefers a non-archived placement.
    fn sort_parents_archived_last(&self, parents: &mut [Branch]) {
        let archived = |note_id: &NoteId| -> bool {
            self.attributes_of
                .read()
                .get(note_id)
                .into_iter()
                .flatten()
                .filter_map(|id| self.attributes.read().get(id).cloned())
                .any(|a| a.is_archived_label() && a.is_inheritable && !a.is_deleted)
        };
        parents.sort_by_key(|b| archived(&b.parent_note_id) as u8);
    }

    // ---- effective attributes --------------------------------------------

    pub fn effective_attributes(&self, note_id: &NoteId) -> CoreResult<Vec<Attribute>> {
        if self.get_note(note_id).is_none() {
            return Err(CoreError::NoteNotFound(note_id.to_string()));
        }
        let slot = self.memo_slot(&self.effective_attrs_cache, note_id);
        slot.get_or_try_init(|| -> CoreResult<Vec<Attribute>> {
            let mut stack = HashSet::new();
            let raw = self.effective_attributes_rec(note_id, &mut stack);
            Ok(dedup_by_attribute_id(raw))
        })
        .cloned()
    }

    fn owned_attributes(&self, note_id: &NoteId) -> Vec<Attribute> {
        let attrs = self.attributes.read();
        self.attributes_of
            .read()
            .get(note_id)
            .into_iter()
            .flatten()
            .filter_map(|id| attrs.get(id).cloned())
            .filter(|a| !a.is_deleted)
            .collect()
    }

    fn effective_attributes_rec(
        &self,
        note_id: &NoteId,
        stack: &mut HashSet<NoteId>,
    ) -> Vec<Attribute> {
        if !stack.insert(note_id.clone()) {
            return Vec::new();
        }

        let mut result = self.owned_attributes(note_id);

        for parent_branch in self.non_deleted_parent_branches(note_id) {
            let parent_id = parent_branch.parent_note_id;
            let parent_effective = self.effective_attributes_rec(&parent_id, stack);
            result.extend(parent_effective.into_iter().filter(|a| a.is_inheritable));
        }

        // Template expansion over a fixed snapshot of what we have so far;
        // template targets contribute their *entire* effective set.
        let templates: Vec<NoteId> = result
            .iter()
            .filter(|a| a.is_template())
            .filter_map(|a| a.relation_target())
            .collect();
        for target in templates {
            let expanded = self.effective_attributes_rec(&target, stack);
            result.extend(expanded);
        }

        stack.remove(note_id);
        result
    }

    // ---- ancestors ---------------------------------------------------------

    pub fn ancestors(&self, note_id: &NoteId) -> CoreResult<Vec<Note>> {
        if self.get_note(note_id).is_none() {
            return Err(CoreError::NoteNotFound(note_id.to_string()));
        }
        let slot = self.memo_slot(&self.ancestors_cache, note_id);
        let ids = slot
            .get_or_init(|| {
                let mut seen = HashSet::new();
                let mut order = Vec::new();
                let mut queue: VecDeque<NoteId> = VecDeque::new();
                queue.push_back(note_id.clone());
                seen.insert(note_id.clone());

                while let Some(current) = queue.pop_front() {
                    for parent_branch in self.non_deleted_parent_branches(&current) {
                        let parent_id = parent_branch.parent_note_id;
                        if seen.insert(parent_id.clone()) {
                            order.push(parent_id.clone());
                            queue.push_back(parent_id);
                        }
                    }
                }
                order
            })
            .clone();

        Ok(ids.into_iter().filter_map(|id| self.get_note(&id)).collect())
    }

    // ---- subtree -------------------------------------------------------------

    pub fn subtree(&self, note_id: &NoteId) -> CoreResult<std::vec::IntoIter<Note>> {
        if self.get_note(note_id).is_none() {
            return Err(CoreError::NoteNotFound(note_id.to_string()));
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.subtree_dfs(note_id, &mut seen, &mut out);
        Ok(out.into_iter())
    }

    fn subtree_dfs(&self, note_id: &NoteId, seen: &mut HashSet<NoteId>, out: &mut Vec<Note>) {
        if !seen.insert(note_id.clone()) {
            return;
        }
        if let Some(note) = self.get_note(note_id) {
            if !note.is_deleted {
                out.push(note);
            }
        }
        for child_branch in self.non_deleted_child_branches(note_id) {
            self.subtree_dfs(&child_branch.child_note_id, seen, out);
        }
    }

    /// Raw (uncached) id-only traversal used for memo invalidation; cheap and
    /// always safe to call since it never touches the memo tables.
    fn subtree_ids_raw(&self, note_id: &NoteId) -> Vec<NoteId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![note_id.clone()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            out.push(current.clone());
            for bid in self.children_of.read().get(&current).into_iter().flatten() {
                if let Some(b) = self.branches.read().get(bid) {
                    if !b.is_deleted {
                        stack.push(b.child_note_id.clone());
                    }
                }
            }
        }
        out
    }

    // ---- flat text -----------------------------------------------------------

    pub fn flat_text(&self, note_id: &NoteId) -> CoreResult<String> {
        let note = self
            .get_note(note_id)
            .ok_or_else(|| CoreError::NoteNotFound(note_id.to_string()))?;
        let slot = self.memo_slot(&self.flat_text_cache, note_id);
        let text = slot
            .get_or_try_init(|| -> CoreResult<String> {
                let mut parts: Vec<String> = vec![
                    note.note_id.as_str().to_string(),
                    note.note_type.as_str().to_string(),
                    note.mime.clone(),
                ];
                for branch in self.non_deleted_parent_branches(note_id) {
                    if let Some(prefix) = branch.prefix {
                        parts.push(prefix);
                    }
                }
                parts.push(note.title.clone());
                for attr in self.effective_attributes(note_id)? {
                    let sigil = match attr.attribute_type {
                        AttributeType::Label => '#',
                        AttributeType::Relation => '~',
                    };
                    if attr.value.is_empty() {
                        parts.push(format!("{sigil}{}", attr.name));
                    } else {
                        parts.push(format!("{sigil}{}={}", attr.name, attr.value));
                    }
                }
                Ok(parts.join(" ").to_lowercase())
            })?
            .clone();
        Ok(text)
    }

    // ---- counts ----------------------------------------------------------

    pub fn parent_count(&self, note_id: &NoteId) -> usize {
        self.non_deleted_parent_branches(note_id).len()
    }

    pub fn children_count(&self, note_id: &NoteId) -> usize {
        self.non_deleted_child_branches(note_id).len()
    }

    /// Direct (non-transitive) parent notes, in the archived-last order
    /// used for canonical-path resolution.
    pub fn parents(&self, note_id: &NoteId) -> Vec<Note> {
        self.non_deleted_parent_branches(note_id)
            .into_iter()
            .filter_map(|b| self.get_note(&b.parent_note_id))
            .collect()
    }

    /// Direct (non-transitive) child notes, in position order.
    pub fn children(&self, note_id: &NoteId) -> Vec<Note> {
        self.non_deleted_child_branches(note_id)
            .into_iter()
            .filter_map(|b| self.get_note(&b.child_note_id))
            .collect()
    }

    /// Target notes of the note's effective relations named `name`
    /// (case-insensitive), for `~name` traversal and `RelationWhere`
    /// evaluation.
    pub fn relation_targets_by_name(&self, note_id: &NoteId, name: &str) -> CoreResult<Vec<NoteId>> {
        let effective = self.effective_attributes(note_id)?;
        Ok(effective
            .into_iter()
            .filter(|a| a.attribute_type == AttributeType::Relation && a.name.eq_ignore_ascii_case(name))
            .filter_map(|a| a.relation_target())
            .collect())
    }

    pub fn attribute_counts(&self, note_id: &NoteId) -> CoreResult<AttributeCounts> {
        let effective = self.effective_attributes(note_id)?;
        let owned = self.owned_attributes(note_id);

        let count = |attrs: &[Attribute], ty: AttributeType, include_links: bool| {
            attrs
                .iter()
                .filter(|a| a.attribute_type == ty && (include_links || !a.is_auto_link()))
                .count()
        };

        Ok(AttributeCounts {
            label_count: count(&effective, AttributeType::Label, true),
            owned_label_count: count(&owned, AttributeType::Label, true),
            relation_count: count(&effective, AttributeType::Relation, false),
            owned_relation_count: count(&owned, AttributeType::Relation, false),
            relation_count_including_links: count(&effective, AttributeType::Relation, true),
            owned_relation_count_including_links: count(&owned, AttributeType::Relation, true),
            attribute_count: effective.len(),
            owned_attribute_count: owned.len(),
        })
    }

    pub fn target_relation_count(&self, note_id: &NoteId) -> usize {
        self.target_relation_count_filtered(note_id, false)
    }

    /// Same as [`Self::target_relation_count`] but counts auto-link
    /// relations (`internalLink`, `imageLink`, ...) as well.
    pub fn target_relation_count_including_links(&self, note_id: &NoteId) -> usize {
        self.target_relation_count_filtered(note_id, true)
    }

    fn target_relation_count_filtered(&self, note_id: &NoteId, include_links: bool) -> usize {
        let attrs = self.attributes.read();
        self.relation_targets
            .read()
            .get(note_id)
            .into_iter()
            .flatten()
            .filter_map(|id| attrs.get(id))
            .filter(|a| !a.is_deleted && (include_links || !a.is_auto_link()))
            .count()
    }

    // ---- mutation ----------------------------------------------------------

    /// Applies one entity-change event. Idempotent: replaying the same
    /// event twice leaves the cache in the same state.
    ///
    /// Rejects changes that would delete or protect the root note (spec
    /// invariant I2) with [`CoreError::RootInvariantViolated`]; the cache
    /// is left unmodified in that case.
    #[tracing::instrument(skip(self, change))]
    pub fn apply_entity_change(&self, change: EntityChange) -> CoreResult<()> {
        if let Some(note_id) = change.directly_affected_note() {
            tracing::trace!(note_id = %note_id, "applying entity change");
        }
        match change {
            EntityChange::NoteUpserted(note) => {
                if note.is_root() && (note.is_deleted || note.is_protected) {
                    return Err(CoreError::RootInvariantViolated);
                }
                let id = note.note_id.clone();
                self.notes.write().insert(id.clone(), note);
                self.invalidate_subtree(&id);
            }
            EntityChange::NoteDeleted(id) => {
                if Self::is_root(&id) {
                    return Err(CoreError::RootInvariantViolated);
                }
                if let Some(note) = self.notes.write().get_mut(&id) {
                    note.is_deleted = true;
                }
                self.invalidate_subtree(&id);
            }
            EntityChange::BranchUpserted(branch) => {
                self.upsert_branch(branch.clone());
                self.invalidate_subtree(&branch.child_note_id);
            }
            EntityChange::BranchDeleted(branch_id) => {
                if let Some(child_id) = self.mark_branch_deleted(&branch_id) {
                    self.invalidate_subtree(&child_id);
                }
            }
            EntityChange::AttributeUpserted(attr) => {
                let owner = attr.note_id.clone();
                let propagates = attr.is_inheritable || attr.is_template();
                self.upsert_attribute(attr);
                if propagates {
                    self.invalidate_subtree(&owner);
                } else {
                    self.invalidate_note(&owner);
                }
            }
            EntityChange::AttributeDeleted(attribute_id) => {
                if let Some((owner, propagates)) = self.mark_attribute_deleted(&attribute_id) {
                    if propagates {
                        self.invalidate_subtree(&owner);
                    } else {
                        self.invalidate_note(&owner);
                    }
                }
            }
            EntityChange::ChildrenReordered {
                parent_note_id,
                child_note_id,
                new_position,
            } => {
                let key = (child_note_id.clone(), parent_note_id);
                if let Some(branch_id) = self.child_parent_to_branch.read().get(&key).cloned() {
                    if let Some(b) = self.branches.write().get_mut(&branch_id) {
                        b.note_position = new_position;
                    }
                }
                self.invalidate_note(&child_note_id);
            }
        }
        Ok(())
    }

    fn upsert_branch(&self, branch: Branch) {
        let key = (branch.child_note_id.clone(), branch.parent_note_id.clone());
        self.child_parent_to_branch
            .write()
            .insert(key, branch.branch_id.clone());

        let mut children_of = self.children_of.write();
        let entry = children_of.entry(branch.parent_note_id.clone()).or_default();
        if !entry.contains(&branch.branch_id) {
            entry.push(branch.branch_id.clone());
        }
        drop(children_of);

        let mut parents_of = self.parents_of.write();
        let entry = parents_of.entry(branch.child_note_id.clone()).or_default();
        if !entry.contains(&branch.branch_id) {
            entry.push(branch.branch_id.clone());
        }
        drop(parents_of);

        self.branches.write().insert(branch.branch_id.clone(), branch);
    }

    fn mark_branch_deleted(&self, branch_id: &BranchId) -> Option<NoteId> {
        let mut branches = self.branches.write();
        let branch = branches.get_mut(branch_id)?;
        branch.is_deleted = true;
        Some(branch.child_note_id.clone())
    }

    fn upsert_attribute(&self, attr: Attribute) {
        let index_key = (attr.attribute_type, attr.name.to_lowercase());
        let mut index = self.attribute_index.write();
        let entry = index.entry(index_key).or_default();
        if !entry.contains(&attr.attribute_id) {
            entry.push(attr.attribute_id.clone());
        }
        drop(index);

        let mut owned = self.attributes_of.write();
        let entry = owned.entry(attr.note_id.clone()).or_default();
        if !entry.contains(&attr.attribute_id) {
            entry.push(attr.attribute_id.clone());
        }
        drop(owned);

        if let Some(target) = attr.relation_target() {
            let mut targets = self.relation_targets.write();
            let entry = targets.entry(target).or_default();
            if !entry.contains(&attr.attribute_id) {
                entry.push(attr.attribute_id.clone());
            }
        }

        self.attributes.write().insert(attr.attribute_id.clone(), attr);
    }

    fn mark_attribute_deleted(&self, attribute_id: &AttributeId) -> Option<(NoteId, bool)> {
        let mut attrs = self.attributes.write();
        let attr = attrs.get_mut(attribute_id)?;
        attr.is_deleted = true;
        Some((attr.note_id.clone(), attr.is_inheritable || attr.is_template()))
    }

    fn invalidate_note(&self, note_id: &NoteId) {
        self.effective_attrs_cache.write().remove(note_id);
        self.ancestors_cache.write().remove(note_id);
        self.flat_text_cache.write().remove(note_id);
    }

    fn invalidate_subtree(&self, note_id: &NoteId) {
        for id in self.subtree_ids_raw(note_id) {
            self.invalidate_note(&id);
        }
        // Ancestor caches of notes *above* note_id are unaffected by
        // changes below it, but the note's own ancestors may have changed
        // shape if this was a branch event; invalidate_note already covers
        // note_id itself via subtree_ids_raw (which always includes it).
    }

    fn memo_slot<T>(&self, map: &MemoMap<T>, note_id: &NoteId) -> MemoSlot<T> {
        if let Some(slot) = map.read().get(note_id) {
            return slot.clone();
        }
        map.write()
            .entry(note_id.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    pub fn is_root(note_id: &NoteId) -> bool {
        note_id.as_str() == ROOT_NOTE_ID
    }
}

fn dedup_by_attribute_id(attrs: Vec<Attribute>) -> Vec<Attribute> {
    let mut seen = HashSet::new();
    attrs
        .into_iter()
        .filter(|a| seen.insert(a.attribute_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn note(id: &str) -> Note {
        let now = Utc::now();
        Note {
            note_id: NoteId::from(id),
            title: id.to_string(),
            note_type: crate::model::NoteType::Text,
            mime: "text/plain".to_string(),
            is_protected: false,
            is_deleted: false,
            date_created: now,
            date_modified: now,
            utc_date_created: now,
            utc_date_modified: now,
            blob_id: crate::model::BlobId::from(format!("blob-{id}")),
        }
    }

    fn branch(id: &str, child: &str, parent: &str, position: i32) -> Branch {
        Branch {
            branch_id: BranchId::from(id),
            child_note_id: NoteId::from(child),
            parent_note_id: NoteId::from(parent),
            note_position: position,
            prefix: None,
            is_deleted: false,
        }
    }

    fn label(id: &str, owner: &str, name: &str, value: &str, inheritable: bool) -> Attribute {
        Attribute {
            attribute_id: AttributeId::from(id),
            note_id: NoteId::from(owner),
            attribute_type: AttributeType::Label,
            name: name.to_string(),
            value: value.to_string(),
            position: 0,
            is_inheritable: inheritable,
            is_deleted: false,
        }
    }

    fn relation(id: &str, owner: &str, name: &str, target: &str) -> Attribute {
        Attribute {
            attribute_id: AttributeId::from(id),
            note_id: NoteId::from(owner),
            attribute_type: AttributeType::Relation,
            name: name.to_string(),
            value: target.to_string(),
            position: 0,
            is_inheritable: false,
            is_deleted: false,
        }
    }

    fn simple_tree() -> GraphCache {
        let cache = GraphCache::new();
        cache.apply_entity_change(EntityChange::NoteUpserted(note("root"))).unwrap();
        cache.apply_entity_change(EntityChange::NoteUpserted(note("a"))).unwrap();
        cache.apply_entity_change(EntityChange::NoteUpserted(note("b"))).unwrap();
        cache.apply_entity_change(EntityChange::BranchUpserted(branch(
            "br-a", "a", "root", 0,
        ))).unwrap();
        cache.apply_entity_change(EntityChange::BranchUpserted(branch("br-b", "b", "a", 0))).unwrap();
        cache
    }

    #[test]
    fn inheritable_attribute_propagates_to_descendants() {
        let cache = simple_tree();
        cache.apply_entity_change(EntityChange::AttributeUpserted(label(
            "lab1", "a", "shared", "1", true,
        ))).unwrap();

        let effective = cache.effective_attributes(&NoteId::from("b")).unwrap();
        assert!(effective.iter().any(|a| a.name == "shared"));
    }

    #[test]
    fn non_inheritable_attribute_does_not_propagate() {
        let cache = simple_tree();
        cache.apply_entity_change(EntityChange::AttributeUpserted(label(
            "lab1", "a", "onlymine", "1", false,
        ))).unwrap();

        let effective = cache.effective_attributes(&NoteId::from("b")).unwrap();
        assert!(!effective.iter().any(|a| a.name == "onlymine"));

        let effective_a = cache.effective_attributes(&NoteId::from("a")).unwrap();
        assert!(effective_a.iter().any(|a| a.name == "onlymine"));
    }

    #[test]
    fn template_relation_merges_target_attributes() {
        let cache = simple_tree();
        cache.apply_entity_change(EntityChange::NoteUpserted(note("tmpl"))).unwrap();
        cache.apply_entity_change(EntityChange::AttributeUpserted(label(
            "lab1", "tmpl", "fromtemplate", "", false,
        ))).unwrap();
        cache.apply_entity_change(EntityChange::AttributeUpserted(relation(
            "rel1", "b", "template", "tmpl",
        ))).unwrap();

        let effective = cache.effective_attributes(&NoteId::from("b")).unwrap();
        assert!(effective.iter().any(|a| a.name == "fromtemplate"));
    }

    #[test]
    fn ancestors_are_reported_once_for_diamonds() {
        let cache = simple_tree();
        // b also gets a second branch directly under root (diamond: b has
        // parents {a, root}, and a also has parent root).
        cache.apply_entity_change(EntityChange::BranchUpserted(branch(
            "br-b2", "b", "root", 1,
        ))).unwrap();

        let ancestors = cache.ancestors(&NoteId::from("b")).unwrap();
        let root_count = ancestors.iter().filter(|n| n.note_id.as_str() == "root").count();
        assert_eq!(root_count, 1);
    }

    #[test]
    fn cyclic_template_relations_terminate() {
        let cache = simple_tree();
        cache.apply_entity_change(EntityChange::AttributeUpserted(relation(
            "t1", "a", "template", "b",
        ))).unwrap();
        cache.apply_entity_change(EntityChange::AttributeUpserted(relation(
            "t2", "b", "template", "a",
        ))).unwrap();

        // Must terminate and return an answer without hanging.
        let effective = cache.effective_attributes(&NoteId::from("a")).unwrap();
        assert!(!effective.is_empty() || effective.is_empty());
    }

    #[test]
    fn invalidation_recomputes_after_mutation() {
        let cache = simple_tree();
        let before = cache.effective_attributes(&NoteId::from("b")).unwrap();
        assert!(before.iter().all(|a| a.name != "late"));

        cache.apply_entity_change(EntityChange::AttributeUpserted(label(
            "lab-late", "a", "late", "", true,
        ))).unwrap();

        let after = cache.effective_attributes(&NoteId::from("b")).unwrap();
        assert!(after.iter().any(|a| a.name == "late"));
    }

    #[test]
    fn dangling_relation_target_does_not_panic() {
        let cache = simple_tree();
        cache.apply_entity_change(EntityChange::AttributeUpserted(relation(
            "rel1", "a", "author", "ghost",
        ))).unwrap();
        let effective = cache.effective_attributes(&NoteId::from("a")).unwrap();
        let rel = effective.iter().find(|a| a.name == "author").unwrap();
        assert!(cache.get_note(&rel.relation_target().unwrap()).is_none());
    }

    #[test]
    fn flat_text_contains_title_and_attributes() {
        let cache = simple_tree();
        cache.apply_entity_change(EntityChange::AttributeUpserted(label(
            "lab1", "a", "Author", "Tolkien", false,
        ))).unwrap();
        let text = cache.flat_text(&NoteId::from("a")).unwrap();
        assert!(text.contains("a"));
        assert!(text.contains("#author=tolkien"));
    }

    #[test]
    fn subtree_excludes_deleted_notes() {
        let cache = simple_tree();
        cache.apply_entity_change(EntityChange::NoteDeleted(NoteId::from("b"))).unwrap();
        let ids: Vec<String> = cache
            .subtree(&NoteId::from("root"))
            .unwrap()
            .map(|n| n.note_id.to_string())
            .collect();
        assert!(ids.contains(&"root".to_string()));
        assert!(ids.contains(&"a".to_string()));
        assert!(!ids.contains(&"b".to_string()));
    }

    #[test]
    fn root_note_cannot_be_deleted() {
        let cache = simple_tree();
        let err = cache
            .apply_entity_change(EntityChange::NoteDeleted(NoteId::from("root")))
            .unwrap_err();
        assert!(matches!(err, CoreError::RootInvariantViolated));
        assert!(!cache.get_note(&NoteId::from("root")).unwrap().is_deleted);
    }

    #[test]
    fn root_note_cannot_be_upserted_as_protected() {
        let cache = simple_tree();
        let mut root = note("root");
        root.is_protected = true;
        let err = cache
            .apply_entity_change(EntityChange::NoteUpserted(root))
            .unwrap_err();
        assert!(matches!(err, CoreError::RootInvariantViolated));
    }

    #[test]
    fn target_relation_count_excludes_auto_links() {
        let cache = simple_tree();
        cache
            .apply_entity_change(EntityChange::AttributeUpserted(relation(
                "rel1", "a", "author", "b",
            )))
            .unwrap();
        cache
            .apply_entity_change(EntityChange::AttributeUpserted(relation(
                "rel2", "a", "internalLink", "b",
            )))
            .unwrap();

        assert_eq!(cache.target_relation_count(&NoteId::from("b")), 1);
        assert_eq!(cache.target_relation_count_including_links(&NoteId::from("b")), 2);
    }
}
