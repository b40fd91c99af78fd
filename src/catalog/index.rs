//! Id index and duplicate detection.
//!
//! Each catalogue keeps a multimap from id to every node declaring it, so a
//! duplicate never hides its twin and removing one node leaves the other
//! addressable. Lookups prefer a non-link candidate: links commonly reuse
//! the id of the thing they point at.
//!
//! Duplicates are checked against the catalogue itself, its import set and
//! every catalogue importing it, so a rebuild or an incremental add on either
//! side of an import finds the same pairs.
//! When [`Settings::global_duplicate_check`](crate::Settings) is on, every
//! indexed node also goes into a session-wide index and collisions with
//! unrelated catalogues are reported too.

use crate::catalog::identity::NodeId;
use crate::catalog::model::Graph;
use crate::diagnostics::{self, Diagnostic, DiagnosticKind};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Clone, Debug, Default)]
/// Multimap from declared id to nodes, in insertion order.
pub struct IdIndex {
    by_id: HashMap<String, Vec<NodeId>>,
}

impl IdIndex {
    pub fn insert(&mut self, id: &str, node: NodeId) {
        let slot = self.by_id.entry(id.to_string()).or_default();
        if !slot.contains(&node) {
            slot.push(node);
        }
    }

    pub fn remove(&mut self, id: &str, node: NodeId) {
        if let Some(slot) = self.by_id.get_mut(id) {
            slot.retain(|n| *n != node);
            if slot.is_empty() {
                self.by_id.remove(id);
            }
        }
    }

    /// Every node registered under `id`.
    pub fn candidates(&self, id: &str) -> &[NodeId] {
        self.by_id.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Preferred node for `id`: the first non-link, else the first link.
    pub fn lookup(&self, graph: &Graph, id: &str) -> Option<NodeId> {
        let candidates = self.candidates(id);
        candidates
            .iter()
            .copied()
            .find(|n| graph.get(*n).is_some_and(|node| !node.kind().is_link()))
            .or_else(|| candidates.first().copied())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
    }

    /// Indexed ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_id.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Graph {
    /// Rebuild the index of the document at `root` from scratch.
    ///
    /// Sets each node's catalogue back-pointer and records a duplicate pair
    /// on both nodes for every collision inside the catalogue, with its
    /// imports, with catalogues importing it, or (when enabled) with any
    /// other catalogue in the session.
    pub fn index_all(&mut self, root: NodeId) {
        let nodes: Vec<NodeId> = self.descendants(root).collect();
        for node in &nodes {
            self.unindex_node(*node);
        }
        if let Some(state) = self.states.get_mut(&root) {
            state.index.clear();
        }
        let scopes = self.collision_scopes(root);
        for node in nodes {
            self.index_node(root, node, &scopes);
        }
        debug!(
            catalogue = %root,
            ids = self.catalogue_state(root).map_or(0, |s| s.index.len()),
            "indexed catalogue"
        );
    }

    /// Catalogues other than `root` whose ids can collide with its own: the
    /// import set, then every catalogue that imports `root`.
    pub(crate) fn collision_scopes(&self, root: NodeId) -> Vec<NodeId> {
        let mut scopes = self
            .catalogue_state(root)
            .map(|state| state.imports.clone())
            .unwrap_or_default();
        for dependent in self.dependent_catalogues(root) {
            if dependent != root && !scopes.contains(&dependent) {
                scopes.push(dependent);
            }
        }
        scopes
    }

    /// Register `node` (not its subtree) in the index of `root`, pairing it
    /// with same-id nodes in `root` and in `scopes`.
    pub(crate) fn index_node(&mut self, root: NodeId, node: NodeId, scopes: &[NodeId]) {
        let Some(current) = self.get_mut(node) else {
            return;
        };
        current.catalogue = Some(root);
        let Some(id) = current.id().map(str::to_string) else {
            return;
        };

        let mut colliders: Vec<NodeId> = Vec::new();
        for scope in std::iter::once(&root).chain(scopes) {
            if let Some(state) = self.states.get(scope) {
                colliders.extend_from_slice(state.index.candidates(&id));
            }
        }
        let global = self.settings().global_duplicate_check;
        if global {
            colliders.extend_from_slice(self.session_index.candidates(&id));
        }

        if let Some(state) = self.states.get_mut(&root) {
            state.index.insert(&id, node);
        }
        if global {
            self.session_index.insert(&id, node);
        }

        colliders.sort_unstable();
        colliders.dedup();
        for other in colliders {
            if other != node && self.must_be_unique(node, other) {
                self.pair_duplicate(node, other, &id);
            }
        }
    }

    fn must_be_unique(&self, a: NodeId, b: NodeId) -> bool {
        let unique = |id: NodeId| self.get(id).is_some_and(|n| n.kind().requires_unique_id());
        unique(a) || unique(b)
    }

    /// Record a duplicate pair on both nodes in one step.
    fn pair_duplicate(&mut self, a: NodeId, b: NodeId, id: &str) {
        let label = |graph: &Graph, n: NodeId| {
            let node = &graph[n];
            format!("{} '{}'", node.kind(), node.name().unwrap_or(id))
        };
        let (label_a, label_b) = (label(self, a), label(self, b));
        warn!(id, first = %a, second = %b, "duplicate id");
        if let Some(node) = self.get_mut(a) {
            let detail = format!("id '{id}' is also declared by {label_b}");
            diagnostics::upsert(
                &mut node.diagnostics,
                Diagnostic::new(DiagnosticKind::DuplicateId, detail).with_other(b),
            );
        }
        if let Some(node) = self.get_mut(b) {
            let detail = format!("id '{id}' is also declared by {label_a}");
            diagnostics::upsert(
                &mut node.diagnostics,
                Diagnostic::new(DiagnosticKind::DuplicateId, detail).with_other(a),
            );
        }
    }

    /// Drop `node` from every index and dissolve its duplicate pairs.
    pub(crate) fn unindex_node(&mut self, node: NodeId) {
        let Some(current) = self.get_mut(node) else {
            return;
        };
        let catalogue = current.catalogue.take();
        let id = current.id().map(str::to_string);
        let partners: Vec<NodeId> = current
            .diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::DuplicateId)
            .filter_map(|d| d.other)
            .collect();
        diagnostics::clear_kind(&mut current.diagnostics, DiagnosticKind::DuplicateId);

        for partner in partners {
            if let Some(other) = self.get_mut(partner) {
                other
                    .diagnostics
                    .retain(|d| !(d.kind == DiagnosticKind::DuplicateId && d.other == Some(node)));
            }
        }
        if let Some(id) = id {
            if let Some(state) = catalogue.and_then(|root| self.states.get_mut(&root)) {
                state.index.remove(&id, node);
            }
            self.session_index.remove(&id, node);
        }
    }

    /// Every node declaring `id` in the catalogue at `root`, its imports
    /// included, in resolution order.
    pub fn nodes_with_id(&self, root: NodeId, id: &str) -> Vec<NodeId> {
        let Some(state) = self.states.get(&root) else {
            return Vec::new();
        };
        let mut out = state.index.candidates(id).to_vec();
        for import in &state.imports {
            if let Some(imported) = self.states.get(import) {
                out.extend_from_slice(imported.index.candidates(id));
            }
        }
        out
    }

    /// Duplicate partners currently recorded on `node`.
    pub fn duplicates_of(&self, node: NodeId) -> Vec<NodeId> {
        self.get(node)
            .map(|n| {
                n.diagnostics()
                    .iter()
                    .filter(|d| d.kind == DiagnosticKind::DuplicateId)
                    .filter_map(|d| d.other)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use serde_json::json;

    fn catalogue(entries: serde_json::Value) -> serde_json::Value {
        json!({"catalogue": {"id": "cat", "name": "Cat", "selectionEntries": entries}})
    }

    #[test]
    fn duplicate_ids_are_paired_on_both_nodes() {
        let mut graph = Graph::default();
        let root = graph
            .insert_document(
                &catalogue(json!([
                    {"id": "x", "name": "First"},
                    {"id": "x", "name": "Second"},
                    {"id": "y", "name": "Third"}
                ])),
                None,
            )
            .unwrap();
        graph.index_all(root);
        let entries = graph[root].children("selectionEntries").to_vec();
        assert_eq!(graph.duplicates_of(entries[0]), vec![entries[1]]);
        assert_eq!(graph.duplicates_of(entries[1]), vec![entries[0]]);
        assert!(graph.duplicates_of(entries[2]).is_empty());
        let state = graph.catalogue_state(root).unwrap();
        assert_eq!(state.index().candidates("x"), &entries[..2]);
        assert_eq!(graph[entries[2]].catalogue(), Some(root));
    }

    #[test]
    fn reindexing_does_not_stack_pairs() {
        let mut graph = Graph::default();
        let root = graph
            .insert_document(
                &catalogue(json!([{"id": "x", "name": "A"}, {"id": "x", "name": "B"}])),
                None,
            )
            .unwrap();
        graph.index_all(root);
        graph.index_all(root);
        let first = graph[root].children("selectionEntries")[0];
        assert_eq!(graph[first].diagnostics().len(), 1);
    }

    #[test]
    fn lookup_prefers_non_links() {
        let mut graph = Graph::default();
        let root = graph
            .insert_document(
                &json!({"catalogue": {
                    "id": "cat", "name": "Cat",
                    "entryLinks": [{"id": "e", "name": "L", "targetId": "e"}],
                    "sharedSelectionEntries": [{"id": "e", "name": "E"}]
                }}),
                None,
            )
            .unwrap();
        graph.index_all(root);
        let entry = graph[root].children("sharedSelectionEntries")[0];
        let link = graph[root].children("entryLinks")[0];
        let state = graph.catalogue_state(root).unwrap();
        assert_eq!(state.index().lookup(&graph, "e"), Some(entry));
        // An entry sharing its link's id is still a collision of a unique kind.
        assert_eq!(graph.duplicates_of(link), vec![entry]);
    }

    #[test]
    fn global_check_spans_unrelated_catalogues() {
        let mut graph = Graph::new(Settings {
            global_duplicate_check: true,
            ..Settings::default()
        });
        let a = graph
            .insert_document(&catalogue(json!([{"id": "x", "name": "A"}])), None)
            .unwrap();
        let b = graph
            .insert_document(
                &json!({"catalogue": {"id": "other", "name": "Other",
                    "selectionEntries": [{"id": "x", "name": "B"}]}}),
                None,
            )
            .unwrap();
        graph.index_all(a);
        graph.index_all(b);
        let first = graph[a].children("selectionEntries")[0];
        let second = graph[b].children("selectionEntries")[0];
        assert_eq!(graph.duplicates_of(first), vec![second]);

        let mut scoped = Graph::default();
        let a = scoped
            .insert_document(&catalogue(json!([{"id": "x", "name": "A"}])), None)
            .unwrap();
        let b = scoped
            .insert_document(
                &json!({"catalogue": {"id": "other", "name": "Other",
                    "selectionEntries": [{"id": "x", "name": "B"}]}}),
                None,
            )
            .unwrap();
        scoped.index_all(a);
        scoped.index_all(b);
        let first = scoped[a].children("selectionEntries")[0];
        assert!(scoped.duplicates_of(first).is_empty());
    }
}
