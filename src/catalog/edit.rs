//! Incremental edits on a processed graph.
//!
//! Adding a subtree runs the same duplicate, cycle and link checks a full
//! rebuild would, and retries every link that was waiting on one of the new
//! ids. Removal cascades: the subtree leaves the index, its duplicate pairs
//! dissolve, and every link or query that pointed into it is re-validated.

use crate::catalog::identity::NodeId;
use crate::catalog::model::Graph;
use crate::diagnostics::DiagnosticKind;
use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

impl Graph {
    /// Type `record` into a new child of `parent` under collection `key`,
    /// then index it and resolve what it enables.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        key: &str,
        record: &Map<String, Value>,
    ) -> Result<NodeId> {
        let root = self.root_of(parent);
        if !self.states.contains_key(&root) {
            bail!("{parent} is not attached to a loaded catalogue");
        }
        let child = self.attach_record(parent, key, record)?;
        self.add_to_index(root, child);
        Ok(child)
    }

    /// Index the subtree at `node` under the catalogue at `root`.
    ///
    /// Links inside the subtree are resolved (or parked pending); links
    /// elsewhere that waited on an id declared in the subtree are retried.
    pub fn add_to_index(&mut self, root: NodeId, node: NodeId) {
        let subtree: Vec<NodeId> = self.descendants(node).collect();
        let collisions = self.collision_scopes(root);
        for id in &subtree {
            self.index_node(root, *id, &collisions);
        }
        for id in &subtree {
            let kind = self[*id].kind();
            if kind.is_link() && !self.try_resolve(root, *id) {
                self.park(root, *id);
            }
        }
        let declared: Vec<String> = subtree
            .iter()
            .filter_map(|id| self[*id].id().map(str::to_string))
            .collect();
        let scopes = self.dependent_catalogues(root);
        for id in &declared {
            self.retry_pending(&scopes, id);
        }
        for id in &subtree {
            self.refresh_errors(*id);
        }
        self.refresh_stale_queries(&scopes);
        self.invalidate_views(&scopes);
        debug!(catalogue = %root, node = %node, added = subtree.len(), "indexed subtree");
    }

    /// Remove the subtree at `node` from every index, leaving it attached.
    pub fn remove_from_index(&mut self, node: NodeId) {
        let subtree: Vec<NodeId> = self.descendants(node).collect();
        for id in &subtree {
            self.unpark(*id);
            self.unindex_node(*id);
        }
    }

    /// Delete `node` and its subtree, re-validating everything that
    /// referenced it.
    pub fn remove(&mut self, node: NodeId) -> Result<()> {
        let current = self.get(node).ok_or_else(|| anyhow!("{node} does not exist"))?;
        if current.kind().is_root() {
            bail!("{node} is a document root and cannot be removed");
        }
        self.remove_subtree(node);
        Ok(())
    }

    pub(crate) fn remove_subtree(&mut self, node: NodeId) {
        let root = self.root_of(node);
        let subtree: Vec<NodeId> = self.descendants(node).collect();
        let members: HashSet<NodeId> = subtree.iter().copied().collect();

        let mut referrers: Vec<NodeId> = Vec::new();
        let mut queries: Vec<NodeId> = Vec::new();
        for id in &subtree {
            let current = &self[*id];
            referrers.extend(current.refs().iter().filter(|r| !members.contains(*r)));
            queries.extend(current.other_refs().iter().filter(|q| !members.contains(*q)));
        }
        self.remove_from_index(node);
        for id in &subtree {
            self.unbind(*id);
            self.scrub_other_refs(*id);
        }
        for link in &referrers {
            self.unbind(*link);
        }

        self.detach_from_parent(node);
        for id in &subtree {
            self.tombstone(*id);
        }

        for link in referrers {
            if !self.contains(link) {
                continue;
            }
            let scope = self[link].catalogue().unwrap_or_else(|| self.root_of(link));
            if !self.try_resolve(scope, link) {
                self.park(scope, link);
            }
        }
        for query in queries {
            self.refresh_errors(query);
        }
        let scopes = self.dependent_catalogues(root);
        self.invalidate_views(&scopes);
        debug!(catalogue = %root, node = %node, removed = subtree.len(), "removed subtree");
    }

    /// `root` plus every catalogue that imports it.
    pub(crate) fn dependent_catalogues(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = vec![root];
        let mut others: Vec<NodeId> = self
            .states
            .iter()
            .filter(|(doc, state)| **doc != root && state.imports.contains(&root))
            .map(|(doc, _)| *doc)
            .collect();
        others.sort_unstable();
        out.extend(others);
        out
    }

    fn retry_pending(&mut self, scopes: &[NodeId], id: &str) {
        for scope in scopes {
            let waiting = self
                .states
                .get_mut(scope)
                .and_then(|state| state.pending.remove(id))
                .unwrap_or_default();
            for link in waiting {
                if self.contains(link) && !self.try_resolve(*scope, link) {
                    self.park(*scope, link);
                }
            }
        }
    }

    /// Drop `link` from every pending list.
    fn unpark(&mut self, link: NodeId) {
        for state in self.states.values_mut() {
            for waiting in state.pending.values_mut() {
                waiting.retain(|l| *l != link);
            }
            state.pending.retain(|_, waiting| !waiting.is_empty());
        }
    }

    fn scrub_other_refs(&mut self, query: NodeId) {
        if !self[query].kind().is_query() {
            return;
        }
        let Some(child_id) = self[query].attr_str("childId").map(str::to_string) else {
            return;
        };
        let root = self.root_of(query);
        let targets: Vec<NodeId> = self
            .search_scopes(root)
            .into_iter()
            .filter_map(|scope| self.catalogue_state(scope))
            .flat_map(|state| state.index.candidates(&child_id).to_vec())
            .collect();
        for target in targets {
            if let Some(node) = self.get_mut(target) {
                node.other_refs.retain(|q| *q != query);
            }
        }
    }

    /// Re-check queries whose scope or ids failed before an edit.
    fn refresh_stale_queries(&mut self, scopes: &[NodeId]) {
        let stale: Vec<NodeId> = scopes
            .iter()
            .flat_map(|scope| self.descendants(*scope))
            .filter(|id| {
                self[*id].diagnostics().iter().any(|d| {
                    matches!(
                        d.kind,
                        DiagnosticKind::IdNotExist
                            | DiagnosticKind::InvalidScope
                            | DiagnosticKind::MissingProfileType
                    )
                })
            })
            .collect();
        for id in stale {
            self.refresh_errors(id);
        }
    }

    fn invalidate_views(&mut self, scopes: &[NodeId]) {
        for scope in scopes {
            if let Some(state) = self.states.get_mut(scope) {
                state.views = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn removal_dissolves_duplicate_pairs() {
        let mut graph = Graph::new(Settings::editing());
        let root = graph
            .insert_document(
                &json!({"catalogue": {"id": "cat", "name": "Cat", "selectionEntries": [
                    {"id": "x", "name": "A"}
                ]}}),
                None,
            )
            .unwrap();
        graph.process(root).unwrap();
        let first = graph[root].children("selectionEntries")[0];
        let second = graph
            .add_child(root, "selectionEntries", &record(json!({"id": "x", "name": "B"})))
            .unwrap();
        assert_eq!(graph.duplicates_of(first), vec![second]);
        assert_eq!(graph.duplicates_of(second), vec![first]);

        graph.remove(second).unwrap();
        assert!(graph.duplicates_of(first).is_empty());
        assert!(!graph.contains(second));
        assert_eq!(graph[root].children("selectionEntries"), &[first]);
    }

    #[test]
    fn adding_a_target_resolves_waiting_links() {
        let mut graph = Graph::new(Settings::editing());
        let root = graph
            .insert_document(
                &json!({"catalogue": {"id": "cat", "name": "Cat",
                    "entryLinks": [{"id": "l", "name": "L", "targetId": "later", "type": "selectionEntry"}]
                }}),
                None,
            )
            .unwrap();
        graph.process(root).unwrap();
        let link = graph[root].children("entryLinks")[0];
        assert_eq!(graph.catalogue_state(root).unwrap().pending()["later"], vec![link]);

        let entry = graph
            .add_child(
                root,
                "sharedSelectionEntries",
                &record(json!({"id": "later", "name": "Later"})),
            )
            .unwrap();
        assert_eq!(graph[link].target(), Some(entry));
        assert!(graph[link].diagnostics().is_empty());
        assert!(graph.catalogue_state(root).unwrap().pending().is_empty());

        graph.remove(entry).unwrap();
        assert_eq!(graph[link].target(), None);
        assert_eq!(graph[link].diagnostics()[0].kind, DiagnosticKind::UnresolvedLink);
        assert_eq!(graph.catalogue_state(root).unwrap().pending()["later"], vec![link]);
    }

    #[test]
    fn roots_cannot_be_removed() {
        let mut graph = Graph::default();
        let root = graph
            .insert_document(&json!({"gameSystem": {"id": "gs", "name": "GS"}}), None)
            .unwrap();
        assert!(graph.remove(root).is_err());
    }
}
