//! Scoped query language of constraints, conditions and modifiers.
//!
//! A query names a scope (a keyword such as `parent` or `roster`, or a node
//! id), a field to count and a childId to count. This module resolves scope
//! tokens; [`bounds`] estimates how many of an entry may be taken,
//! [`describe`] renders queries as text and [`affects`] handles the dotted
//! `affects` expressions carried by modifiers.

pub mod affects;
pub mod bounds;
pub mod describe;

use crate::catalog::identity::NodeId;
use crate::catalog::model::Graph;
use crate::catalog::traverse::Capabilities;
use std::collections::{HashSet, VecDeque};
use std::fmt;

pub use affects::{AffectsDomain, AffectsError, AffectsQuery, AffectsSelector};
pub use bounds::{Bound, MaxEstimate};

/// Scope keywords; every keyword is valid wherever a scope is accepted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ScopeKeyword {
    SelfScope,
    Parent,
    Force,
    Roster,
    Ancestor,
    PrimaryCategory,
    PrimaryCatalogue,
    RootEntry,
    Unit,
    Model,
    Upgrade,
    ModelOrUnit,
}

impl ScopeKeyword {
    pub const ALL: [ScopeKeyword; 12] = [
        ScopeKeyword::SelfScope,
        ScopeKeyword::Parent,
        ScopeKeyword::Force,
        ScopeKeyword::Roster,
        ScopeKeyword::Ancestor,
        ScopeKeyword::PrimaryCategory,
        ScopeKeyword::PrimaryCatalogue,
        ScopeKeyword::RootEntry,
        ScopeKeyword::Unit,
        ScopeKeyword::Model,
        ScopeKeyword::Upgrade,
        ScopeKeyword::ModelOrUnit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScopeKeyword::SelfScope => "self",
            ScopeKeyword::Parent => "parent",
            ScopeKeyword::Force => "force",
            ScopeKeyword::Roster => "roster",
            ScopeKeyword::Ancestor => "ancestor",
            ScopeKeyword::PrimaryCategory => "primary-category",
            ScopeKeyword::PrimaryCatalogue => "primary-catalogue",
            ScopeKeyword::RootEntry => "root-entry",
            ScopeKeyword::Unit => "unit",
            ScopeKeyword::Model => "model",
            ScopeKeyword::Upgrade => "upgrade",
            ScopeKeyword::ModelOrUnit => "model-or-unit",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == token)
    }
}

impl fmt::Display for ScopeKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved scope token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope {
    Keyword(ScopeKeyword),
    /// A force, category or catalogue in scope, or an owning/referencing
    /// ancestor of the query.
    Node(NodeId),
}

/// Fields that count selections or forces rather than a named value.
pub fn is_count_field(field: &str) -> bool {
    matches!(field, "selections" | "forces")
}

impl Graph {
    /// Resolve `token` relative to `node`.
    ///
    /// Keywords always resolve. An id resolves in two ways:
    ///
    /// - to any force, category or catalogue visible from the node's
    ///   catalogue (its own index, then its imports). This node does not
    ///   have to enclose `node`: units name their categories through
    ///   category links, which are children rather than ancestors;
    /// - failing that, to any node found by a breadth-first walk over owning
    ///   parents and link back-references, matched on its id or, for a
    ///   link, its target id.
    pub fn resolve_scope(&self, node: NodeId, token: &str) -> Option<Scope> {
        if let Some(keyword) = ScopeKeyword::parse(token) {
            return Some(Scope::Keyword(keyword));
        }
        if token.is_empty() || !self.contains(node) {
            return None;
        }
        let root = self[node].catalogue().unwrap_or_else(|| self.root_of(node));
        let container = Capabilities::FORCE | Capabilities::CATEGORY | Capabilities::CATALOGUE;
        if let Some(found) = self.find_option_by_id(root, token) {
            if self.capabilities(found).intersects(container) {
                return Some(Scope::Node(found));
            }
        }
        self.referenced_ancestor(node, token).map(Scope::Node)
    }

    pub fn scope_is_valid(&self, node: NodeId, token: &str) -> bool {
        self.resolve_scope(node, token).is_some()
    }

    /// Breadth-first walk over `parent` and `refs` from `node` for a node
    /// declaring `id`; a link also matches on its target id.
    fn referenced_ancestor(&self, node: NodeId, id: &str) -> Option<NodeId> {
        let mut visited: HashSet<NodeId> = HashSet::from([node]);
        let mut queue: VecDeque<NodeId> = VecDeque::from([node]);
        while let Some(current) = queue.pop_front() {
            let Some(current) = self.get(current) else {
                continue;
            };
            for next in current.parent().into_iter().chain(current.refs().iter().copied()) {
                if !visited.insert(next) {
                    continue;
                }
                let candidate = &self[next];
                let link_match = candidate.kind().is_link() && candidate.target_id() == Some(id);
                if candidate.id() == Some(id) || link_match {
                    return Some(next);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// Human-readable text for a query token: keywords as written, count
    /// fields as nothing, ids as the name of the node they name.
    pub fn token_name(&self, node: NodeId, token: &str) -> String {
        if is_count_field(token) {
            return String::new();
        }
        if ScopeKeyword::parse(token).is_some() || !self.contains(node) {
            return token.to_string();
        }
        let root = self[node].catalogue().unwrap_or_else(|| self.root_of(node));
        self.find_option_by_id(root, token)
            .or_else(|| self.referenced_ancestor(node, token))
            .map(|found| self.display_name(found))
            .filter(|name| !name.is_empty())
            .unwrap_or(token)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use serde_json::json;

    fn graph() -> (Graph, NodeId) {
        let mut graph = Graph::new(Settings::editing());
        let root = graph
            .insert_document(
                &json!({"catalogue": {
                    "id": "cat", "name": "Cat",
                    "categoryEntries": [{"id": "hq", "name": "HQ"}],
                    "selectionEntries": [{
                        "id": "unit", "name": "Squad", "type": "unit",
                        "entryLinks": [{"id": "l", "name": "Gear", "targetId": "gear", "type": "selectionEntry"}]
                    }],
                    "sharedSelectionEntries": [{
                        "id": "gear", "name": "Gear", "type": "upgrade",
                        "constraints": [
                            {"id": "c1", "type": "max", "value": 1, "field": "selections", "scope": "unit"},
                            {"id": "c2", "type": "max", "value": 1, "field": "selections", "scope": "hq"},
                            {"id": "c3", "type": "max", "value": 1, "field": "selections", "scope": "nowhere"}
                        ]
                    }]
                }}),
                None,
            )
            .unwrap();
        graph.process(root).unwrap();
        (graph, root)
    }

    #[test]
    fn keywords_and_reachable_ids_are_valid() {
        let (graph, root) = graph();
        let gear = graph[root].children("sharedSelectionEntries")[0];
        let constraints = graph[gear].children("constraints").to_vec();
        assert_eq!(
            graph.resolve_scope(constraints[0], "roster"),
            Some(Scope::Keyword(ScopeKeyword::Roster))
        );
        let unit = graph[root].children("selectionEntries")[0];
        assert_eq!(
            graph.resolve_scope(constraints[0], "unit"),
            Some(Scope::Keyword(ScopeKeyword::Unit))
        );
        // Reached through the link back-reference, not ownership.
        assert_eq!(graph.referenced_ancestor(constraints[0], "unit"), Some(unit));
        // A visible category resolves even though it encloses nothing here.
        let hq = graph[root].children("categoryEntries")[0];
        assert!(!graph.is_ancestor(hq, constraints[1]));
        assert_eq!(graph.referenced_ancestor(constraints[1], "hq"), None);
        assert_eq!(graph.resolve_scope(constraints[1], "hq"), Some(Scope::Node(hq)));
        assert_eq!(graph.resolve_scope(constraints[2], "nowhere"), None);
    }

    #[test]
    fn invalid_scopes_are_diagnosed() {
        let (graph, root) = graph();
        let gear = graph[root].children("sharedSelectionEntries")[0];
        let constraints = graph[gear].children("constraints").to_vec();
        assert!(graph[constraints[1]].diagnostics().is_empty());
        let kinds: Vec<_> = graph[constraints[2]]
            .diagnostics()
            .iter()
            .map(|d| d.kind)
            .collect();
        assert_eq!(kinds, [crate::DiagnosticKind::InvalidScope]);
    }

    #[test]
    fn token_names_resolve_ids() {
        let (graph, root) = graph();
        let gear = graph[root].children("sharedSelectionEntries")[0];
        assert_eq!(graph.token_name(gear, "hq"), "HQ");
        assert_eq!(graph.token_name(gear, "selections"), "");
        assert_eq!(graph.token_name(gear, "parent"), "parent");
        assert_eq!(graph.token_name(gear, "mystery"), "mystery");
    }
}
