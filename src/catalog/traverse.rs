//! Capability flags, link proxying and lazy traversal.
//!
//! A resolved link behaves as a transparent proxy for its target: every
//! collection is the target's items followed by the link's own, and scalar
//! getters read the link's override before falling back to the target.
//! The iterators here keep explicit stacks, so nothing recurses on deep
//! catalogues and every walk can stop early.

use crate::catalog::identity::{NodeId, NodeKind};
use crate::catalog::model::{Graph, Node};
use bitflags::bitflags;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;

/// Category id used when an entry declares no primary category.
pub const UNCATEGORIZED: &str = "uncategorized";

const SELECTABLE_KEYS: &[&str] = &["selectionEntries", "selectionEntryGroups", "entryLinks"];
const INFO_ITEM_KEYS: &[&str] = &["rules", "profiles", "infoGroups", "infoLinks"];

bitflags! {
    /// Capability surface of a node. A resolved link reports [`LINK`] plus
    /// everything its target reports.
    ///
    /// [`LINK`]: Capabilities::LINK
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        const CATALOGUE = 1 << 0;
        const GAME_SYSTEM = 1 << 1;
        const ENTRY = 1 << 2;
        const GROUP = 1 << 3;
        const LINK = 1 << 4;
        const CATEGORY = 1 << 5;
        const FORCE = 1 << 6;
        const PROFILE = 1 << 7;
        const RULE = 1 << 8;
        const INFO_GROUP = 1 << 9;
        const COST = 1 << 10;
        const CONSTRAINT = 1 << 11;
        const CONDITION = 1 << 12;
        const MODIFIER = 1 << 13;
        const QUERY = 1 << 14;
        /// Selections of this entry are taken as one collective choice.
        const COLLECTIVE = 1 << 15;
        const UNIT = 1 << 16;
        const MODEL = 1 << 17;
        const UPGRADE = 1 << 18;
    }
}

impl Capabilities {
    fn of_kind(kind: NodeKind) -> Self {
        match kind {
            NodeKind::GameSystem => Self::CATALOGUE | Self::GAME_SYSTEM,
            NodeKind::Catalogue => Self::CATALOGUE,
            NodeKind::Entry => Self::ENTRY,
            NodeKind::Group => Self::GROUP,
            NodeKind::EntryLink
            | NodeKind::InfoLink
            | NodeKind::CategoryLink
            | NodeKind::CatalogueLink => Self::LINK,
            NodeKind::Category => Self::CATEGORY,
            NodeKind::Force => Self::FORCE,
            NodeKind::Profile => Self::PROFILE,
            NodeKind::Rule => Self::RULE,
            NodeKind::InfoGroup => Self::INFO_GROUP,
            NodeKind::Cost => Self::COST,
            NodeKind::Constraint => Self::CONSTRAINT | Self::QUERY,
            NodeKind::Condition => Self::CONDITION | Self::QUERY,
            NodeKind::Repeat => Self::QUERY,
            NodeKind::Modifier => Self::MODIFIER,
            _ => Self::empty(),
        }
    }
}

impl Graph {
    /// Capability flags of `id`, proxied through a resolved link.
    pub fn capabilities(&self, id: NodeId) -> Capabilities {
        let Some(node) = self.get(id) else {
            return Capabilities::empty();
        };
        let mut caps = Capabilities::of_kind(node.kind());
        if let Some(target) = self.live_target(id) {
            caps |= Capabilities::of_kind(self[target].kind());
        }
        if self.attr_of(id, "collective").is_some_and(truthy) {
            caps |= Capabilities::COLLECTIVE;
        }
        if caps.intersects(Capabilities::ENTRY) {
            match self.entry_type(id) {
                Some("unit") => caps |= Capabilities::UNIT,
                Some("model") => caps |= Capabilities::MODEL,
                Some("upgrade") => caps |= Capabilities::UPGRADE,
                _ => {}
            }
        }
        caps
    }

    /// Resolved and still-present target of a link.
    pub fn live_target(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.target().filter(|t| self.contains(*t))
    }

    /// Collection `key` of `id`; for a resolved link, the target's items
    /// come first, then the link's own.
    pub fn collection(&self, id: NodeId, key: &str) -> impl Iterator<Item = NodeId> + use<'_> {
        let own = self.get(id).map(|n| n.children(key)).unwrap_or(&[]);
        let inherited = self
            .live_target(id)
            .map(|t| self[t].children(key))
            .unwrap_or(&[]);
        inherited.iter().chain(own.iter()).copied()
    }

    /// Scalar attribute with link overrides: the link's own value wins,
    /// except `name` and `type`, which describe the target.
    pub fn attr_of(&self, id: NodeId, key: &str) -> Option<&Value> {
        let node = self.get(id)?;
        let target = self.live_target(id).map(|t| &self[t]);
        match (key, target) {
            ("id" | "targetId", _) | (_, None) => node.attr(key),
            ("name" | "type", Some(target)) => target.attr(key).or_else(|| node.attr(key)),
            (_, Some(target)) => node.attr(key).or_else(|| target.attr(key)),
        }
    }

    pub fn attr_str_of(&self, id: NodeId, key: &str) -> Option<&str> {
        self.attr_of(id, key).and_then(Value::as_str)
    }

    /// Name shown to users: the target's name for resolved links.
    pub fn display_name(&self, id: NodeId) -> &str {
        self.attr_str_of(id, "name").unwrap_or_default()
    }

    /// Entry type (`unit`, `model`, `upgrade`, ...) through links.
    pub fn entry_type(&self, id: NodeId) -> Option<&str> {
        self.attr_str_of(id, "type")
    }

    /// Hidden if the link or its target is hidden.
    pub fn is_hidden(&self, id: NodeId) -> bool {
        let own = self.get(id).is_some_and(Node::hidden);
        own || self.live_target(id).is_some_and(|t| self[t].hidden())
    }

    /// Cost values by cost-type id; link-local costs override the target's.
    pub fn costs(&self, id: NodeId) -> IndexMap<String, f64> {
        let mut out = IndexMap::new();
        for cost in self.collection(id, "costs") {
            let cost = &self[cost];
            if let Some(type_id) = cost.attr_str("typeId") {
                out.insert(type_id.to_string(), cost.attr_f64("value").unwrap_or(0.0));
            }
        }
        out
    }

    /// Direct selectable children: entries, groups and entry links.
    pub fn selectables(&self, id: NodeId) -> impl Iterator<Item = NodeId> + use<'_> {
        SELECTABLE_KEYS
            .iter()
            .flat_map(move |key| self.collection(id, key))
    }

    pub fn constraints(&self, id: NodeId) -> impl Iterator<Item = NodeId> + use<'_> {
        self.collection(id, "constraints")
    }

    /// Modifiers of `id`, descending through nested modifier groups.
    pub fn modifiers(&self, id: NodeId) -> Modifiers<'_> {
        let mut stack: Vec<NodeId> = self.collection(id, "modifiers").collect();
        stack.extend(self.collection(id, "modifierGroups"));
        stack.reverse();
        Modifiers { graph: self, stack }
    }

    /// Top-level modifier groups of `id`.
    pub fn modifier_groups(&self, id: NodeId) -> impl Iterator<Item = NodeId> + use<'_> {
        self.collection(id, "modifierGroups")
    }

    /// Rules, profiles, info groups and info links reachable from `id`,
    /// transitively through info groups and info links.
    pub fn info(&self, id: NodeId) -> Info<'_> {
        let mut info = Info {
            graph: self,
            stack: Vec::new(),
            visited: HashSet::from([id]),
        };
        info.push_items(id);
        info
    }

    /// Category links of `id` (proxied).
    pub fn category_links(&self, id: NodeId) -> impl Iterator<Item = NodeId> + use<'_> {
        self.collection(id, "categoryLinks")
    }

    /// Primary category id: the primary category link, then the legacy
    /// `categoryEntryId` field, then [`UNCATEGORIZED`].
    pub fn primary_category(&self, id: NodeId) -> String {
        self.category_links(id)
            .find(|link| self[*link].attr_bool("primary"))
            .and_then(|link| self[link].target_id())
            .or_else(|| self.attr_str_of(id, "categoryEntryId"))
            .filter(|category| !category.is_empty())
            .unwrap_or(UNCATEGORIZED)
            .to_string()
    }

    /// Preorder walk of `id` and every node it owns (links are not followed).
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            graph: self,
            stack: if self.contains(id) { vec![id] } else { Vec::new() },
        }
    }

    /// Preorder walk of the selectable tree under `id`, following links.
    /// Each node is visited once even if several links reach it.
    pub fn selectable_tree(&self, id: NodeId) -> SelectableTree<'_> {
        let mut stack: Vec<NodeId> = self.selectables(id).collect();
        stack.reverse();
        SelectableTree {
            graph: self,
            stack,
            visited: HashSet::from([id]),
        }
    }
}

/// Iterator returned by [`Graph::modifiers`].
pub struct Modifiers<'g> {
    graph: &'g Graph,
    stack: Vec<NodeId>,
}

impl Iterator for Modifiers<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.stack.pop() {
            let Some(node) = self.graph.get(id) else {
                continue;
            };
            match node.kind() {
                NodeKind::Modifier => return Some(id),
                NodeKind::ModifierGroup => {
                    let start = self.stack.len();
                    self.stack.extend(node.children("modifiers"));
                    self.stack.extend(node.children("modifierGroups"));
                    self.stack[start..].reverse();
                }
                _ => {}
            }
        }
        None
    }
}

/// Iterator returned by [`Graph::info`].
pub struct Info<'g> {
    graph: &'g Graph,
    stack: Vec<NodeId>,
    visited: HashSet<NodeId>,
}

impl Info<'_> {
    fn push_items(&mut self, id: NodeId) {
        let start = self.stack.len();
        for key in INFO_ITEM_KEYS {
            self.stack.extend(self.graph.collection(id, key));
        }
        self.stack[start..].reverse();
    }
}

impl Iterator for Info<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.stack.pop() {
            if !self.visited.insert(id) {
                continue;
            }
            let caps = self.graph.capabilities(id);
            if caps.contains(Capabilities::INFO_GROUP) {
                self.push_items(id);
            }
            return Some(id);
        }
        None
    }
}

/// Iterator returned by [`Graph::descendants`].
pub struct Descendants<'g> {
    graph: &'g Graph,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        if let Some(node) = self.graph.get(id) {
            let start = self.stack.len();
            for (_, children) in node.collections() {
                self.stack.extend_from_slice(children);
            }
            self.stack[start..].reverse();
        }
        Some(id)
    }
}

/// Iterator returned by [`Graph::selectable_tree`].
pub struct SelectableTree<'g> {
    graph: &'g Graph,
    stack: Vec<NodeId>,
    visited: HashSet<NodeId>,
}

impl Iterator for SelectableTree<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.stack.pop() {
            let resolved = self.graph.live_target(id).unwrap_or(id);
            if !self.visited.insert(id) || (resolved != id && !self.visited.insert(resolved)) {
                continue;
            }
            let start = self.stack.len();
            self.stack.extend(self.graph.selectables(id));
            self.stack[start..].reverse();
            return Some(id);
        }
        None
    }
}

/// Names for a list of nodes, with ` [2]`, ` [3]`, ... appended to repeats
/// in declaration order.
pub fn display_names(graph: &Graph, ids: &[NodeId]) -> Vec<String> {
    let mut seen: IndexMap<&str, usize> = IndexMap::new();
    ids.iter()
        .map(|id| {
            let name = graph.display_name(*id);
            let count = seen.entry(name).or_insert(0);
            *count += 1;
            match *count {
                1 => name.to_string(),
                n => format!("{name} [{n}]"),
            }
        })
        .collect()
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linked() -> (Graph, NodeId) {
        let mut graph = Graph::default();
        let root = graph
            .insert_document(
                &json!({"catalogue": {
                    "id": "cat", "name": "Cat",
                    "entryLinks": [{
                        "id": "l", "name": "Link name", "targetId": "e", "type": "selectionEntry",
                        "hidden": true,
                        "rules": [{"id": "r2", "name": "Local rule"}],
                        "costs": [{"name": "pts", "typeId": "pts", "value": 15}]
                    }],
                    "sharedSelectionEntries": [{
                        "id": "e", "name": "Entry", "type": "unit", "collective": true,
                        "rules": [{"id": "r1", "name": "Shared rule"}],
                        "infoGroups": [{"id": "ig", "name": "Group",
                            "profiles": [{"id": "p1", "name": "Profile", "typeId": "pt"}]}],
                        "costs": [
                            {"name": "pts", "typeId": "pts", "value": 10},
                            {"name": "pl", "typeId": "pl", "value": 1}
                        ],
                        "categoryLinks": [
                            {"id": "cl1", "targetId": "troops"},
                            {"id": "cl2", "targetId": "hq", "primary": true}
                        ]
                    }]
                }}),
                None,
            )
            .unwrap();
        let link = graph[root].children("entryLinks")[0];
        let entry = graph[root].children("sharedSelectionEntries")[0];
        graph.get_mut(link).unwrap().target = Some(entry);
        (graph, link)
    }

    #[test]
    fn links_proxy_their_target() {
        let (graph, link) = linked();
        let rules: Vec<&str> = graph
            .collection(link, "rules")
            .map(|r| graph.display_name(r))
            .collect();
        assert_eq!(rules, ["Shared rule", "Local rule"]);
        assert_eq!(graph.display_name(link), "Entry");
        assert_eq!(graph.entry_type(link), Some("unit"));
        assert!(graph.is_hidden(link));
        let caps = graph.capabilities(link);
        assert!(caps.contains(Capabilities::LINK | Capabilities::ENTRY | Capabilities::UNIT));
        assert!(caps.contains(Capabilities::COLLECTIVE));
        assert_eq!(graph.primary_category(link), "hq");
    }

    #[test]
    fn link_costs_override_by_type() {
        let (graph, link) = linked();
        let costs = graph.costs(link);
        assert_eq!(costs.get("pts"), Some(&15.0));
        assert_eq!(costs.get("pl"), Some(&1.0));
        assert_eq!(costs.keys().collect::<Vec<_>>(), ["pts", "pl"]);
    }

    #[test]
    fn info_descends_through_groups() {
        let (graph, link) = linked();
        let names: Vec<&str> = graph.info(link).map(|i| graph.display_name(i)).collect();
        assert_eq!(names, ["Shared rule", "Local rule", "Group", "Profile"]);
    }

    #[test]
    fn modifiers_descend_nested_groups() {
        let mut graph = Graph::default();
        let root = graph
            .insert_document(
                &json!({"catalogue": {"id": "cat", "name": "Cat", "selectionEntries": [{
                    "id": "e", "name": "E",
                    "modifiers": [{"type": "set", "field": "name", "value": "a"}],
                    "modifierGroups": [{
                        "modifiers": [{"type": "set", "field": "name", "value": "b"}],
                        "modifierGroups": [{"modifiers": [{"type": "set", "field": "name", "value": "c"}]}]
                    }]
                }]}}),
                None,
            )
            .unwrap();
        let entry = graph[root].children("selectionEntries")[0];
        let values: Vec<&str> = graph
            .modifiers(entry)
            .filter_map(|m| graph[m].attr_str("value"))
            .collect();
        assert_eq!(values, ["a", "b", "c"]);
    }

    #[test]
    fn display_names_suffix_repeats() {
        let mut graph = Graph::default();
        let root = graph
            .insert_document(
                &json!({"catalogue": {"id": "cat", "name": "Cat", "selectionEntries": [
                    {"id": "a", "name": "Squad"}, {"id": "b", "name": "Leader"},
                    {"id": "c", "name": "Squad"}, {"id": "d", "name": "Squad"}
                ]}}),
                None,
            )
            .unwrap();
        let ids = graph[root].children("selectionEntries").to_vec();
        assert_eq!(
            display_names(&graph, &ids),
            ["Squad", "Leader", "Squad [2]", "Squad [3]"]
        );
    }

    #[test]
    fn descendants_walk_in_preorder() {
        let (graph, link) = linked();
        let root = graph.root_of(link);
        let first: Vec<NodeKind> = graph
            .descendants(root)
            .take(3)
            .map(|n| graph[n].kind())
            .collect();
        assert_eq!(
            first,
            [NodeKind::Catalogue, NodeKind::EntryLink, NodeKind::Rule]
        );
    }
}
