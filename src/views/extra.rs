//! Constraints lifted out of their entry and re-bound to a wider scope.
//!
//! Only `min` and `exactly` constraints are lifted; a `max` can always be
//! checked where it is declared. The lifted copy counts its owner from the
//! new scope, so it is bound to `self` with the owner's id as childId.

use crate::catalog::identity::{ConstraintKind, NodeId, NodeKind};
use crate::catalog::model::Graph;
use crate::catalog::traverse::Capabilities;
use crate::query::ScopeKeyword;
use crate::views::{CatalogueViews, CategoryView, ForceView};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExtraConstraint {
    pub constraint: NodeId,
    /// Entry (or link) the constraint was declared on.
    pub owner: NodeId,
    pub id: Option<String>,
    pub kind: ConstraintKind,
    pub value: f64,
    pub field: String,
    pub scope: String,
    pub child_id: String,
    pub original_scope: String,
    /// Modifiers of the owner whose field is this constraint's id.
    pub modifiers: Vec<NodeId>,
}

/// Lifted constraints waiting for the force views to exist.
#[derive(Default)]
pub(super) struct ForceRouting {
    every_force: Vec<ExtraConstraint>,
    by_force: HashMap<NodeId, Vec<ExtraConstraint>>,
}

impl ForceRouting {
    pub(super) fn apply(&self, force: &mut ForceView) {
        force.extra_constraints.extend(self.every_force.iter().cloned());
        if let Some(own) = self.by_force.get(&force.source) {
            force.extra_constraints.extend(own.iter().cloned());
        }
        for nested in force.forces.iter_mut() {
            self.apply(nested);
        }
    }
}

impl Graph {
    /// Lift a constraint declared on `owner`; `None` unless it is a `min` or
    /// `exactly` bound.
    pub fn pack_extra_constraint(
        &self,
        constraint: NodeId,
        owner: NodeId,
    ) -> Option<ExtraConstraint> {
        let node = self.get(constraint)?;
        let kind = ConstraintKind::parse(node.type_attr().unwrap_or_default());
        if !matches!(kind, ConstraintKind::Min | ConstraintKind::Exactly) {
            return None;
        }
        let id = node.id().map(str::to_string);
        let modifiers = match &id {
            Some(id) => self
                .modifiers(owner)
                .filter(|m| self[*m].attr_str("field") == Some(id.as_str()))
                .collect(),
            None => Vec::new(),
        };
        Some(ExtraConstraint {
            constraint,
            owner,
            id,
            kind,
            value: node.attr_f64("value").unwrap_or(0.0),
            field: node.attr_str("field").unwrap_or_default().to_string(),
            scope: ScopeKeyword::SelfScope.as_str().to_string(),
            child_id: self.attr_str_of(owner, "id").unwrap_or_default().to_string(),
            original_scope: node.attr_str("scope").unwrap_or_default().to_string(),
            modifiers,
        })
    }

    /// Lift every eligible constraint reachable from the categories' units,
    /// the declared categories and the force templates.
    pub(super) fn collect_extra_constraints(
        &self,
        root: NodeId,
        categories: &[CategoryView],
    ) -> Vec<ExtraConstraint> {
        let mut owners: Vec<NodeId> = Vec::new();
        for category in categories {
            owners.extend(category.source);
            for unit in &category.units {
                owners.push(*unit);
                owners.extend(self.selectable_tree(*unit));
            }
        }
        for doc in self.declaring_documents(root) {
            for force in self[doc].children("forceEntries") {
                owners.extend(
                    self.descendants(*force)
                        .filter(|n| self[*n].kind() == NodeKind::Force),
                );
            }
        }

        let mut seen: HashSet<(NodeId, NodeId)> = HashSet::new();
        let mut packed = Vec::new();
        for owner in owners {
            for constraint in self.constraints(owner) {
                if !seen.insert((constraint, owner)) {
                    continue;
                }
                packed.extend(self.pack_extra_constraint(constraint, owner));
            }
        }
        packed
    }

    /// Route lifted constraints by their original scope: `roster` to the
    /// catalogue, `force` to every force, a category or force id to that
    /// view, any other indexed id to that node. Everything else is local.
    pub(super) fn route_extra_constraints(
        &self,
        root: NodeId,
        packed: Vec<ExtraConstraint>,
        categories: &mut [CategoryView],
        views: &mut CatalogueViews,
    ) -> ForceRouting {
        let mut routing = ForceRouting::default();
        for extra in packed {
            match ScopeKeyword::parse(&extra.original_scope) {
                Some(ScopeKeyword::Roster) => views.roster_constraints.push(extra),
                Some(ScopeKeyword::Force) => routing.every_force.push(extra),
                Some(_) => {}
                None => {
                    let Some(target) = self.find_option_by_id(root, &extra.original_scope) else {
                        debug!(scope = %extra.original_scope, "dropping extra constraint");
                        continue;
                    };
                    let capabilities = self.capabilities(target);
                    if capabilities.contains(Capabilities::FORCE) {
                        routing.by_force.entry(target).or_default().push(extra);
                    } else if capabilities.contains(Capabilities::CATEGORY) {
                        match categories.iter_mut().find(|c| c.id == extra.original_scope) {
                            Some(category) => category.extra_constraints.push(extra),
                            None => views.node_constraints.entry(target).or_default().push(extra),
                        }
                    } else {
                        views.node_constraints.entry(target).or_default().push(extra);
                    }
                }
            }
        }
        routing
    }

    /// Replace every `exactly` constraint of the document with a `min` and a
    /// `max` of the same value, ids suffixed `-min` and `-max`. Modifiers on
    /// the constraint's parent aimed at the original id are duplicated so
    /// one targets each half; constraint ids are only unique per parent.
    pub fn split_exactly_constraints(&mut self, root: NodeId) {
        let exact: Vec<NodeId> = self
            .descendants(root)
            .filter(|n| {
                let node = &self[*n];
                node.kind() == NodeKind::Constraint
                    && ConstraintKind::parse(node.type_attr().unwrap_or_default())
                        == ConstraintKind::Exactly
            })
            .collect();
        if exact.is_empty() {
            return;
        }
        debug!(count = exact.len(), "splitting exactly constraints");
        for constraint in exact {
            let id = self[constraint].id().map(str::to_string);
            let parent = self[constraint].parent();
            let Some(upper) = self.clone_subtree(constraint) else {
                continue;
            };
            self.retype(constraint, ConstraintKind::Min, id.as_deref());
            self.retype(upper, ConstraintKind::Max, id.as_deref());
            let (Some(id), Some(parent)) = (id, parent) else {
                continue;
            };
            let owner = &self[parent];
            let aimed: Vec<NodeId> = owner
                .children("modifiers")
                .iter()
                .chain(owner.children("modifierGroups"))
                .flat_map(|m| self.descendants(*m))
                .filter(|n| {
                    let node = &self[*n];
                    node.kind() == NodeKind::Modifier && node.attr_str("field") == Some(id.as_str())
                })
                .collect();
            for modifier in aimed {
                self.retarget(modifier, &format!("{id}-min"));
                if let Some(copy) = self.clone_subtree(modifier) {
                    self.retarget(copy, &format!("{id}-max"));
                }
            }
        }
    }

    fn retype(&mut self, constraint: NodeId, kind: ConstraintKind, id: Option<&str>) {
        let Some(node) = self.get_mut(constraint) else {
            return;
        };
        node.set_attr("type", Value::String(kind.as_str().to_string()));
        if let Some(id) = id {
            node.set_attr("id", Value::String(format!("{id}-{kind}")));
        }
    }

    fn retarget(&mut self, modifier: NodeId, field: &str) {
        if let Some(node) = self.get_mut(modifier) {
            node.set_attr("field", Value::String(field.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use serde_json::json;

    fn processed(record: Value, settings: Settings) -> (Graph, NodeId) {
        let mut graph = Graph::new(settings);
        let root = graph.insert_document(&record, None).unwrap();
        graph.process(root).unwrap();
        (graph, root)
    }

    #[test]
    fn exactly_splits_into_min_and_max_with_modifiers() {
        let settings = Settings {
            split_exactly_constraints: true,
            ..Settings::default()
        };
        let (graph, root) = processed(
            json!({"catalogue": {"id": "cat", "name": "Cat", "selectionEntries": [{
                "id": "e", "name": "E",
                "constraints": [{"id": "k", "type": "exactly", "value": 2, "field": "selections", "scope": "parent"}],
                "modifiers": [{"type": "increment", "field": "k", "value": 1}]
            }]}}),
            settings,
        );
        let entry = graph[root].children("selectionEntries")[0];
        let constraints: Vec<(String, String)> = graph[entry]
            .children("constraints")
            .iter()
            .map(|c| {
                let node = &graph[*c];
                (
                    node.id().unwrap().to_string(),
                    node.type_attr().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            constraints,
            [
                ("k-min".to_string(), "min".to_string()),
                ("k-max".to_string(), "max".to_string())
            ]
        );
        let fields: Vec<&str> = graph[entry]
            .children("modifiers")
            .iter()
            .map(|m| graph[*m].attr_str("field").unwrap())
            .collect();
        assert_eq!(fields, ["k-min", "k-max"]);
    }

    #[test]
    fn split_leaves_modifiers_of_other_entries_alone() {
        let (graph, root) = processed(
            json!({"catalogue": {"id": "cat", "name": "Cat", "selectionEntries": [
                {
                    "id": "e", "name": "E",
                    "constraints": [{"id": "k", "type": "exactly", "value": 2, "field": "selections", "scope": "parent"}],
                    "modifierGroups": [{"modifiers": [{"type": "increment", "field": "k", "value": 1}]}]
                },
                {
                    "id": "f", "name": "F",
                    "constraints": [{"id": "k", "type": "max", "value": 1, "field": "selections", "scope": "parent"}],
                    "modifiers": [{"type": "set", "field": "k", "value": 3}]
                }
            ]}}),
            Settings::default(),
        );
        let entries = graph[root].children("selectionEntries").to_vec();
        let group = graph[entries[0]].children("modifierGroups")[0];
        let grouped: Vec<&str> = graph[group]
            .children("modifiers")
            .iter()
            .map(|m| graph[*m].attr_str("field").unwrap())
            .collect();
        assert_eq!(grouped, ["k-min", "k-max"]);

        let other: Vec<&str> = graph[entries[1]]
            .children("modifiers")
            .iter()
            .map(|m| graph[*m].attr_str("field").unwrap())
            .collect();
        assert_eq!(other, ["k"]);
        let kept = graph[entries[1]].children("constraints")[0];
        assert_eq!(graph[kept].id(), Some("k"));
    }

    #[test]
    fn exactly_is_kept_when_splitting_is_off() {
        let (graph, root) = processed(
            json!({"catalogue": {"id": "cat", "name": "Cat", "selectionEntries": [{
                "id": "e", "name": "E",
                "constraints": [{"id": "k", "type": "exactly", "value": 2, "field": "selections", "scope": "parent"}]
            }]}}),
            Settings {
                split_exactly_constraints: false,
                ..Settings::default()
            },
        );
        let entry = graph[root].children("selectionEntries")[0];
        assert_eq!(graph[entry].children("constraints").len(), 1);
    }

    #[test]
    fn only_lower_bounds_are_lifted() {
        let (graph, root) = processed(
            json!({"catalogue": {"id": "cat", "name": "Cat", "selectionEntries": [{
                "id": "u1", "name": "Unit",
                "constraints": [
                    {"id": "lo", "type": "min", "value": 1, "field": "selections", "scope": "roster"},
                    {"id": "hi", "type": "max", "value": 3, "field": "selections", "scope": "roster"}
                ],
                "modifiers": [{"type": "increment", "field": "lo", "value": 1}]
            }]}}),
            Settings::default(),
        );
        let views = graph.catalogue_state(root).unwrap().views().unwrap();
        assert_eq!(views.roster_constraints.len(), 1);
        let extra = &views.roster_constraints[0];
        assert_eq!(extra.id.as_deref(), Some("lo"));
        assert_eq!(extra.scope, "self");
        assert_eq!(extra.child_id, "u1");
        assert_eq!(extra.original_scope, "roster");
        assert_eq!(extra.modifiers.len(), 1);
    }

    #[test]
    fn force_and_category_scopes_attach_to_their_views() {
        let (graph, root) = processed(
            json!({"catalogue": {
                "id": "cat", "name": "Cat",
                "categoryEntries": [{"id": "hq", "name": "HQ"}],
                "forceEntries": [{
                    "id": "det", "name": "Detachment",
                    "categoryLinks": [{"id": "det-hq", "name": "HQ", "targetId": "hq"}]
                }],
                "selectionEntries": [{
                    "id": "boss", "name": "Boss",
                    "categoryLinks": [{"id": "boss-hq", "name": "HQ", "targetId": "hq", "primary": true}],
                    "constraints": [
                        {"id": "in-det", "type": "min", "value": 1, "field": "selections", "scope": "det"},
                        {"id": "in-hq", "type": "min", "value": 1, "field": "selections", "scope": "hq"},
                        {"id": "any-force", "type": "min", "value": 1, "field": "selections", "scope": "force"},
                        {"id": "local", "type": "min", "value": 1, "field": "selections", "scope": "parent"}
                    ]
                }]
            }}),
            Settings::default(),
        );
        let views = graph.catalogue_state(root).unwrap().views().unwrap();
        let ids = |extras: &[ExtraConstraint]| -> Vec<String> {
            extras.iter().filter_map(|e| e.id.clone()).collect()
        };
        let force = &views.forces[0];
        assert_eq!(ids(&force.extra_constraints), ["any-force", "in-det"]);
        assert_eq!(ids(&views.category("hq").unwrap().extra_constraints), ["in-hq"]);
        assert_eq!(ids(&force.category("hq").unwrap().extra_constraints), ["in-hq"]);
        assert!(views.roster_constraints.is_empty());
    }
}
