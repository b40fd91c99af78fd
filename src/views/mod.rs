//! Derived catalogue views: grouped units, categories and force trees.
//!
//! Views are plain data built from the resolved graph on every
//! [`Graph::process`] pass; nothing in here is edited in place. Categories
//! are copied into each force that references them, so two forces never
//! share a category view.

mod extra;

use crate::catalog::identity::NodeId;
use crate::catalog::model::Graph;
use crate::catalog::traverse::UNCATEGORIZED;
use indexmap::IndexMap;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

pub use extra::ExtraConstraint;

/// Id of the hidden category collecting units a force cannot reach.
pub const ILLEGAL_UNITS: &str = "illegal-units";

#[derive(Clone, Debug, PartialEq, Serialize)]
/// A category with the units whose primary category it is.
pub struct CategoryView {
    /// Declaring node; `None` for the synthesized categories.
    pub source: Option<NodeId>,
    pub id: String,
    pub name: String,
    pub hidden: bool,
    pub units: Vec<NodeId>,
    pub extra_constraints: Vec<ExtraConstraint>,
}

impl CategoryView {
    fn synthesized(id: &str, name: &str, hidden: bool, units: Vec<NodeId>) -> Self {
        Self {
            source: None,
            id: id.to_string(),
            name: name.to_string(),
            hidden,
            units,
            extra_constraints: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
/// A force template with its own copies of the categories it references.
pub struct ForceView {
    pub source: NodeId,
    pub id: String,
    pub name: String,
    pub hidden: bool,
    pub categories: Vec<CategoryView>,
    pub forces: Vec<ForceView>,
    pub extra_constraints: Vec<ExtraConstraint>,
}

impl ForceView {
    pub fn category(&self, id: &str) -> Option<&CategoryView> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// This force followed by its nested forces, depth first.
    pub fn flatten(&self) -> Vec<&ForceView> {
        let mut out = vec![self];
        for nested in &self.forces {
            out.extend(nested.flatten());
        }
        out
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
/// Everything derived for one catalogue by the last processing pass.
pub struct CatalogueViews {
    /// Units grouped by primary category id, each group in display order.
    pub units: IndexMap<String, Vec<NodeId>>,
    pub categories: Vec<CategoryView>,
    pub forces: Vec<ForceView>,
    pub roster_constraints: Vec<ExtraConstraint>,
    /// Constraints re-bound to arbitrary indexed nodes.
    pub node_constraints: IndexMap<NodeId, Vec<ExtraConstraint>>,
}

impl CatalogueViews {
    pub fn category(&self, id: &str) -> Option<&CategoryView> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// Every force, nested ones included, depth first.
    pub fn all_forces(&self) -> Vec<&ForceView> {
        self.forces.iter().flat_map(ForceView::flatten).collect()
    }

    pub fn extra_constraints(&self, node: NodeId) -> &[ExtraConstraint] {
        self.node_constraints.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every unit, in the same order as the groups.
    pub fn all_units(&self) -> Vec<NodeId> {
        self.units.values().flatten().copied().collect()
    }
}

impl Graph {
    /// Derive units, categories, forces and extra constraints for `root`.
    pub fn build_views(&self, root: NodeId) -> CatalogueViews {
        let units = self.generate_units(root);
        let mut categories = self.generate_categories(root, &units);
        let packed = self.collect_extra_constraints(root, &categories);
        let mut views = CatalogueViews {
            units,
            ..Default::default()
        };
        let routing = self.route_extra_constraints(root, packed, &mut categories, &mut views);
        views.forces = self.generate_forces(root, &categories, &views.all_units());
        for force in views.forces.iter_mut() {
            routing.apply(force);
        }
        views.categories = categories;
        views
    }

    /// Root entries and entry links of the catalogue and its
    /// imports-with-entries, sorted by display name and grouped by primary
    /// category id.
    pub fn generate_units(&self, root: NodeId) -> IndexMap<String, Vec<NodeId>> {
        let mut sources: Vec<NodeId> = self
            .catalogue_state(root)
            .map(|s| s.imports_with_entries.clone())
            .unwrap_or_default();
        sources.push(root);

        let mut units: Vec<NodeId> = Vec::new();
        for doc in sources {
            for key in ["selectionEntries", "entryLinks"] {
                units.extend(self[doc].children(key).iter().copied());
            }
        }
        units.sort_by(|a, b| natural_cmp(self.display_name(*a), self.display_name(*b)));

        let mut grouped: IndexMap<String, Vec<NodeId>> = IndexMap::new();
        for unit in units {
            grouped.entry(self.primary_category(unit)).or_default().push(unit);
        }
        grouped
    }

    /// Declared categories (imports first, then own) plus the synthesized
    /// uncategorized and illegal-units categories.
    pub fn generate_categories(
        &self,
        root: NodeId,
        units: &IndexMap<String, Vec<NodeId>>,
    ) -> Vec<CategoryView> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut categories = Vec::new();
        for doc in self.declaring_documents(root) {
            for category in self[doc].children("categoryEntries") {
                let node = &self[*category];
                let Some(id) = node.id() else {
                    continue;
                };
                if !seen.insert(id.to_string()) {
                    continue;
                }
                categories.push(CategoryView {
                    source: Some(*category),
                    id: id.to_string(),
                    name: node.name().unwrap_or_default().to_string(),
                    hidden: node.hidden(),
                    units: units.get(id).cloned().unwrap_or_default(),
                    extra_constraints: Vec::new(),
                });
            }
        }
        let uncategorized: Vec<NodeId> = units
            .iter()
            .filter(|(id, _)| !seen.contains(id.as_str()))
            .flat_map(|(_, group)| group.iter().copied())
            .collect();
        categories.push(CategoryView::synthesized(
            UNCATEGORIZED,
            "Uncategorized",
            false,
            uncategorized,
        ));
        categories.push(CategoryView::synthesized(
            ILLEGAL_UNITS,
            "Illegal Units",
            true,
            Vec::new(),
        ));
        categories
    }

    /// Force templates (imports first, then own), each with copies of the
    /// categories it links plus the residual illegal units.
    pub fn generate_forces(
        &self,
        root: NodeId,
        categories: &[CategoryView],
        all_units: &[NodeId],
    ) -> Vec<ForceView> {
        let mut forces = Vec::new();
        for doc in self.declaring_documents(root) {
            for force in self[doc].children("forceEntries") {
                forces.push(self.force_view(*force, categories, all_units));
            }
        }
        forces
    }

    fn force_view(
        &self,
        force: NodeId,
        categories: &[CategoryView],
        all_units: &[NodeId],
    ) -> ForceView {
        let find = |id: &str| categories.iter().find(|c| c.id == id);
        let mut linked: Vec<CategoryView> = Vec::new();
        for link in self.category_links(force) {
            let Some(view) = self[link].target_id().and_then(find) else {
                continue;
            };
            if !linked.iter().any(|c| c.id == view.id) {
                linked.push(view.clone());
            }
        }
        if let Some(uncategorized) = find(UNCATEGORIZED).filter(|c| !c.units.is_empty()) {
            linked.push(uncategorized.clone());
        }

        let reachable: HashSet<NodeId> = linked
            .iter()
            .flat_map(|c| c.units.iter().copied())
            .collect();
        let residual: Vec<NodeId> = all_units
            .iter()
            .copied()
            .filter(|u| !reachable.contains(u))
            .collect();
        if !residual.is_empty() {
            if let Some(illegal) = find(ILLEGAL_UNITS) {
                let mut illegal = illegal.clone();
                illegal.units = residual;
                linked.push(illegal);
            }
        }

        let node = &self[force];
        ForceView {
            source: force,
            id: node.id().unwrap_or_default().to_string(),
            name: self.display_name(force).to_string(),
            hidden: self.is_hidden(force),
            categories: linked,
            forces: self
                .collection(force, "forceEntries")
                .map(|nested| self.force_view(nested, categories, all_units))
                .collect(),
            extra_constraints: Vec::new(),
        }
    }

    /// Imports in order, then the catalogue itself.
    fn declaring_documents(&self, root: NodeId) -> Vec<NodeId> {
        let mut docs: Vec<NodeId> = self
            .catalogue_state(root)
            .map(|s| s.imports.clone())
            .unwrap_or_default();
        docs.push(root);
        docs
    }
}

/// Case-insensitive ordering that compares digit runs by value, so
/// `Unit 2` sorts before `Unit 10`. Ties fall back to a plain comparison.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_run = take_digits(&mut left);
                let r_run = take_digits(&mut right);
                let l_trim = l_run.trim_start_matches('0');
                let r_trim = r_run.trim_start_matches('0');
                let order = l_trim
                    .len()
                    .cmp(&r_trim.len())
                    .then_with(|| l_trim.cmp(r_trim));
                if order != Ordering::Equal {
                    return order;
                }
            }
            (Some(l), Some(r)) => {
                let order = l.to_lowercase().cmp(r.to_lowercase());
                if order != Ordering::Equal {
                    return order;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        run.push(c);
        chars.next();
    }
    run
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_order_compares_digit_runs_by_value() {
        let mut names = vec!["unit 10", "Unit 2", "unit 1", "Alpha", "beta"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, ["Alpha", "beta", "unit 1", "Unit 2", "unit 10"]);
        assert_eq!(natural_cmp("a02", "a2"), "a02".cmp("a2"));
    }
}
