//! Upper-bound estimate for how many of an entry a roster may hold.

use crate::catalog::identity::{ConstraintKind, ModifierKind, NodeId, NodeKind};
use crate::catalog::model::Graph;
use serde::Serialize;
use std::fmt;

/// One recorded upper bound.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Finite(f64),
    Unbounded,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Finite(value) => write!(f, "{value}"),
            Bound::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Bounds recorded from an entry's `max selections` constraints.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MaxEstimate {
    pub bounds: Vec<(NodeId, Bound)>,
}

impl MaxEstimate {
    /// Tightest finite bound, or unbounded when nothing finite was recorded.
    pub fn bound(&self) -> Bound {
        self.bounds
            .iter()
            .filter_map(|(_, bound)| match bound {
                Bound::Finite(value) => Some(*value),
                Bound::Unbounded => None,
            })
            .reduce(f64::min)
            .map_or(Bound::Unbounded, Bound::Finite)
    }

    /// Whether more than one may be taken: any unbounded constraint, no
    /// recorded constraint at all, or a tightest bound above one.
    pub fn may_exceed_one(&self) -> bool {
        if self.bounds.is_empty() || self.bounds.iter().any(|(_, b)| *b == Bound::Unbounded) {
            return true;
        }
        matches!(self.bound(), Bound::Finite(value) if value > 1.0)
    }
}

impl Graph {
    /// Estimate the upper bound on selections of `node`.
    ///
    /// Every `max` constraint on `selections` above one is recorded as is. A
    /// bound of exactly one is adjusted by the modifiers that target the
    /// constraint id: increments and decrements accumulate unless they
    /// repeat, `set` above one overrides, and `set -1` lifts the bound.
    pub fn theoretical_max(&self, node: NodeId) -> MaxEstimate {
        let mut estimate = MaxEstimate::default();
        for constraint in self.constraints(node) {
            let current = &self[constraint];
            let kind = ConstraintKind::parse(current.type_attr().unwrap_or_default());
            if kind != ConstraintKind::Max || current.attr_str("field") != Some("selections") {
                continue;
            }
            let value = current.attr_f64("value").unwrap_or(0.0);
            if value > 1.0 {
                estimate.bounds.push((constraint, Bound::Finite(value)));
            } else if value == 1.0 {
                let bound = current
                    .id()
                    .map_or(Bound::Finite(1.0), |id| self.modified_bound(node, id));
                estimate.bounds.push((constraint, bound));
            }
        }
        estimate
    }

    fn modified_bound(&self, node: NodeId, constraint_id: &str) -> Bound {
        let mut running = 1.0;
        for modifier in self.modifiers(node) {
            let current = &self[modifier];
            if current.attr_str("field") != Some(constraint_id) {
                continue;
            }
            let amount = current.attr_f64("value").unwrap_or(0.0);
            match ModifierKind::parse(current.type_attr().unwrap_or_default()) {
                ModifierKind::Increment | ModifierKind::Decrement if self.repeats(modifier) => {
                    return Bound::Unbounded;
                }
                ModifierKind::Increment => running += amount,
                ModifierKind::Decrement => running -= amount,
                ModifierKind::Set if amount == -1.0 => return Bound::Unbounded,
                ModifierKind::Set if amount > 1.0 => running = amount,
                _ => {}
            }
        }
        Bound::Finite(running)
    }

    /// Whether the modifier or any enclosing modifier group repeats.
    fn repeats(&self, modifier: NodeId) -> bool {
        let has_repeat = |id: NodeId| {
            let node = &self[id];
            !node.children("repeats").is_empty()
                || node.attr_f64("repeats").is_some_and(|n| n > 0.0)
        };
        has_repeat(modifier)
            || self
                .ancestors(modifier)
                .take_while(|id| self[*id].kind() == NodeKind::ModifierGroup)
                .any(has_repeat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn entry(modifiers: Value, modifier_groups: Value) -> (Graph, NodeId) {
        let mut graph = Graph::default();
        let root = graph
            .insert_document(
                &json!({"catalogue": {"id": "cat", "name": "Cat", "selectionEntries": [{
                    "id": "e", "name": "E",
                    "constraints": [{"id": "c", "type": "max", "value": 1, "field": "selections", "scope": "parent"}],
                    "modifiers": modifiers,
                    "modifierGroups": modifier_groups
                }]}}),
                None,
            )
            .unwrap();
        let entry = graph[root].children("selectionEntries")[0];
        (graph, entry)
    }

    #[test]
    fn increment_raises_a_bound_of_one() {
        let (graph, entry) = entry(
            json!([{"type": "increment", "field": "c", "value": 2}]),
            json!([]),
        );
        let estimate = graph.theoretical_max(entry);
        assert_eq!(estimate.bound(), Bound::Finite(3.0));
        assert!(estimate.may_exceed_one());
    }

    #[test]
    fn repeating_groups_make_the_bound_unbounded() {
        let (graph, entry) = entry(
            json!([]),
            json!([{
                "repeats": [{"value": 1, "repeats": 1, "field": "selections", "scope": "parent", "childId": "x"}],
                "modifiers": [{"type": "increment", "field": "c", "value": 2}]
            }]),
        );
        let estimate = graph.theoretical_max(entry);
        assert_eq!(estimate.bounds[0].1, Bound::Unbounded);
        assert!(estimate.may_exceed_one());
    }

    #[test]
    fn set_overrides_and_untouched_bounds_stay_one() {
        let (graph, entry) = entry(json!([]), json!([]));
        let estimate = graph.theoretical_max(entry);
        assert_eq!(estimate.bound(), Bound::Finite(1.0));
        assert!(!estimate.may_exceed_one());

        let (graph, entry) = entry_with_set(-1);
        assert_eq!(graph.theoretical_max(entry).bound(), Bound::Unbounded);
        let (graph, entry) = entry_with_set(4);
        assert_eq!(graph.theoretical_max(entry).bound(), Bound::Finite(4.0));
    }

    fn entry_with_set(value: i64) -> (Graph, NodeId) {
        entry(
            json!([{"type": "set", "field": "c", "value": value}]),
            json!([]),
        )
    }

    #[test]
    fn entries_without_constraints_may_exceed_one() {
        assert!(MaxEstimate::default().may_exceed_one());
    }
}
