//! Human-readable rendering of conditions, constraints and modifiers.
//!
//! Condition comparisons render as `N+ field of X in scope` (`atLeast`),
//! `N- ...` (`atMost`), `=N`, `!=N`, `>N` and `<N`; `instanceOf` and
//! `notInstanceOf` render as `scope is X` / `scope is not X`. Anything else
//! renders as `type value field of X in scope`. Count fields
//! (`selections`, `forces`) render as nothing, and a scope naming the base
//! node itself is left out.

use crate::catalog::identity::{ConditionKind, NodeId, NodeKind};
use crate::catalog::model::Graph;
use serde_json::Value;

impl Graph {
    /// Describe the query `query` as seen from `base`.
    pub fn describe(&self, base: NodeId, query: NodeId) -> String {
        let Some(node) = self.get(query) else {
            return String::new();
        };
        let value = node.attr("value").map(render_value).unwrap_or_default();
        let field = node
            .attr_str("field")
            .map(|f| self.token_name(query, f))
            .unwrap_or_default();
        let child = node
            .attr_str("childId")
            .map(|c| self.token_name(query, c))
            .unwrap_or_default();
        let base_name = self.display_name(base);
        let scope = node
            .attr_str("scope")
            .map(|s| self.token_name(query, s))
            .filter(|s| !s.is_empty() && s != base_name)
            .unwrap_or_default();

        let kind_text = node.type_attr().unwrap_or_default();
        let head = match ConditionKind::parse(kind_text) {
            ConditionKind::AtLeast => format!("{value}+"),
            ConditionKind::AtMost => format!("{value}-"),
            ConditionKind::EqualTo => format!("={value}"),
            ConditionKind::NotEqualTo => format!("!={value}"),
            ConditionKind::GreaterThan => format!(">{value}"),
            ConditionKind::LessThan => format!("<{value}"),
            ConditionKind::InstanceOf => {
                return join(&[scope_or_self(&scope), "is", &child]);
            }
            ConditionKind::NotInstanceOf => {
                return join(&[scope_or_self(&scope), "is not", &child]);
            }
            ConditionKind::Other(_) => join(&[kind_text, &value]),
        };
        let of = if child.is_empty() { "" } else { "of" };
        let within = if scope.is_empty() { "" } else { "in" };
        join(&[&head, &field, of, &child, within, &scope])
    }

    /// Describe a modifier as `type field value`, followed by its
    /// conditions when it has any.
    pub fn describe_modifier(&self, modifier: NodeId) -> String {
        let Some(node) = self.get(modifier) else {
            return String::new();
        };
        let base = self.query_owner(modifier);
        let field = node
            .attr_str("field")
            .map(|f| self.token_name(modifier, f))
            .unwrap_or_default();
        let value = node.attr("value").map(render_value).unwrap_or_default();
        let effect = join(&[node.type_attr().unwrap_or_default(), &field, &value]);
        match self.describe_conditions(base, modifier, "and") {
            conditions if conditions.is_empty() => effect,
            conditions => format!("{effect} if {conditions}"),
        }
    }

    fn describe_conditions(&self, base: NodeId, holder: NodeId, joiner: &str) -> String {
        let node = &self[holder];
        let mut parts: Vec<String> = node
            .children("conditions")
            .iter()
            .map(|c| self.describe(base, *c))
            .collect();
        for group in node.children("conditionGroups") {
            let group_joiner = self[*group].type_attr().unwrap_or("and");
            let text = self.describe_conditions(base, *group, group_joiner);
            if !text.is_empty() {
                parts.push(format!("({text})"));
            }
        }
        parts.join(&format!(" {joiner} "))
    }

    /// The node whose behaviour a modifier or condition adjusts.
    fn query_owner(&self, id: NodeId) -> NodeId {
        self.ancestors(id)
            .find(|a| {
                !matches!(
                    self[*a].kind(),
                    NodeKind::Modifier | NodeKind::ModifierGroup | NodeKind::ConditionGroup
                )
            })
            .unwrap_or(id)
    }
}

fn scope_or_self(scope: &str) -> &str {
    if scope.is_empty() { "self" } else { scope }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}
