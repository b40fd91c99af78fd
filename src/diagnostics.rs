//! Recoverable diagnostics attached to nodes.
//!
//! Every referential-integrity problem is a value on the offending node, not
//! an error return. Checks are keyed by `(kind, other)` so re-running a check
//! replaces its previous verdict rather than stacking copies.

use crate::catalog::identity::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    /// Link target id is absent from the catalogue and its imports.
    UnresolvedLink,
    /// Two uniqueness-requiring nodes share an id; reported on both.
    DuplicateId,
    /// Link points at itself, an ancestor, or another link.
    BadLinkTarget,
    /// Query scope is neither a keyword nor a reachable id.
    InvalidScope,
    /// Query childId or field names nothing known.
    IdNotExist,
    /// Profile without a usable type reference.
    MissingProfileType,
    /// Sibling constraints on one parent share an id.
    DuplicateConstraintId,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::UnresolvedLink => "unresolved-link",
            DiagnosticKind::DuplicateId => "duplicate-id",
            DiagnosticKind::BadLinkTarget => "bad-link-target",
            DiagnosticKind::InvalidScope => "invalid-scope",
            DiagnosticKind::IdNotExist => "id-not-exist",
            DiagnosticKind::MissingProfileType => "missing-profile-type",
            DiagnosticKind::DuplicateConstraintId => "duplicate-constraint-id",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
/// One diagnostic on a node.
///
/// `other` names the counterpart node when there is one: the colliding node
/// of a duplicate pair, or the rejected target of a bad link.
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<NodeId>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            other: None,
        }
    }

    pub fn with_other(mut self, other: NodeId) -> Self {
        self.other = Some(other);
        self
    }

    fn same_slot(&self, other: &Diagnostic) -> bool {
        self.kind == other.kind && self.other == other.other
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// Insert or replace `diagnostic` in `list` by its `(kind, other)` slot.
pub(crate) fn upsert(list: &mut Vec<Diagnostic>, diagnostic: Diagnostic) {
    match list.iter_mut().find(|d| d.same_slot(&diagnostic)) {
        Some(existing) => *existing = diagnostic,
        None => list.push(diagnostic),
    }
}

/// Drop every diagnostic of `kind` from `list`.
pub(crate) fn clear_kind(list: &mut Vec<Diagnostic>, kind: DiagnosticKind) {
    list.retain(|d| d.kind != kind);
}

/// Replace all diagnostics of `kind` with `fresh`.
pub(crate) fn replace_kind(
    list: &mut Vec<Diagnostic>,
    kind: DiagnosticKind,
    fresh: Vec<Diagnostic>,
) {
    clear_kind(list, kind);
    for diagnostic in fresh {
        if !list.contains(&diagnostic) {
            list.push(diagnostic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_kebab_case() {
        let json = serde_json::to_string(&DiagnosticKind::DuplicateConstraintId).unwrap();
        assert_eq!(json, "\"duplicate-constraint-id\"");
        assert_eq!(
            DiagnosticKind::UnresolvedLink.to_string(),
            "unresolved-link"
        );
    }

    #[test]
    fn upsert_replaces_same_slot() {
        let mut list = Vec::new();
        upsert(&mut list, Diagnostic::new(DiagnosticKind::DuplicateId, "a").with_other(NodeId(1)));
        upsert(&mut list, Diagnostic::new(DiagnosticKind::DuplicateId, "b").with_other(NodeId(1)));
        upsert(&mut list, Diagnostic::new(DiagnosticKind::DuplicateId, "c").with_other(NodeId(2)));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].detail, "b");
    }

    #[test]
    fn replace_kind_drops_stale_entries() {
        let mut list = vec![
            Diagnostic::new(DiagnosticKind::InvalidScope, "old"),
            Diagnostic::new(DiagnosticKind::IdNotExist, "keep"),
        ];
        replace_kind(&mut list, DiagnosticKind::InvalidScope, Vec::new());
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].kind, DiagnosticKind::IdNotExist);
    }
}
