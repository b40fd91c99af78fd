//! Cross-document import resolution and link fixed point.
//!
//! Processing a catalogue runs, in order: dependency initialization (each
//! imported document once per session), `exactly` splitting, import-set
//! construction, indexing, link resolution and diagnostics refresh. View
//! building runs last, from [`Graph::process`].
//!
//! Lookup order is fixed: the catalogue's own index shadows every import,
//! and among imports the first one in the import set wins.

use crate::catalog::identity::{CatalogueKey, NodeId, NodeKind};
use crate::catalog::model::Graph;
use crate::diagnostics::{self, Diagnostic, DiagnosticKind};
use anyhow::{Result, anyhow, bail};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
/// Outcome of one link-resolution run.
pub struct ResolveReport {
    /// Passes made before the failing count stopped shrinking.
    pub passes: usize,
    pub resolved: usize,
    /// Links still failing at the fixed point.
    pub remaining: usize,
    /// Links removed from their parent collection.
    pub pruned: usize,
}

/// Why a lookup could not bind a link.
enum LinkFailure {
    Missing,
    Bad(NodeId, &'static str),
}

impl Graph {
    /// Index, resolve and build the views of the document at `root`.
    ///
    /// Imported documents are initialized first, each once per session. The
    /// document itself is re-processed on every call and the result is the
    /// same each time: indexes, diagnostics and views are rebuilt wholesale.
    pub fn process(&mut self, root: NodeId) -> Result<ResolveReport> {
        if !self.states.contains_key(&root) {
            bail!("{root} is not a loaded catalogue");
        }
        self.initialize_dependencies(root)?;
        let report = self.process_document(root)?;
        let views = self.build_views(root);
        self.state_mut(root)?.views = Some(views);
        info!(
            catalogue = %self[root].id().unwrap_or_default(),
            passes = report.passes,
            resolved = report.resolved,
            remaining = report.remaining,
            "processed catalogue"
        );
        Ok(report)
    }

    fn initialize(&mut self, root: NodeId) -> Result<()> {
        let state = self.state_mut(root)?;
        if state.initialized || state.initializing {
            return Ok(());
        }
        state.initializing = true;
        let outcome = self
            .initialize_dependencies(root)
            .and_then(|()| self.process_document(root));
        let state = self.state_mut(root)?;
        state.initializing = false;
        outcome?;
        state.initialized = true;
        Ok(())
    }

    fn initialize_dependencies(&mut self, root: NodeId) -> Result<()> {
        self.wire(root);
        for dependency in self.dependencies(root) {
            if dependency != root {
                self.initialize(dependency)?;
            }
        }
        Ok(())
    }

    fn process_document(&mut self, root: NodeId) -> Result<ResolveReport> {
        if self.settings().split_exactly_constraints {
            self.split_exactly_constraints(root);
        }
        let (imports, with_entries) = self.build_import_set(root);
        let state = self.state_mut(root)?;
        state.imports = imports;
        state.imports_with_entries = with_entries;
        state.pending.clear();
        state.views = None;

        self.index_all(root);
        let links: Vec<NodeId> = self
            .descendants(root)
            .filter(|n| {
                let kind = self[*n].kind();
                kind.is_link() && kind != NodeKind::CatalogueLink
            })
            .collect();
        for link in &links {
            self.unbind(*link);
        }
        let report = self.resolve_links(root, links, self.settings().delete_bad_links);
        self.refresh_all(root);
        self.state_mut(root)?.initialized = true;
        Ok(report)
    }

    /// Bind the game system and catalogue links of `root` to loaded documents.
    pub(crate) fn wire(&mut self, root: NodeId) {
        let Some(state) = self.states.get(&root) else {
            return;
        };
        let date = state.key.date.clone();
        let lookup = |graph: &Graph, id: &str| {
            graph
                .document(&CatalogueKey::new(id, date.clone()))
                .or_else(|| graph.document_by_id(id))
        };

        if self[root].kind() == NodeKind::Catalogue {
            let game_system = self[root]
                .attr_str("gameSystemId")
                .and_then(|id| lookup(self, id))
                .filter(|gs| self[*gs].kind() == NodeKind::GameSystem);
            if let Some(state) = self.states.get_mut(&root) {
                state.game_system = game_system;
            }
        }

        let links = self[root].children("catalogueLinks").to_vec();
        for link in links {
            if self.live_target(link).is_some() {
                continue;
            }
            let target = self[link].target_id().and_then(|id| lookup(self, id));
            match target {
                Some(target) => self.bind(link, target),
                None => {
                    let detail = format!(
                        "catalogue '{}' is not loaded",
                        self[link].target_id().unwrap_or_default()
                    );
                    if let Some(node) = self.get_mut(link) {
                        diagnostics::upsert(
                            &mut node.diagnostics,
                            Diagnostic::new(DiagnosticKind::UnresolvedLink, detail),
                        );
                    }
                }
            }
        }
    }

    /// Direct document dependencies: game system, then catalogue-link targets.
    pub fn dependencies(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if let Some(gs) = self.catalogue_state(root).and_then(|s| s.game_system) {
            out.push(gs);
        }
        if let Some(node) = self.get(root) {
            for link in node.children("catalogueLinks") {
                if let Some(target) = self.live_target(*link) {
                    if !out.contains(&target) {
                        out.push(target);
                    }
                }
            }
        }
        out
    }

    /// Ordered, id-unique import set of `root` plus the subset whose root
    /// entries count as units.
    ///
    /// The game system comes first; each linked catalogue contributes its
    /// own imports followed by itself.
    pub fn build_import_set(&self, root: NodeId) -> (Vec<NodeId>, Vec<NodeId>) {
        let mut imports: Vec<NodeId> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        if let Some(own) = self.catalogue_state(root) {
            seen.insert(own.key.id.clone());
        }
        let mut push = |graph: &Graph, doc: NodeId, imports: &mut Vec<NodeId>| {
            if let Some(state) = graph.catalogue_state(doc) {
                if seen.insert(state.key.id.clone()) {
                    imports.push(doc);
                }
            }
        };

        let game_system = self.catalogue_state(root).and_then(|s| s.game_system);
        let mut with_entries: Vec<NodeId> = game_system.into_iter().collect();
        if let Some(gs) = game_system {
            push(self, gs, &mut imports);
        }
        for link in self[root].children("catalogueLinks") {
            let Some(target) = self.live_target(*link) else {
                continue;
            };
            if target == root {
                continue;
            }
            if let Some(state) = self.catalogue_state(target) {
                for nested in &state.imports {
                    if *nested != root {
                        push(self, *nested, &mut imports);
                    }
                }
            }
            push(self, target, &mut imports);
            if self[*link].attr_bool("importRootEntries") && !with_entries.contains(&target) {
                with_entries.push(target);
            }
        }
        (imports, with_entries)
    }

    /// Resolve `links` to a fixed point against the scope of `root`.
    ///
    /// Passes repeat while the number of failures strictly decreases. What
    /// still fails is pruned when `delete_bad_links` is set, otherwise kept
    /// in the pending map keyed by target id.
    pub fn resolve_links(
        &mut self,
        root: NodeId,
        links: Vec<NodeId>,
        delete_bad_links: bool,
    ) -> ResolveReport {
        let mut report = ResolveReport::default();
        let mut unresolved = links;
        loop {
            report.passes += 1;
            let before = unresolved.len();
            let mut failed = Vec::new();
            for link in unresolved {
                if self.try_resolve(root, link) {
                    report.resolved += 1;
                } else {
                    failed.push(link);
                }
            }
            unresolved = failed;
            debug!(
                catalogue = %root,
                pass = report.passes,
                failing = unresolved.len(),
                "link pass"
            );
            if unresolved.is_empty() || unresolved.len() >= before {
                break;
            }
        }

        report.remaining = unresolved.len();
        for link in unresolved {
            // Pruning an outer link takes nested links with it.
            if !self.contains(link) {
                continue;
            }
            if delete_bad_links {
                self.prune(root, link);
                report.pruned += 1;
            } else {
                self.park(root, link);
            }
        }
        report
    }

    /// Try to bind one link; failures are recorded on the link.
    pub(crate) fn try_resolve(&mut self, root: NodeId, link: NodeId) -> bool {
        if self.live_target(link).is_some() {
            return true;
        }
        match self.lookup_target(root, link) {
            Ok(target) => {
                self.bind(link, target);
                true
            }
            Err(failure) => {
                self.record_link_failure(link, failure);
                false
            }
        }
    }

    fn lookup_target(&self, root: NodeId, link: NodeId) -> Result<NodeId, LinkFailure> {
        let node = &self[link];
        let Some(target_id) = node.target_id() else {
            return Err(LinkFailure::Missing);
        };
        let kind = node.kind();
        let mut fallback = None;
        for scope in self.search_scopes(root) {
            let Some(state) = self.catalogue_state(scope) else {
                continue;
            };
            let candidates = state.index.candidates(target_id);
            if let Some(found) = candidates
                .iter()
                .copied()
                .find(|c| *c != link && link_accepts(kind, self[*c].kind()))
            {
                return self.check_target(link, found);
            }
            fallback = fallback.or_else(|| candidates.first().copied());
        }
        match fallback {
            Some(found) => match self.check_target(link, found) {
                Ok(_) => Err(LinkFailure::Bad(found, "target has the wrong kind")),
                bad => bad,
            },
            None => Err(LinkFailure::Missing),
        }
    }

    fn check_target(&self, link: NodeId, target: NodeId) -> Result<NodeId, LinkFailure> {
        if target == link {
            return Err(LinkFailure::Bad(target, "link targets itself"));
        }
        if self.is_ancestor(target, link) {
            return Err(LinkFailure::Bad(target, "link targets its own ancestor"));
        }
        if self[target].kind().is_link() {
            warn!(link = %link, target = %target, "link resolves to another link");
            return Err(LinkFailure::Bad(target, "link targets another link"));
        }
        Ok(target)
    }

    fn record_link_failure(&mut self, link: NodeId, failure: LinkFailure) {
        let target_id = self[link].target_id().unwrap_or_default().to_string();
        let Some(node) = self.get_mut(link) else {
            return;
        };
        match failure {
            LinkFailure::Missing => {
                diagnostics::clear_kind(&mut node.diagnostics, DiagnosticKind::BadLinkTarget);
                let detail = if target_id.is_empty() {
                    "link has no targetId".to_string()
                } else {
                    format!("no node with id '{target_id}' in this catalogue or its imports")
                };
                diagnostics::replace_kind(
                    &mut node.diagnostics,
                    DiagnosticKind::UnresolvedLink,
                    vec![Diagnostic::new(DiagnosticKind::UnresolvedLink, detail)],
                );
            }
            LinkFailure::Bad(target, reason) => {
                diagnostics::clear_kind(&mut node.diagnostics, DiagnosticKind::UnresolvedLink);
                diagnostics::replace_kind(
                    &mut node.diagnostics,
                    DiagnosticKind::BadLinkTarget,
                    vec![
                        Diagnostic::new(
                            DiagnosticKind::BadLinkTarget,
                            format!("{reason} ('{target_id}')"),
                        )
                        .with_other(target),
                    ],
                );
            }
        }
    }

    pub(crate) fn bind(&mut self, link: NodeId, target: NodeId) {
        self.unbind(link);
        if let Some(node) = self.get_mut(link) {
            node.target = Some(target);
            diagnostics::clear_kind(&mut node.diagnostics, DiagnosticKind::UnresolvedLink);
            diagnostics::clear_kind(&mut node.diagnostics, DiagnosticKind::BadLinkTarget);
        }
        if let Some(node) = self.get_mut(target) {
            if !node.refs.contains(&link) {
                node.refs.push(link);
            }
        }
    }

    pub(crate) fn unbind(&mut self, link: NodeId) {
        let Some(previous) = self.get_mut(link).and_then(|n| n.target.take()) else {
            return;
        };
        if let Some(node) = self.get_mut(previous) {
            node.refs.retain(|r| *r != link);
        }
    }

    /// Keep a failing link waiting on its target id.
    pub(crate) fn park(&mut self, root: NodeId, link: NodeId) {
        let target_id = self[link].target_id().unwrap_or_default().to_string();
        if let Some(state) = self.states.get_mut(&root) {
            let waiting = state.pending.entry(target_id).or_default();
            if !waiting.contains(&link) {
                waiting.push(link);
            }
        }
    }

    fn prune(&mut self, root: NodeId, link: NodeId) {
        let Some(node) = self.get(link) else {
            return;
        };
        let mut detail = format!(
            "removed {} '{}' -> '{}'",
            node.kind(),
            node.id().unwrap_or_default(),
            node.target_id().unwrap_or_default()
        );
        if let Some(reason) = node
            .diagnostics()
            .iter()
            .find(|d| {
                matches!(
                    d.kind,
                    DiagnosticKind::UnresolvedLink | DiagnosticKind::BadLinkTarget
                )
            })
        {
            detail.push_str(": ");
            detail.push_str(&reason.detail);
        }
        debug!(catalogue = %root, link = %link, "pruning unresolved link");
        if let Some(state) = self.states.get_mut(&root) {
            let diagnostic = Diagnostic::new(DiagnosticKind::UnresolvedLink, detail);
            if !state.pruned.contains(&diagnostic) {
                state.pruned.push(diagnostic);
            }
        }
        self.remove_subtree(link);
    }

    /// Catalogues searched for `root`: itself, then its imports in order.
    pub(crate) fn search_scopes(&self, root: NodeId) -> Vec<NodeId> {
        let mut scopes = vec![root];
        if let Some(state) = self.catalogue_state(root) {
            scopes.extend_from_slice(&state.imports);
        }
        scopes
    }

    /// Find a node by id: the catalogue's own index first, then each import
    /// in import-set order.
    pub fn find_option_by_id(&self, root: NodeId, id: &str) -> Option<NodeId> {
        self.search_scopes(root).into_iter().find_map(|scope| {
            self.catalogue_state(scope)
                .and_then(|state| state.index.lookup(self, id))
        })
    }

    /// Re-derive every diagnostic of the document at `root`.
    pub fn refresh_all(&mut self, root: NodeId) {
        let nodes: Vec<NodeId> = self.descendants(root).collect();
        for node in nodes {
            self.refresh_errors(node);
        }
    }

    /// Recompute the diagnostics of `node` from current graph state.
    ///
    /// Each check replaces its previous verdict; duplicate-id pairs belong to
    /// the index and are left alone.
    pub fn refresh_errors(&mut self, node: NodeId) {
        let Some(current) = self.get(node) else {
            return;
        };
        let kind = current.kind();
        let root = current.catalogue().unwrap_or_else(|| self.root_of(node));

        if kind.is_link() {
            self.refresh_link(root, node);
        }
        if kind == NodeKind::Profile {
            let fresh = self.check_profile_type(root, node);
            self.replace(node, DiagnosticKind::MissingProfileType, fresh);
        }
        if kind.is_query() {
            let (scope, ids) = self.check_query(root, node);
            self.replace(node, DiagnosticKind::InvalidScope, scope);
            self.replace(node, DiagnosticKind::IdNotExist, ids);
        }
        if kind == NodeKind::Constraint {
            let fresh = self.check_sibling_constraints(node);
            self.replace(node, DiagnosticKind::DuplicateConstraintId, fresh);
        }
    }

    fn refresh_link(&mut self, root: NodeId, link: NodeId) {
        if self[link].kind() == NodeKind::CatalogueLink {
            if self.live_target(link).is_some() {
                self.replace(link, DiagnosticKind::UnresolvedLink, Vec::new());
            }
            return;
        }
        match self.live_target(link) {
            Some(target) => match self.check_target(link, target) {
                Ok(_) => {
                    self.replace(link, DiagnosticKind::UnresolvedLink, Vec::new());
                    self.replace(link, DiagnosticKind::BadLinkTarget, Vec::new());
                }
                Err(failure) => self.record_link_failure(link, failure),
            },
            None => {
                let failure = match self.lookup_target(root, link) {
                    Ok(_) => LinkFailure::Missing,
                    Err(failure) => failure,
                };
                self.record_link_failure(link, failure);
            }
        }
    }

    fn check_profile_type(&self, root: NodeId, profile: NodeId) -> Vec<Diagnostic> {
        let node = &self[profile];
        match node.attr_str("typeId").filter(|id| !id.is_empty()) {
            None => vec![Diagnostic::new(
                DiagnosticKind::MissingProfileType,
                format!("profile '{}' has no typeId", node.name().unwrap_or_default()),
            )],
            Some(type_id) => match self.find_option_by_id(root, type_id) {
                Some(found) if self[found].kind() == NodeKind::ProfileType => Vec::new(),
                _ => vec![Diagnostic::new(
                    DiagnosticKind::MissingProfileType,
                    format!("profile type '{type_id}' does not exist"),
                )],
            },
        }
    }

    fn check_query(&mut self, root: NodeId, query: NodeId) -> (Vec<Diagnostic>, Vec<Diagnostic>) {
        let node = &self[query];
        let scope = node.attr_str("scope").map(str::to_string);
        let child_id = node.attr_str("childId").map(str::to_string);
        let field = node.attr_str("field").map(str::to_string);

        let mut scope_errors = Vec::new();
        if let Some(scope) = scope.filter(|s| !s.is_empty()) {
            if !self.scope_is_valid(query, &scope) {
                scope_errors.push(Diagnostic::new(
                    DiagnosticKind::InvalidScope,
                    format!("scope '{scope}' is neither a keyword nor reachable"),
                ));
            }
        }

        let mut id_errors = Vec::new();
        if let Some(child_id) = child_id.filter(|c| !c.is_empty() && !is_child_keyword(c)) {
            match self.find_option_by_id(root, &child_id) {
                Some(target) => {
                    if let Some(target) = self.get_mut(target) {
                        if !target.other_refs.contains(&query) {
                            target.other_refs.push(query);
                        }
                    }
                }
                None => id_errors.push(Diagnostic::new(
                    DiagnosticKind::IdNotExist,
                    format!("childId '{child_id}' does not exist"),
                )),
            }
        }
        if let Some(field) = field.filter(|f| !f.is_empty() && !is_field_keyword(f)) {
            if self.find_option_by_id(root, &field).is_none() {
                id_errors.push(Diagnostic::new(
                    DiagnosticKind::IdNotExist,
                    format!("field '{field}' does not exist"),
                ));
            }
        }
        (scope_errors, id_errors)
    }

    fn check_sibling_constraints(&self, constraint: NodeId) -> Vec<Diagnostic> {
        let node = &self[constraint];
        let (Some(id), Some(parent)) = (node.id(), node.parent()) else {
            return Vec::new();
        };
        self[parent]
            .children("constraints")
            .iter()
            .filter(|other| **other != constraint && self[**other].id() == Some(id))
            .map(|other| {
                Diagnostic::new(
                    DiagnosticKind::DuplicateConstraintId,
                    format!("constraint id '{id}' is repeated on the same parent"),
                )
                .with_other(*other)
            })
            .collect()
    }

    fn replace(&mut self, node: NodeId, kind: DiagnosticKind, fresh: Vec<Diagnostic>) {
        if let Some(node) = self.get_mut(node) {
            diagnostics::replace_kind(&mut node.diagnostics, kind, fresh);
        }
    }

    /// Every diagnostic in the document at `root`, in tree order, followed
    /// by the catalogue-level records of pruned links (reported on `root`).
    pub fn diagnostics(&self, root: NodeId) -> Vec<(NodeId, &Diagnostic)> {
        let pruned = self
            .catalogue_state(root)
            .map(|state| state.pruned.as_slice())
            .unwrap_or(&[]);
        self.descendants(root)
            .flat_map(|id| self[id].diagnostics().iter().map(move |d| (id, d)))
            .chain(pruned.iter().map(|d| (root, d)))
            .collect()
    }

    /// The document root a node has been indexed under.
    pub fn catalogue_of(&self, node: NodeId) -> Result<NodeId> {
        self.get(node)
            .ok_or_else(|| anyhow!("{node} does not exist"))?
            .catalogue()
            .ok_or_else(|| anyhow!("{node} is not indexed under a catalogue"))
    }
}

/// Node kinds each link kind may point at.
fn link_accepts(link: NodeKind, target: NodeKind) -> bool {
    match link {
        NodeKind::EntryLink => matches!(target, NodeKind::Entry | NodeKind::Group),
        NodeKind::InfoLink => matches!(
            target,
            NodeKind::Rule | NodeKind::Profile | NodeKind::InfoGroup
        ),
        NodeKind::CategoryLink => matches!(target, NodeKind::Category | NodeKind::Force),
        NodeKind::CatalogueLink => target.is_root(),
        _ => false,
    }
}

/// Fields counted without naming a node.
fn is_field_keyword(field: &str) -> bool {
    matches!(field, "selections" | "forces")
}

/// childId values that select a class of entries rather than one node.
fn is_child_keyword(child_id: &str) -> bool {
    matches!(child_id, "any" | "unit" | "model" | "upgrade" | "model-or-unit")
}
