//! Typed node arena built from normalized records.
//!
//! Every loaded document lives in one [`Graph`]. Nodes own their children
//! through handle lists; `parent`, `target`, `refs` and `other_refs` are plain
//! handles, so the cyclic catalogue graph never needs shared ownership.
//! Removal tombstones a slot; handles are never recycled.

use crate::catalog::identity::{CatalogueKey, NodeId, NodeKind};
use crate::catalog::index::IdIndex;
use crate::catalog::schema;
use crate::diagnostics::Diagnostic;
use crate::format::{self, Record};
use crate::record_schema::validate_record;
use crate::settings::Settings;
use crate::views::CatalogueViews;
use anyhow::{Result, anyhow, bail};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::ops::Index;

#[derive(Clone, Debug)]
/// One typed record in the arena.
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) attrs: Map<String, Value>,
    pub(crate) children: IndexMap<&'static str, Vec<NodeId>>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) catalogue: Option<NodeId>,
    pub(crate) target: Option<NodeId>,
    pub(crate) refs: Vec<NodeId>,
    pub(crate) other_refs: Vec<NodeId>,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl Node {
    fn new(kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            kind,
            attrs: Map::new(),
            children: IndexMap::new(),
            parent,
            catalogue: None,
            target: None,
            refs: Vec::new(),
            other_refs: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn id(&self) -> Option<&str> {
        self.attr_str("id").filter(|id| !id.is_empty())
    }

    /// Own name; links report their target's name through the graph.
    pub fn name(&self) -> Option<&str> {
        self.attr_str("name")
    }

    /// The `type` attribute (entry type, link type, condition comparison, ...).
    pub fn type_attr(&self) -> Option<&str> {
        self.attr_str("type")
    }

    pub fn target_id(&self) -> Option<&str> {
        self.attr_str("targetId").filter(|id| !id.is_empty())
    }

    pub fn hidden(&self) -> bool {
        self.attr_bool("hidden")
    }

    pub fn comment(&self) -> Option<&str> {
        self.attrs.get("comment").and_then(format::text_of)
    }

    pub fn description(&self) -> Option<&str> {
        self.attrs.get("description").and_then(format::text_of)
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    pub fn attrs(&self) -> &Map<String, Value> {
        &self.attrs
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    /// Numeric attribute; numeric strings are accepted as well.
    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        match self.attrs.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn attr_bool(&self, key: &str) -> bool {
        match self.attrs.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        }
    }

    pub(crate) fn set_attr(&mut self, key: &str, value: Value) {
        self.attrs.insert(key.to_string(), value);
    }

    pub fn children(&self, key: &str) -> &[NodeId] {
        self.children.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Child collections in declaration order.
    pub fn collections(&self) -> impl Iterator<Item = (&'static str, &[NodeId])> {
        self.children.iter().map(|(key, ids)| (*key, ids.as_slice()))
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn catalogue(&self) -> Option<NodeId> {
        self.catalogue
    }

    /// Resolved link target, if any.
    pub fn target(&self) -> Option<NodeId> {
        self.target
    }

    /// Links that resolved to this node.
    pub fn refs(&self) -> &[NodeId] {
        &self.refs
    }

    /// Queries whose childId names this node.
    pub fn other_refs(&self) -> &[NodeId] {
        &self.other_refs
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

#[derive(Debug, Default)]
/// Per-document bookkeeping for catalogue and game-system roots.
pub struct CatalogueState {
    pub(crate) key: CatalogueKey,
    pub(crate) game_system: Option<NodeId>,
    pub(crate) imports: Vec<NodeId>,
    pub(crate) imports_with_entries: Vec<NodeId>,
    pub(crate) index: IdIndex,
    /// Links still waiting on a target id, keyed by that id.
    pub(crate) pending: BTreeMap<String, Vec<NodeId>>,
    pub(crate) pruned: Vec<Diagnostic>,
    pub(crate) views: Option<CatalogueViews>,
    pub(crate) loaded: bool,
    pub(crate) initialized: bool,
    pub(crate) initializing: bool,
}

impl CatalogueState {
    fn new(key: CatalogueKey) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    pub fn key(&self) -> &CatalogueKey {
        &self.key
    }

    pub fn game_system(&self) -> Option<NodeId> {
        self.game_system
    }

    /// Transitive imports in resolution order (game system first).
    pub fn imports(&self) -> &[NodeId] {
        &self.imports
    }

    /// Imports whose root entries count as units of this catalogue.
    pub fn imports_with_entries(&self) -> &[NodeId] {
        &self.imports_with_entries
    }

    pub fn index(&self) -> &IdIndex {
        &self.index
    }

    /// Links retained while their target id is missing.
    pub fn pending(&self) -> &BTreeMap<String, Vec<NodeId>> {
        &self.pending
    }

    /// Diagnostics of links pruned during resolution.
    pub fn pruned(&self) -> &[Diagnostic] {
        &self.pruned
    }

    pub fn views(&self) -> Option<&CatalogueViews> {
        self.views.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

#[derive(Debug, Default)]
/// Arena holding every document of one load session.
pub struct Graph {
    nodes: Vec<Option<Node>>,
    documents: IndexMap<CatalogueKey, NodeId>,
    pub(crate) states: HashMap<NodeId, CatalogueState>,
    pub(crate) session_index: IdIndex,
    settings: Settings,
}

impl Graph {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Live node handles in allocation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(idx, _)| NodeId(idx as u32))
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loaded documents keyed by id and book date, in load order.
    pub fn documents(&self) -> impl Iterator<Item = (&CatalogueKey, NodeId)> {
        self.documents.iter().map(|(key, id)| (key, *id))
    }

    pub fn document(&self, key: &CatalogueKey) -> Option<NodeId> {
        self.documents.get(key).copied()
    }

    /// First loaded document with `id`, whatever its book date.
    pub fn document_by_id(&self, id: &str) -> Option<NodeId> {
        self.documents
            .iter()
            .find(|(key, _)| key.id == id)
            .map(|(_, node)| *node)
    }

    pub fn catalogue_state(&self, root: NodeId) -> Option<&CatalogueState> {
        self.states.get(&root)
    }

    pub(crate) fn state_mut(&mut self, root: NodeId) -> Result<&mut CatalogueState> {
        self.states
            .get_mut(&root)
            .ok_or_else(|| anyhow!("{root} is not a loaded catalogue"))
    }

    /// Topmost owner of `id` (the document root for attached nodes).
    pub fn root_of(&self, mut id: NodeId) -> NodeId {
        while let Some(parent) = self.get(id).and_then(Node::parent) {
            id = parent;
        }
        id
    }

    /// Owning parents, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.get(id).and_then(Node::parent), move |current| {
            self.get(*current).and_then(Node::parent)
        })
    }

    pub fn is_ancestor(&self, ancestor: NodeId, of: NodeId) -> bool {
        self.ancestors(of).any(|id| id == ancestor)
    }

    /// Type a normalized document record and register it under `date`.
    ///
    /// The record is validated against the envelope schema first; the tree is
    /// not indexed or resolved until [`Graph::process`] runs.
    pub fn insert_document(&mut self, record: &Record, date: Option<String>) -> Result<NodeId> {
        validate_record(record)?;
        let (kind, obj) = format::root_of(record)
            .ok_or_else(|| anyhow!("record has neither a catalogue nor a gameSystem root"))?;
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("{kind} root has no id"))?;
        let key = CatalogueKey::new(id, date);
        if self.documents.contains_key(&key) {
            bail!("catalogue {key} is already loaded");
        }
        let root = self.build(kind, obj, None);
        self.documents.insert(key.clone(), root);
        self.states.insert(root, CatalogueState::new(key));
        Ok(root)
    }

    /// Type `record` as a new child of `parent` under collection `key`.
    ///
    /// The subtree is attached but not indexed; see [`Graph::add_child`].
    pub(crate) fn attach_record(
        &mut self,
        parent: NodeId,
        key: &str,
        record: &Map<String, Value>,
    ) -> Result<NodeId> {
        let parent_kind = self
            .get(parent)
            .map(Node::kind)
            .ok_or_else(|| anyhow!("{parent} does not exist"))?;
        let (slot, kind) = collection_slot(parent_kind, key)
            .ok_or_else(|| anyhow!("{parent_kind} cannot hold '{key}'"))?;
        let child = self.build(kind, record, Some(parent));
        self.push_child(parent, slot, child);
        Ok(child)
    }

    fn build(
        &mut self,
        kind: NodeKind,
        obj: &Map<String, Value>,
        parent: Option<NodeId>,
    ) -> NodeId {
        let id = self.alloc(Node::new(kind, parent));
        let mut attrs = Map::new();
        let mut collections: Vec<(&'static str, NodeKind, &Vec<Value>)> = Vec::new();
        for (key, value) in obj {
            match value {
                Value::Array(items) if !schema::is_text_key(key) => {
                    if let Some((slot, child_kind)) = collection_slot(kind, key) {
                        collections.push((slot, child_kind, items));
                    }
                }
                Value::Object(_) | Value::Null => {}
                _ => {
                    attrs.insert(key.clone(), value.clone());
                }
            }
        }
        // Children are typed in schema order so serialization is stable.
        collections.sort_by_key(|(slot, _, _)| {
            schema::allowed_children(kind)
                .iter()
                .position(|key| key == slot)
                .unwrap_or(usize::MAX)
        });
        if let Some(node) = self.get_mut(id) {
            node.attrs = attrs;
        }
        for (slot, child_kind, items) in collections {
            for item in items {
                if let Some(item) = item.as_object() {
                    let child = self.build(child_kind, item, Some(id));
                    self.push_child(id, slot, child);
                }
            }
        }
        id
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }

    pub(crate) fn push_child(&mut self, parent: NodeId, key: &'static str, child: NodeId) {
        if let Some(node) = self.get_mut(parent) {
            node.children.entry(key).or_default().push(child);
        }
    }

    /// Insert `child` right after `sibling` in the same collection.
    pub(crate) fn insert_child_after(&mut self, sibling: NodeId, child: NodeId) {
        let Some(parent) = self.get(sibling).and_then(Node::parent) else {
            return;
        };
        if let Some(node) = self.get_mut(parent) {
            for list in node.children.values_mut() {
                if let Some(pos) = list.iter().position(|id| *id == sibling) {
                    list.insert(pos + 1, child);
                    return;
                }
            }
        }
    }

    pub(crate) fn detach_from_parent(&mut self, child: NodeId) {
        let Some(parent) = self.get(child).and_then(Node::parent) else {
            return;
        };
        if let Some(node) = self.get_mut(parent) {
            for list in node.children.values_mut() {
                list.retain(|id| *id != child);
            }
            node.children.retain(|_, list| !list.is_empty());
        }
    }

    pub(crate) fn tombstone(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(id.index()) {
            *slot = None;
        }
    }

    /// Deep-copy the subtree at `source` under `parent` (same collection key).
    ///
    /// The copy has no resolution state; it is attached right after `source`.
    pub(crate) fn clone_subtree(&mut self, source: NodeId) -> Option<NodeId> {
        let parent = self.get(source)?.parent;
        let copy = self.copy_node(source, parent)?;
        self.insert_child_after(source, copy);
        Some(copy)
    }

    fn copy_node(&mut self, source: NodeId, parent: Option<NodeId>) -> Option<NodeId> {
        let (kind, attrs, collections) = {
            let node = self.get(source)?;
            let collections: Vec<(&'static str, Vec<NodeId>)> = node
                .children
                .iter()
                .map(|(key, ids)| (*key, ids.clone()))
                .collect();
            (node.kind, node.attrs.clone(), collections)
        };
        let mut node = Node::new(kind, parent);
        node.attrs = attrs;
        let copy = self.alloc(node);
        for (key, ids) in collections {
            for child in ids {
                if let Some(child_copy) = self.copy_node(child, Some(copy)) {
                    self.push_child(copy, key, child_copy);
                }
            }
        }
        Some(copy)
    }

    /// Write a document back to a normalized record.
    ///
    /// Only schema-whitelisted scalar fields and declared collections are
    /// kept; resolution and view state never leaks into the record.
    pub fn to_record(&self, root: NodeId) -> Result<Record> {
        let node = self.get(root).ok_or_else(|| anyhow!("{root} does not exist"))?;
        if !node.kind.is_root() {
            bail!("{root} is a {}, not a document root", node.kind);
        }
        let mut out = Map::new();
        out.insert(node.kind.as_str().to_string(), Value::Object(self.node_record(root)));
        Ok(Value::Object(out))
    }

    /// Whitelisted record of a single subtree.
    pub fn node_record(&self, id: NodeId) -> Map<String, Value> {
        let mut out = Map::new();
        let Some(node) = self.get(id) else {
            return out;
        };
        for (key, value) in &node.attrs {
            if schema::is_serialized_field(key) {
                out.insert(key.clone(), value.clone());
            }
        }
        for (key, ids) in &node.children {
            let items = ids
                .iter()
                .filter(|child| self.contains(**child))
                .map(|child| Value::Object(self.node_record(*child)))
                .collect();
            out.insert((*key).to_string(), Value::Array(items));
        }
        out
    }
}

impl Index<NodeId> for Graph {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        match self.get(id) {
            Some(node) => node,
            None => panic!("node {id} was removed from the graph"),
        }
    }
}

fn collection_slot(kind: NodeKind, key: &str) -> Option<(&'static str, NodeKind)> {
    let slot = schema::allowed_children(kind).iter().find(|k| **k == key)?;
    let child_kind = schema::child_kind(kind, key)?;
    Some((*slot, child_kind))
}
