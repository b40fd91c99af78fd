//! Asynchronous loading of a document and everything it imports.
//!
//! The [`Loader`] owns the session [`Graph`] behind a mutex and fetches
//! dependencies through a [`CatalogueProvider`]. Sibling catalogue links are
//! fetched concurrently; every load goes through one table keyed by
//! [`CatalogueKey`], so concurrent requests for the same document share a
//! single load and a failed load stays failed. The graph lock is never held
//! across an await.

use crate::catalog::identity::{CatalogueKey, NodeId, NodeKind};
use crate::catalog::model::Graph;
use crate::catalog::repository::CatalogueRepository;
use crate::catalog::resolve::ResolveReport;
use crate::format::{self, Record};
use crate::settings::Settings;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Source of raw documents plus a memo of the ones already loaded.
///
/// The memo methods default to "remember nothing"; the loader falls back to
/// the graph's own document table.
#[async_trait]
pub trait CatalogueProvider: Send + Sync {
    /// Fetch the normalized record for `id`, pinned to `book_date` if given.
    async fn get_data(&self, id: &str, book_date: Option<&str>) -> Result<Record>;

    fn get_loaded_catalogue(&self, _key: &CatalogueKey) -> Option<NodeId> {
        None
    }

    fn add_loaded_catalogue(&self, _key: CatalogueKey, _root: NodeId) {}

    fn add_loaded_system(&self, _key: CatalogueKey, _root: NodeId) {}
}

/// Provider over records held in memory. Counts fetches.
#[derive(Default)]
pub struct MemoryProvider {
    records: Mutex<CatalogueRepository>,
    loaded: Mutex<HashMap<CatalogueKey, NodeId>>,
    systems: Mutex<Vec<CatalogueKey>>,
    fetches: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `record` available under its root id and `date`.
    pub fn insert(&self, record: Record, date: Option<String>) -> Result<CatalogueKey> {
        let id = root_id(&record)?;
        let key = CatalogueKey::new(id, date);
        self.records.lock().register(key.clone(), record);
        Ok(key)
    }

    /// Number of `get_data` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn is_system(&self, key: &CatalogueKey) -> bool {
        self.systems.lock().contains(key)
    }
}

#[async_trait]
impl CatalogueProvider for MemoryProvider {
    async fn get_data(&self, id: &str, book_date: Option<&str>) -> Result<Record> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .find(id, book_date)
            .cloned()
            .ok_or_else(|| anyhow!("catalogue {id} is not available"))
    }

    fn get_loaded_catalogue(&self, key: &CatalogueKey) -> Option<NodeId> {
        self.loaded.lock().get(key).copied()
    }

    fn add_loaded_catalogue(&self, key: CatalogueKey, root: NodeId) {
        self.loaded.lock().insert(key, root);
    }

    fn add_loaded_system(&self, key: CatalogueKey, root: NodeId) {
        self.systems.lock().push(key.clone());
        self.loaded.lock().insert(key, root);
    }
}

type LoadOutcome = std::result::Result<NodeId, Arc<anyhow::Error>>;
type InFlight = Shared<BoxFuture<'static, LoadOutcome>>;

/// Loads started this session, plus the dependencies each unfinished load
/// is currently waiting on.
#[derive(Default)]
struct LoadTable {
    in_flight: HashMap<CatalogueKey, InFlight>,
    waits: HashMap<CatalogueKey, HashSet<CatalogueKey>>,
}

impl LoadTable {
    /// Whether `from` already waits, directly or transitively, on `to`.
    fn waits_on(&self, from: &CatalogueKey, to: &CatalogueKey) -> bool {
        let mut seen: HashSet<&CatalogueKey> = HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(next) = self.waits.get(current) {
                stack.extend(next);
            }
        }
        false
    }
}

/// Loads documents into one shared graph.
///
/// Every load of a key, top-level or as a dependency, goes through one
/// shared future, so a failure is reported to every caller and a load only
/// completes once its whole dependency tree has.
pub struct Loader<P> {
    graph: Arc<Mutex<Graph>>,
    provider: Arc<P>,
    book_dates: Arc<HashMap<String, String>>,
    table: Arc<Mutex<LoadTable>>,
}

impl<P> Clone for Loader<P> {
    fn clone(&self) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            provider: Arc::clone(&self.provider),
            book_dates: Arc::clone(&self.book_dates),
            table: Arc::clone(&self.table),
        }
    }
}

impl<P: CatalogueProvider + 'static> Loader<P> {
    pub fn new(provider: Arc<P>, settings: Settings) -> Self {
        Self {
            graph: Arc::new(Mutex::new(Graph::new(settings))),
            provider,
            book_dates: Arc::new(HashMap::new()),
            table: Arc::new(Mutex::new(LoadTable::default())),
        }
    }

    /// Pin individual ids to a dated copy.
    pub fn with_book_dates(mut self, dates: HashMap<String, String>) -> Self {
        self.book_dates = Arc::new(dates);
        self
    }

    pub fn graph(&self) -> Arc<Mutex<Graph>> {
        Arc::clone(&self.graph)
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Load `record` and, recursively, its game system and catalogue links.
    ///
    /// If a load of the same key is already running or finished, its
    /// outcome is returned and `record` is ignored.
    pub async fn load(&self, record: Record) -> Result<NodeId> {
        let id = root_id(&record)?;
        let key = self.key_for(&id);
        self.shared_load(key, Some(record)).await.map_err(|err| anyhow!("{err:#}"))
    }

    /// [`Loader::load`] followed by [`Graph::process`] on the result.
    pub async fn load_and_process(&self, record: Record) -> Result<(NodeId, ResolveReport)> {
        let root = self.load(record).await?;
        let report = self.graph.lock().process(root)?;
        Ok((root, report))
    }

    /// Fetch and load `id` through the provider, sharing any load of the
    /// same key already in flight.
    pub async fn load_id(&self, id: &str) -> Result<NodeId> {
        let key = self.key_for(id);
        self.shared_load(key, None).await.map_err(|err| anyhow!("{err:#}"))
    }

    fn key_for(&self, id: &str) -> CatalogueKey {
        CatalogueKey::new(id, self.book_dates.get(id).cloned())
    }

    fn loaded_root(&self, key: &CatalogueKey) -> Option<NodeId> {
        let graph = self.graph.lock();
        graph
            .document(key)
            .filter(|root| graph.catalogue_state(*root).is_some_and(|s| s.is_loaded()))
    }

    /// The shared load of `key`, started with `record` (or a provider
    /// fetch) if nothing has started it yet.
    fn shared_load(&self, key: CatalogueKey, record: Option<Record>) -> InFlight {
        let mut table = self.table.lock();
        if let Some(pending) = table.in_flight.get(&key) {
            debug!(catalogue = %key, "joining load");
            return pending.clone();
        }
        if let Some(root) = self.loaded_root(&key) {
            return future::ready(Ok(root)).boxed().shared();
        }
        let this = self.clone();
        let load_key = key.clone();
        let pending = async move { this.load_keyed(load_key, record).await.map_err(Arc::new) }
            .boxed()
            .shared();
        table.in_flight.insert(key, pending.clone());
        pending
    }

    /// Wait for dependency `id` of the load of `dependent`.
    ///
    /// A dependency that is itself waiting on `dependent` closes a cycle:
    /// its document is already in the graph, so it is returned without
    /// waiting.
    fn dependency(&self, dependent: &CatalogueKey, id: &str) -> InFlight {
        let key = self.key_for(id);
        {
            let mut table = self.table.lock();
            if table.waits_on(&key, dependent) {
                let existing = self.graph.lock().document(&key);
                if let Some(root) = existing {
                    debug!(catalogue = %key, from = %dependent, "cyclic import");
                    return future::ready(Ok(root)).boxed().shared();
                }
            }
            table.waits.entry(dependent.clone()).or_default().insert(key.clone());
        }
        self.shared_load(key, None)
    }

    async fn load_keyed(&self, key: CatalogueKey, record: Option<Record>) -> Result<NodeId> {
        if let Some(root) = self.provider.get_loaded_catalogue(&key) {
            return Ok(root);
        }
        let existing = self.graph.lock().document(&key);
        let root = match existing {
            Some(root) => root,
            None => {
                let record = match record {
                    Some(record) => record,
                    None => self
                        .provider
                        .get_data(&key.id, key.date.as_deref())
                        .await
                        .with_context(|| format!("fetching catalogue {key}"))?,
                };
                self.graph.lock().insert_document(&record, key.date.clone())?
            }
        };

        let outcome = self.load_dependencies(&key, root).await;
        self.table.lock().waits.remove(&key);
        outcome?;

        let kind = {
            let mut graph = self.graph.lock();
            graph.state_mut(root)?.loaded = true;
            graph[root].kind()
        };
        match kind {
            NodeKind::GameSystem => self.provider.add_loaded_system(key.clone(), root),
            _ => self.provider.add_loaded_catalogue(key.clone(), root),
        }
        info!(catalogue = %key, kind = %kind, "loaded document");
        Ok(root)
    }

    /// Load the game system of `root` first, then its catalogue links
    /// concurrently.
    async fn load_dependencies(&self, key: &CatalogueKey, root: NodeId) -> Result<()> {
        let (system, links) = self.declared_dependencies(root);
        if let Some(system) = system {
            self.dependency(key, &system).await.map_err(|err| anyhow!("{err:#}"))?;
        }
        let pending: Vec<InFlight> = links.iter().map(|id| self.dependency(key, id)).collect();
        future::try_join_all(pending).await.map_err(|err| anyhow!("{err:#}"))?;
        Ok(())
    }

    /// Game system id and catalogue-link target ids of `root`, without
    /// self-references.
    fn declared_dependencies(&self, root: NodeId) -> (Option<String>, Vec<String>) {
        let graph = self.graph.lock();
        let node = &graph[root];
        let own = node.id().unwrap_or_default();
        let system = node
            .attr_str("gameSystemId")
            .filter(|id| *id != own)
            .map(str::to_string);
        let mut links: Vec<String> = Vec::new();
        for link in node.children("catalogueLinks") {
            let Some(target) = graph[*link].target_id() else {
                continue;
            };
            if target != own && !links.iter().any(|l| l == target) {
                links.push(target.to_string());
            }
        }
        (system, links)
    }
}

fn root_id(record: &Record) -> Result<String> {
    let (kind, root) = format::root_of(record)
        .ok_or_else(|| anyhow!("record has neither a catalogue nor a gameSystem root"))?;
    root.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{kind} root has no id"))
}
