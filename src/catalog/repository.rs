//! Holds fetched catalogue records for lookup by key.
//!
//! Providers keep one of these as their memo of already-fetched documents so
//! a session never asks the backing store twice for the same key.

use crate::catalog::identity::CatalogueKey;
use crate::format::Record;
use std::collections::BTreeMap;

#[derive(Default)]
/// In-memory store for catalogue records keyed by `CatalogueKey`.
pub struct CatalogueRepository {
    records: BTreeMap<CatalogueKey, Record>,
}

impl CatalogueRepository {
    /// Register a record; a later record for the same key replaces it.
    pub fn register(&mut self, key: CatalogueKey, record: Record) {
        self.records.insert(key, record);
    }

    /// Fetch a record by exact key, if present.
    pub fn get(&self, key: &CatalogueKey) -> Option<&Record> {
        self.records.get(key)
    }

    /// Fetch by id: the exact date when one is given, otherwise the latest
    /// dated copy, or the undated one when no dated copy exists.
    pub fn find(&self, id: &str, date: Option<&str>) -> Option<&Record> {
        if let Some(date) = date {
            return self.get(&CatalogueKey::new(id, Some(date.to_string())));
        }
        self.records
            .range(CatalogueKey::new(id, None)..)
            .take_while(|(key, _)| key.id == id)
            .last()
            .map(|(_, record)| record)
    }

    pub fn contains(&self, key: &CatalogueKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CatalogueKey> {
        self.records.keys()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn undated_lookup_prefers_the_latest_copy() {
        let mut repo = CatalogueRepository::default();
        repo.register(CatalogueKey::new("a", Some("2024-01-01".into())), json!({"v": 1}));
        repo.register(CatalogueKey::new("a", Some("2025-06-01".into())), json!({"v": 2}));
        repo.register(CatalogueKey::new("b", None), json!({"v": 3}));

        assert_eq!(repo.find("a", None), Some(&json!({"v": 2})));
        assert_eq!(repo.find("a", Some("2024-01-01")), Some(&json!({"v": 1})));
        assert_eq!(repo.find("b", None), Some(&json!({"v": 3})));
        assert_eq!(repo.find("c", None), None);
        assert_eq!(repo.len(), 3);
    }
}
