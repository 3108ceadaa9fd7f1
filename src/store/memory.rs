// src/store/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::trace;

use super::{Document, DocumentStore, Filter, StoreError, StoreResult};

type Collection = BTreeMap<String, (u64, Value)>;

/// In-memory [`DocumentStore`]. Cloning shares the underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: Arc<Mutex<HashMap<String, Collection>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.lock().get(collection).map(|c| c.len()).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Collection>> {
        self.collections.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DocumentStore for MemoryStore {
    fn insert(&self, collection: &str, key: &str, body: Value) -> StoreResult<u64> {
        let mut guard = self.lock();
        let docs = guard.entry(collection.to_string()).or_default();
        if docs.contains_key(key) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                key: key.to_string(),
            });
        }
        docs.insert(key.to_string(), (1, body));
        trace!(collection, key, "inserted document");
        Ok(1)
    }

    fn find_one(&self, collection: &str, key: &str) -> StoreResult<Option<Document>> {
        let guard = self.lock();
        Ok(guard
            .get(collection)
            .and_then(|docs| docs.get(key))
            .map(|(revision, body)| Document {
                key: key.to_string(),
                revision: *revision,
                body: body.clone(),
            }))
    }

    fn find_many(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        let guard = self.lock();
        let Some(docs) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, (_, body))| filter.matches(body))
            .map(|(key, (revision, body))| Document {
                key: key.clone(),
                revision: *revision,
                body: body.clone(),
            })
            .collect())
    }

    fn upsert(&self, collection: &str, key: &str, body: Value) -> StoreResult<u64> {
        let mut guard = self.lock();
        let docs = guard.entry(collection.to_string()).or_default();
        let revision = docs.get(key).map(|(rev, _)| rev + 1).unwrap_or(1);
        docs.insert(key.to_string(), (revision, body));
        trace!(collection, key, revision, "upserted document");
        Ok(revision)
    }

    fn upsert_if_revision(
        &self,
        collection: &str,
        key: &str,
        body: Value,
        expected: Option<u64>,
    ) -> StoreResult<u64> {
        let mut guard = self.lock();
        let docs = guard.entry(collection.to_string()).or_default();
        let actual = docs.get(key).map(|(rev, _)| *rev);
        if actual != expected {
            return Err(StoreError::RevisionConflict {
                collection: collection.to_string(),
                key: key.to_string(),
                expected,
                actual,
            });
        }
        let revision = actual.map(|r| r + 1).unwrap_or(1);
        docs.insert(key.to_string(), (revision, body));
        Ok(revision)
    }

    fn delete_many(&self, collection: &str, keys: &[String]) -> StoreResult<usize> {
        let mut guard = self.lock();
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(0);
        };
        Ok(keys.iter().filter(|k| docs.remove(k.as_str()).is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_rejects_duplicates() {
        let store = MemoryStore::new();
        store.insert("jobs", "a", json!({"x": 1})).unwrap();
        let err = store.insert("jobs", "a", json!({"x": 2})).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[test]
    fn upsert_bumps_revision() {
        let store = MemoryStore::new();
        assert_eq!(store.upsert("jobs", "a", json!({"x": 1})).unwrap(), 1);
        assert_eq!(store.upsert("jobs", "a", json!({"x": 2})).unwrap(), 2);
        let doc = store.find_one("jobs", "a").unwrap().unwrap();
        assert_eq!(doc.revision, 2);
        assert_eq!(doc.body, json!({"x": 2}));
    }

    #[test]
    fn optimistic_upsert_detects_conflicts() {
        let store = MemoryStore::new();
        store.upsert_if_revision("jobs", "a", json!({}), None).unwrap();
        let err = store
            .upsert_if_revision("jobs", "a", json!({}), None)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::RevisionConflict { actual: Some(1), .. }
        ));
        assert_eq!(
            store.upsert_if_revision("jobs", "a", json!({}), Some(1)).unwrap(),
            2
        );
    }

    #[test]
    fn delete_many_counts_existing_keys() {
        let store = MemoryStore::new();
        store.upsert("nodes", "a", json!({})).unwrap();
        store.upsert("nodes", "b", json!({})).unwrap();
        let removed = store
            .delete_many("nodes", &["a".to_string(), "zzz".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count("nodes"), 1);
    }
}
