use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde_json::Value;
use suiteflow::store::{Document, DocumentStore, Filter, MemoryStore, StoreError, StoreResult};

/// A `MemoryStore` whose writes can be made to fail on demand.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    rejected: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Writes refused so far.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl DocumentStore for FlakyStore {
    fn insert(&self, collection: &str, key: &str, body: Value) -> StoreResult<u64> {
        self.check()?;
        self.inner.insert(collection, key, body)
    }

    fn find_one(&self, collection: &str, key: &str) -> StoreResult<Option<Document>> {
        self.inner.find_one(collection, key)
    }

    fn find_many(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        self.inner.find_many(collection, filter)
    }

    fn upsert(&self, collection: &str, key: &str, body: Value) -> StoreResult<u64> {
        self.check()?;
        self.inner.upsert(collection, key, body)
    }

    fn upsert_if_revision(
        &self,
        collection: &str,
        key: &str,
        body: Value,
        expected: Option<u64>,
    ) -> StoreResult<u64> {
        self.check()?;
        self.inner.upsert_if_revision(collection, key, body, expected)
    }

    fn delete_many(&self, collection: &str, keys: &[String]) -> StoreResult<usize> {
        self.check()?;
        self.inner.delete_many(collection, keys)
    }
}
