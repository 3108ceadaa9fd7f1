// src/store/mod.rs

//! Abstract document repository.
//!
//! The orchestration core persists jobs, nodes, execution graphs, retry
//! policies and recovery audits as JSON documents grouped into named
//! collections. Production deployments plug a real document database in
//! behind [`DocumentStore`]; [`memory::MemoryStore`] backs tests and the CLI.

use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod repository;

pub use memory::MemoryStore;
pub use repository::Repository;

/// Collection names used by the core.
pub mod collections {
    pub const JOBS: &str = "jobs";
    pub const NODES: &str = "nodes";
    pub const EXECUTION_GRAPHS: &str = "execution_graphs";
    pub const RETRY_POLICIES: &str = "retry_policies";
    pub const RECOVERY_AUDITS: &str = "recovery_audits";
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate key '{key}' in collection '{collection}'")]
    DuplicateKey { collection: String, key: String },

    #[error(
        "revision conflict on '{collection}/{key}': expected {expected:?}, found {actual:?}"
    )]
    RevisionConflict {
        collection: String,
        key: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A stored document with its optimistic-concurrency revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: String,
    pub revision: u64,
    pub body: Value,
}

/// Equality filter over top-level document fields.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    equals: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.equals.push((field.to_string(), value.into()));
        self
    }

    pub fn matches(&self, body: &Value) -> bool {
        self.equals
            .iter()
            .all(|(field, expected)| body.get(field) == Some(expected))
    }
}

/// Repository contract consumed by the orchestration core.
pub trait DocumentStore: Send + Sync + Debug {
    /// Insert a new document; fails if the key already exists.
    fn insert(&self, collection: &str, key: &str, body: Value) -> StoreResult<u64>;

    fn find_one(&self, collection: &str, key: &str) -> StoreResult<Option<Document>>;

    fn find_many(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>>;

    /// Insert or replace, returning the new revision.
    fn upsert(&self, collection: &str, key: &str, body: Value) -> StoreResult<u64>;

    /// Insert or replace only if the stored revision equals `expected`
    /// (`None` meaning "must not exist yet").
    fn upsert_if_revision(
        &self,
        collection: &str,
        key: &str,
        body: Value,
        expected: Option<u64>,
    ) -> StoreResult<u64>;

    /// Delete the given keys, returning how many existed.
    fn delete_many(&self, collection: &str, keys: &[String]) -> StoreResult<usize>;
}

/// Load and deserialize a single document.
pub fn load<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.find_one(collection, key)? {
        Some(doc) => Ok(Some(serde_json::from_value(doc.body)?)),
        None => Ok(None),
    }
}

/// Load and deserialize every document matching `filter`.
pub fn load_many<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    filter: &Filter,
) -> StoreResult<Vec<T>> {
    store
        .find_many(collection, filter)?
        .into_iter()
        .map(|doc| serde_json::from_value(doc.body).map_err(StoreError::from))
        .collect()
}

/// Serialize and upsert a value.
pub fn save<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
    value: &T,
) -> StoreResult<u64> {
    let body = serde_json::to_value(value)?;
    store.upsert(collection, key, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_top_level_fields() {
        let body = json!({"job_id": "j1", "status": "running", "priority": 5});
        assert!(Filter::all().matches(&body));
        assert!(Filter::all().eq("job_id", "j1").eq("priority", 5).matches(&body));
        assert!(!Filter::all().eq("status", "failed").matches(&body));
        assert!(!Filter::all().eq("missing", "x").matches(&body));
    }
}
