use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod paths;
pub mod postgres;

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Write conflict at {0}")]
    Conflict(String),

    #[error("Invalid document path: {0}")]
    InvalidPath(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A stored document with its server-assigned envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: String,
    pub data: Value,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Last path segment.
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Size of a collection and the largest non-negative integer stored under one field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub count: u64,
    pub max_field: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    MustNotExist,
    Revision(u64),
}

/// The document database the ledger and image store are written against.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> StoreResult<Option<Document>>;

    /// Writes `data` as the whole document. Fails with `StoreError::Conflict`
    /// when `precondition` does not hold.
    async fn put(&self, path: &str, data: Value, precondition: Precondition)
        -> StoreResult<Document>;

    /// Creates the document or merges the top-level fields of `data` into it.
    async fn merge(&self, path: &str, data: Value) -> StoreResult<Document>;

    /// Returns whether a document was removed.
    async fn delete(&self, path: &str) -> StoreResult<bool>;

    /// Direct children of `collection`, newest first by creation time.
    async fn list(&self, collection: &str, limit: usize) -> StoreResult<Vec<Document>>;

    /// Aggregates direct children of `collection` without loading them.
    async fn collection_stats(&self, collection: &str, field: &str)
        -> StoreResult<CollectionStats>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Parent collection of a document path, `None` for top-level paths.
pub fn collection_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(collection, _)| collection)
}

pub fn validate_path(path: &str) -> StoreResult<()> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && !path.ends_with('/')
        && path.split('/').all(|segment| !segment.is_empty());

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

/// Shallow merge of the top-level fields of `patch` into `base`.
pub(crate) fn merge_fields(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key, value);
            }
        }
        (base, patch) => *base = patch,
    }
}
