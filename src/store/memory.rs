use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{
    collection_of, merge_fields, validate_path, CollectionStats, Document, DocumentStore,
    Precondition, StoreError, StoreResult,
};

#[derive(Default)]
struct Inner {
    documents: BTreeMap<String, Document>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Inner {
    /// Strictly increasing, so creation order is a total order.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }
}

/// In-process document store used for local runs and tests.
#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Document>> {
        validate_path(path)?;
        Ok(self.inner.lock().await.documents.get(path).cloned())
    }

    async fn put(
        &self,
        path: &str,
        data: Value,
        precondition: Precondition,
    ) -> StoreResult<Document> {
        validate_path(path)?;
        let mut inner = self.inner.lock().await;
        let existing = inner.documents.get(path);

        let holds = match (precondition, existing) {
            (Precondition::None, _) => true,
            (Precondition::MustNotExist, existing) => existing.is_none(),
            (Precondition::Revision(expected), Some(doc)) => doc.revision == expected,
            (Precondition::Revision(_), None) => false,
        };
        if !holds {
            return Err(StoreError::Conflict(path.to_string()));
        }

        let previous = existing.map(|doc| (doc.revision, doc.created_at));
        let now = inner.next_timestamp();
        let document = match previous {
            Some((revision, created_at)) => Document {
                path: path.to_string(),
                data,
                revision: revision + 1,
                created_at,
                updated_at: now,
            },
            None => Document {
                path: path.to_string(),
                data,
                revision: 1,
                created_at: now,
                updated_at: now,
            },
        };

        inner.documents.insert(path.to_string(), document.clone());
        Ok(document)
    }

    async fn merge(&self, path: &str, data: Value) -> StoreResult<Document> {
        validate_path(path)?;
        let mut inner = self.inner.lock().await;
        let now = inner.next_timestamp();

        let document = match inner.documents.get(path).cloned() {
            Some(mut doc) => {
                merge_fields(&mut doc.data, data);
                doc.revision += 1;
                doc.updated_at = now;
                doc
            }
            None => Document {
                path: path.to_string(),
                data,
                revision: 1,
                created_at: now,
                updated_at: now,
            },
        };

        inner.documents.insert(path.to_string(), document.clone());
        Ok(document)
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        validate_path(path)?;
        Ok(self.inner.lock().await.documents.remove(path).is_some())
    }

    async fn list(&self, collection: &str, limit: usize) -> StoreResult<Vec<Document>> {
        validate_path(collection)?;
        let inner = self.inner.lock().await;

        let mut children: Vec<Document> = inner
            .documents
            .values()
            .filter(|doc| collection_of(&doc.path) == Some(collection))
            .cloned()
            .collect();

        children.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.path.cmp(&a.path))
        });
        children.truncate(limit);
        Ok(children)
    }

    async fn collection_stats(
        &self,
        collection: &str,
        field: &str,
    ) -> StoreResult<CollectionStats> {
        validate_path(collection)?;
        let inner = self.inner.lock().await;

        let mut stats = CollectionStats::default();
        for doc in inner
            .documents
            .values()
            .filter(|doc| collection_of(&doc.path) == Some(collection))
        {
            stats.count += 1;
            if let Some(value) = doc.data.get(field).and_then(Value::as_u64) {
                stats.max_field = Some(stats.max_field.map_or(value, |max| max.max(value)));
            }
        }
        Ok(stats)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_and_revisions() {
        let store = MemoryDocumentStore::new();
        assert!(store.get("accounts/u1").await.unwrap().is_none());

        let created = store
            .put("accounts/u1", json!({"email": "a@example.com"}), Precondition::MustNotExist)
            .await
            .unwrap();
        assert_eq!(created.revision, 1);
        assert_eq!(created.created_at, created.updated_at);

        let updated = store
            .put("accounts/u1", json!({"email": "b@example.com"}), Precondition::Revision(1))
            .await
            .unwrap();
        assert_eq!(updated.revision, 2);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);

        let fetched = store.get("accounts/u1").await.unwrap().unwrap();
        assert_eq!(fetched.data["email"], "b@example.com");
    }

    #[tokio::test]
    async fn test_preconditions_conflict() {
        let store = MemoryDocumentStore::new();
        store
            .put("accounts/u1", json!({}), Precondition::None)
            .await
            .unwrap();

        let again = store
            .put("accounts/u1", json!({}), Precondition::MustNotExist)
            .await;
        assert!(matches!(again, Err(StoreError::Conflict(_))));

        let stale = store
            .put("accounts/u1", json!({}), Precondition::Revision(7))
            .await;
        assert!(matches!(stale, Err(StoreError::Conflict(_))));

        let missing = store
            .put("accounts/u2", json!({}), Precondition::Revision(1))
            .await;
        assert!(matches!(missing, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_merge_creates_then_merges() {
        let store = MemoryDocumentStore::new();
        store
            .merge("accounts/u1", json!({"email": "a@example.com"}))
            .await
            .unwrap();
        let merged = store
            .merge("accounts/u1", json!({"lastLoginAt": "2024-01-01T00:00:00Z"}))
            .await
            .unwrap();

        assert_eq!(merged.revision, 2);
        assert_eq!(merged.data["email"], "a@example.com");
        assert_eq!(merged.data["lastLoginAt"], "2024-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn test_list_direct_children_newest_first() {
        let store = MemoryDocumentStore::new();
        for i in 0..5 {
            store
                .put(
                    &format!("accounts/u1/images/img{}", i),
                    json!({"n": i}),
                    Precondition::MustNotExist,
                )
                .await
                .unwrap();
        }
        store
            .put("accounts/u1/meta/images", json!({"totalCount": 5}), Precondition::None)
            .await
            .unwrap();
        store
            .put("accounts/u2/images/other", json!({}), Precondition::None)
            .await
            .unwrap();

        let listed = store.list("accounts/u1/images", 3).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["img4", "img3", "img2"]);
        assert!(listed
            .windows(2)
            .all(|pair| pair[0].created_at > pair[1].created_at));
    }

    #[tokio::test]
    async fn test_collection_stats() {
        let store = MemoryDocumentStore::new();
        for (id, data) in [
            ("a", json!({"imgNumber": 4})),
            ("b", json!({"imgNumber": 9})),
            ("c", json!({"imgNumber": "x"})),
            ("d", json!({})),
        ] {
            store
                .put(&format!("accounts/u1/images/{}", id), data, Precondition::None)
                .await
                .unwrap();
        }
        store
            .put("accounts/u1/images/a/nested", json!({"imgNumber": 50}), Precondition::None)
            .await
            .unwrap();

        let stats = store
            .collection_stats("accounts/u1/images", "imgNumber")
            .await
            .unwrap();
        assert_eq!(stats, CollectionStats { count: 4, max_field: Some(9) });

        let empty = store
            .collection_stats("accounts/u2/images", "imgNumber")
            .await
            .unwrap();
        assert_eq!(empty, CollectionStats::default());
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = MemoryDocumentStore::new();
        store
            .put("accounts/u1/images/a", json!({}), Precondition::None)
            .await
            .unwrap();

        assert!(store.delete("accounts/u1/images/a").await.unwrap());
        assert!(!store.delete("accounts/u1/images/a").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_rejects_malformed_paths() {
        let store = MemoryDocumentStore::new();
        assert!(matches!(
            store.get("accounts//x").await,
            Err(StoreError::InvalidPath(_))
        ));
    }
}
