use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

use super::{
    collection_of, validate_path, CollectionStats, Document, DocumentStore, Precondition,
    StoreError, StoreResult,
};
use crate::database::Database;

#[derive(Debug, FromRow)]
struct DocumentRow {
    path: String,
    data: Value,
    revision: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            path: row.path,
            data: row.data,
            revision: row.revision.max(0) as u64,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Documents stored as JSONB rows in a single `documents` table.
#[derive(Clone)]
pub struct PgDocumentStore {
    database: Database,
}

impl PgDocumentStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn collection(path: &str) -> &str {
        collection_of(path).unwrap_or("")
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Document>> {
        validate_path(path)?;
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT path, data, revision, created_at, updated_at FROM documents WHERE path = $1",
        )
        .bind(path)
        .fetch_optional(self.database.pool())
        .await?;

        Ok(row.map(Document::from))
    }

    async fn put(
        &self,
        path: &str,
        data: Value,
        precondition: Precondition,
    ) -> StoreResult<Document> {
        validate_path(path)?;
        let pool = self.database.pool();

        let row = match precondition {
            Precondition::None => {
                sqlx::query_as::<_, DocumentRow>(
                    r#"
                    INSERT INTO documents (path, collection, data)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (path) DO UPDATE
                    SET data = EXCLUDED.data,
                        revision = documents.revision + 1,
                        updated_at = clock_timestamp()
                    RETURNING path, data, revision, created_at, updated_at
                    "#,
                )
                .bind(path)
                .bind(Self::collection(path))
                .bind(&data)
                .fetch_optional(pool)
                .await?
            }
            Precondition::MustNotExist => {
                sqlx::query_as::<_, DocumentRow>(
                    r#"
                    INSERT INTO documents (path, collection, data)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (path) DO NOTHING
                    RETURNING path, data, revision, created_at, updated_at
                    "#,
                )
                .bind(path)
                .bind(Self::collection(path))
                .bind(&data)
                .fetch_optional(pool)
                .await?
            }
            Precondition::Revision(expected) => {
                sqlx::query_as::<_, DocumentRow>(
                    r#"
                    UPDATE documents
                    SET data = $2,
                        revision = revision + 1,
                        updated_at = clock_timestamp()
                    WHERE path = $1 AND revision = $3
                    RETURNING path, data, revision, created_at, updated_at
                    "#,
                )
                .bind(path)
                .bind(&data)
                .bind(expected as i64)
                .fetch_optional(pool)
                .await?
            }
        };

        row.map(Document::from)
            .ok_or_else(|| StoreError::Conflict(path.to_string()))
    }

    async fn merge(&self, path: &str, data: Value) -> StoreResult<Document> {
        validate_path(path)?;
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            INSERT INTO documents (path, collection, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (path) DO UPDATE
            SET data = documents.data || EXCLUDED.data,
                revision = documents.revision + 1,
                updated_at = clock_timestamp()
            RETURNING path, data, revision, created_at, updated_at
            "#,
        )
        .bind(path)
        .bind(Self::collection(path))
        .bind(&data)
        .fetch_one(self.database.pool())
        .await?;

        Ok(row.into())
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        validate_path(path)?;
        let result = sqlx::query("DELETE FROM documents WHERE path = $1")
            .bind(path)
            .execute(self.database.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, collection: &str, limit: usize) -> StoreResult<Vec<Document>> {
        validate_path(collection)?;
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT path, data, revision, created_at, updated_at
            FROM documents
            WHERE collection = $1
            ORDER BY created_at DESC, seq DESC
            LIMIT $2
            "#,
        )
        .bind(collection)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.database.pool())
        .await?;

        Ok(rows.into_iter().map(Document::from).collect())
    }

    async fn collection_stats(
        &self,
        collection: &str,
        field: &str,
    ) -> StoreResult<CollectionStats> {
        validate_path(collection)?;
        let (count, max_field) = sqlx::query_as::<_, (i64, Option<i64>)>(
            r#"
            SELECT COUNT(*),
                   MAX(CASE WHEN jsonb_typeof(data -> $2::text) = 'number'
                            THEN (data ->> $2::text)::numeric END)::bigint
            FROM documents
            WHERE collection = $1
            "#,
        )
        .bind(collection)
        .bind(field)
        .fetch_one(self.database.pool())
        .await?;

        Ok(CollectionStats {
            count: count.max(0) as u64,
            max_field: max_field.and_then(|max| u64::try_from(max).ok()),
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(self.database.pool())
            .await?;
        Ok(())
    }
}
