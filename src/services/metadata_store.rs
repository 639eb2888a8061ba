//! Metadata store adapter.
//!
//! One row per object in the `objects` table. The store only ever inserts,
//! deletes and reads single rows; it knows nothing about credentials or
//! object payloads.

use crate::models::{
    object::{ObjectMetadata, ObjectMetadataDraft},
    user::UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` already exists")]
    Conflict(Uuid),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    /// Insert a row. Either the whole row is written or nothing is.
    async fn insert(&self, draft: ObjectMetadataDraft) -> StoreResult<ObjectMetadata>;

    /// Delete a row by id. Deleting a missing id is not an error.
    async fn delete_by_id(&self, id: Uuid) -> StoreResult<()>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<ObjectMetadata>>;

    /// All rows owned by `owner`, newest first.
    async fn list_by_owner(&self, owner: UserId) -> StoreResult<Vec<ObjectMetadata>>;

    /// Rows of any owner with `since <= created_at < until`, oldest first.
    /// `None` leaves the window open at the bottom.
    async fn list_created_between(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<ObjectMetadata>>;
}

const OBJECT_COLUMNS: &str = "id, owner_id, name, size_bytes, mime_type, created_at";

/// SQLite-backed metadata store.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, draft: ObjectMetadataDraft) -> StoreResult<ObjectMetadata> {
        let created_at = Utc::now();
        let sql = format!(
            "INSERT INTO objects ({OBJECT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {OBJECT_COLUMNS}"
        );

        sqlx::query_as::<_, ObjectMetadata>(&sql)
            .bind(draft.id)
            .bind(draft.owner_id.as_uuid())
            .bind(&draft.name)
            .bind(draft.size_bytes)
            .bind(&draft.mime_type)
            .bind(created_at)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Conflict(draft.id)
                } else {
                    StoreError::Database(err)
                }
            })
    }

    async fn delete_by_id(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            tracing::debug!(%id, "delete of missing object row ignored");
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<ObjectMetadata>> {
        let sql = format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE id = ?");
        let row = sqlx::query_as::<_, ObjectMetadata>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row)
    }

    async fn list_by_owner(&self, owner: UserId) -> StoreResult<Vec<ObjectMetadata>> {
        let sql = format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE owner_id = ?
             ORDER BY created_at DESC, rowid DESC"
        );
        let rows = sqlx::query_as::<_, ObjectMetadata>(&sql)
            .bind(owner.as_uuid())
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    async fn list_created_between(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<ObjectMetadata>> {
        let lower = if since.is_some() { "created_at >= ? AND " } else { "" };
        let sql = format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE {lower}created_at < ?
             ORDER BY created_at ASC, rowid ASC"
        );
        let mut query = sqlx::query_as::<_, ObjectMetadata>(&sql);
        if let Some(since) = since {
            query = query.bind(since);
        }
        let rows = query.bind(until).fetch_all(&*self.db).await?;
        Ok(rows)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
