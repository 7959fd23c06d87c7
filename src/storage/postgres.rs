//! PostgreSQL metadata store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::metadata::{
    EventFilter, MetadataStore, Page, PhotoFilter, PhotoSort, TransitionOutcome,
};
use crate::config::DatabaseConfig;
use crate::photo::status::{decide, TransitionDecision};
use crate::photo::{EventRecord, EventType, NewEvent, NewPhoto, Photo, PhotoStatus};

/// Metadata store backed by PostgreSQL. Row-level locking serializes
/// transitions per photo; the event serial id breaks wall-clock ties in
/// per-photo ordering.
pub struct PgMetadataStore {
    pool: Arc<PgPool>,
}

impl PgMetadataStore {
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        info!("Connecting to metadata store");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .test_before_acquire(true)
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::connection(format!("failed to connect to database: {e}")))?;

        let store = Self {
            pool: Arc::new(pool),
        };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> StorageResult<()> {
        info!("Initializing metadata schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS photo (
                id UUID PRIMARY KEY,
                short_id VARCHAR(16) UNIQUE,
                filename VARCHAR(255) NOT NULL,
                original_filename VARCHAR(1024) NOT NULL,
                status VARCHAR(20) NOT NULL,
                size BIGINT NOT NULL,
                mime_type VARCHAR(100) NOT NULL,
                storage_path VARCHAR(255) NOT NULL,
                thumbnail_path VARCHAR(255),
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                is_favorite BOOLEAN NOT NULL DEFAULT FALSE,
                deleted_at TIMESTAMPTZ,
                uploaded_at TIMESTAMPTZ NOT NULL,
                processed_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| StorageError::database(format!("failed to create photo table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_log (
                id BIGSERIAL PRIMARY KEY,
                photo_id UUID NOT NULL REFERENCES photo (id) ON DELETE CASCADE,
                event_type VARCHAR(20) NOT NULL,
                message TEXT NOT NULL,
                metadata JSONB,
                timestamp TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| StorageError::database(format!("failed to create event_log table: {e}")))?;

        let index_queries = [
            "CREATE INDEX IF NOT EXISTS idx_photo_status ON photo (status)",
            "CREATE INDEX IF NOT EXISTS idx_photo_uploaded_at ON photo (uploaded_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_photo_favorite ON photo (is_favorite) WHERE is_favorite",
            "CREATE INDEX IF NOT EXISTS idx_photo_deleted_at ON photo (deleted_at)",
            "CREATE INDEX IF NOT EXISTS idx_photo_updated_at ON photo (updated_at)",
            "CREATE INDEX IF NOT EXISTS idx_event_photo ON event_log (photo_id)",
            "CREATE INDEX IF NOT EXISTS idx_event_timestamp ON event_log (timestamp DESC)",
            "CREATE INDEX IF NOT EXISTS idx_event_type ON event_log (event_type)",
        ];
        for query in index_queries {
            sqlx::query(query)
                .execute(&*self.pool)
                .await
                .map_err(|e| StorageError::database(format!("failed to create index: {e}")))?;
        }

        Ok(())
    }

    fn photo_from_row(row: &PgRow) -> StorageResult<Photo> {
        let status: String = row.try_get("status")?;
        let status = PhotoStatus::parse(&status)
            .ok_or_else(|| StorageError::database(format!("unknown photo status {status:?}")))?;

        Ok(Photo {
            id: row.try_get("id")?,
            short_id: row.try_get("short_id")?,
            filename: row.try_get("filename")?,
            original_filename: row.try_get("original_filename")?,
            status,
            size: row.try_get("size")?,
            mime_type: row.try_get("mime_type")?,
            storage_path: row.try_get("storage_path")?,
            thumbnail_path: row.try_get("thumbnail_path")?,
            metadata: row.try_get("metadata")?,
            is_favorite: row.try_get("is_favorite")?,
            deleted_at: row.try_get("deleted_at")?,
            uploaded_at: row.try_get("uploaded_at")?,
            processed_at: row.try_get("processed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn event_from_row(row: &PgRow) -> StorageResult<EventRecord> {
        let event_type: String = row.try_get("event_type")?;
        let event_type = EventType::parse(&event_type)
            .ok_or_else(|| StorageError::database(format!("unknown event type {event_type:?}")))?;

        Ok(EventRecord {
            id: row.try_get("id")?,
            photo_id: row.try_get("photo_id")?,
            event_type,
            message: row.try_get("message")?,
            metadata: row.try_get("metadata")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn insert_photo(&self, new: NewPhoto) -> StorageResult<Photo> {
        debug!("Inserting photo {} ({})", new.id, new.original_filename);

        let short_id = new.short_id();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO photo
                (id, short_id, filename, original_filename, status, size, mime_type,
                 storage_path, uploaded_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9, $9)
            RETURNING *
            "#,
        )
        .bind(new.id)
        .bind(&short_id)
        .bind(&new.filename)
        .bind(&new.original_filename)
        .bind(PhotoStatus::Uploaded.as_str())
        .bind(new.size)
        .bind(&new.mime_type)
        .bind(&new.storage_path)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let photo = Self::photo_from_row(&row)?;

        sqlx::query(
            "INSERT INTO event_log (photo_id, event_type, message, timestamp) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(new.id)
        .bind(EventType::Uploaded.as_str())
        .bind(format!("Uploaded {}", new.original_filename))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(photo)
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        target: PhotoStatus,
        message: &str,
    ) -> StorageResult<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM photo WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(TransitionOutcome::Missing);
        };
        let photo = Self::photo_from_row(&row)?;

        match decide(photo.status, target) {
            TransitionDecision::Noop => Ok(TransitionOutcome::Superseded(photo.status)),
            TransitionDecision::Reject => Ok(TransitionOutcome::Rejected(photo.status)),
            TransitionDecision::Apply => {
                let now = Utc::now();
                let processed_at = if target.is_terminal() {
                    photo.processed_at.or(Some(now))
                } else {
                    photo.processed_at
                };

                let row = sqlx::query(
                    "UPDATE photo SET status = $2, updated_at = $3, processed_at = $4 \
                     WHERE id = $1 RETURNING *",
                )
                .bind(id)
                .bind(target.as_str())
                .bind(now)
                .bind(processed_at)
                .fetch_one(&mut *tx)
                .await?;
                let updated = Self::photo_from_row(&row)?;

                sqlx::query(
                    "INSERT INTO event_log (photo_id, event_type, message, timestamp) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(id)
                .bind(target.event_type().as_str())
                .bind(message)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok(TransitionOutcome::Applied(updated))
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<Photo>> {
        let row = sqlx::query("SELECT * FROM photo WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(Self::photo_from_row).transpose()
    }

    async fn find_all_by_id(&self, ids: &[Uuid]) -> StorageResult<Vec<Photo>> {
        let rows = sqlx::query("SELECT * FROM photo WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(Self::photo_from_row).collect()
    }

    async fn list(
        &self,
        filter: PhotoFilter,
        page: Page,
        sort: PhotoSort,
    ) -> StorageResult<Vec<Photo>> {
        let order = match sort {
            PhotoSort::UploadedAtDesc => "uploaded_at DESC",
            PhotoSort::UploadedAtAsc => "uploaded_at ASC",
            PhotoSort::UpdatedAtDesc => "updated_at DESC",
        };
        let deleted = if filter.include_deleted {
            "TRUE"
        } else {
            "deleted_at IS NULL"
        };
        let query = format!(
            "SELECT * FROM photo WHERE {deleted} AND ($1::varchar IS NULL OR status = $1) \
             ORDER BY {order} LIMIT $2 OFFSET $3"
        );

        let rows = sqlx::query(&query)
            .bind(filter.status.map(PhotoStatus::as_str))
            .bind(i64::from(page.size))
            .bind(page.offset() as i64)
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(Self::photo_from_row).collect()
    }

    async fn count(&self, filter: &PhotoFilter) -> StorageResult<u64> {
        let deleted = if filter.include_deleted {
            "TRUE"
        } else {
            "deleted_at IS NULL"
        };
        let query = format!(
            "SELECT COUNT(*) AS total FROM photo \
             WHERE {deleted} AND ($1::varchar IS NULL OR status = $1)"
        );
        let row = sqlx::query(&query)
            .bind(filter.status.map(PhotoStatus::as_str))
            .fetch_one(&*self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total as u64)
    }

    async fn find_updated_after(
        &self,
        t: DateTime<Utc>,
        ids: Option<&[Uuid]>,
    ) -> StorageResult<Vec<Photo>> {
        let rows = match ids {
            Some(ids) => {
                sqlx::query(
                    "SELECT * FROM photo WHERE updated_at > $1 AND id = ANY($2) \
                     ORDER BY updated_at ASC",
                )
                .bind(t)
                .bind(ids)
                .fetch_all(&*self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM photo WHERE updated_at > $1 ORDER BY updated_at ASC")
                    .bind(t)
                    .fetch_all(&*self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::photo_from_row).collect()
    }

    async fn soft_delete(&self, id: Uuid) -> StorageResult<bool> {
        // Optimistic concurrency: CAS on updated_at, one retry with a
        // fresh read.
        for attempt in 0..2 {
            let Some(photo) = self.find_by_id(id).await? else {
                return Ok(false);
            };
            if photo.is_deleted() {
                return Ok(true);
            }

            let now = Utc::now();
            let result = sqlx::query(
                "UPDATE photo SET deleted_at = $2, updated_at = $2 \
                 WHERE id = $1 AND updated_at = $3",
            )
            .bind(id)
            .bind(now)
            .bind(photo.updated_at)
            .execute(&*self.pool)
            .await?;

            if result.rows_affected() == 1 {
                return Ok(true);
            }
            warn!("Soft delete of {} hit a concurrent update (attempt {})", id, attempt + 1);
        }
        Err(StorageError::conflict(format!(
            "photo {id} kept changing during delete"
        )))
    }

    async fn delete_permanently(&self, id: Uuid) -> StorageResult<Option<Photo>> {
        let row = sqlx::query("DELETE FROM photo WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(Self::photo_from_row).transpose()
    }

    async fn append_event(&self, event: NewEvent) -> StorageResult<EventRecord> {
        let row = sqlx::query(
            "INSERT INTO event_log (photo_id, event_type, message, metadata, timestamp) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(event.photo_id)
        .bind(event.event_type.as_str())
        .bind(&event.message)
        .bind(&event.metadata)
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await?;
        Self::event_from_row(&row)
    }

    async fn events_for_photo(&self, photo_id: Uuid) -> StorageResult<Vec<EventRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM event_log WHERE photo_id = $1 ORDER BY timestamp DESC, id DESC",
        )
        .bind(photo_id)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(Self::event_from_row).collect()
    }

    async fn list_events(
        &self,
        filter: EventFilter,
        page: Page,
    ) -> StorageResult<Vec<EventRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM event_log \
             WHERE ($1::uuid IS NULL OR photo_id = $1) \
               AND ($2::varchar IS NULL OR event_type = $2) \
             ORDER BY timestamp DESC, id DESC LIMIT $3 OFFSET $4",
        )
        .bind(filter.photo_id)
        .bind(filter.event_type.map(EventType::as_str))
        .bind(i64::from(page.size))
        .bind(page.offset() as i64)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(Self::event_from_row).collect()
    }

    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&*self.pool).await?;
        Ok(())
    }
}
