//! In-memory storage backends for testing.
//!
//! Mirror the semantics of the production backends closely enough that
//! the pipeline, lifecycle and notification logic can be exercised
//! without external services: per-row monotonic `updated_at`, CAS on
//! soft delete, cascade delete of events, serial event ids.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::blob::{BlobStore, Bucket};
use super::error::{StorageError, StorageResult};
use super::metadata::{
    EventFilter, MetadataStore, Page, PhotoFilter, PhotoSort, TransitionOutcome,
};
use crate::photo::status::{decide, TransitionDecision};
use crate::photo::{EventRecord, EventType, NewEvent, NewPhoto, Photo, PhotoStatus};

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<(Bucket, String), (Bytes, String)>>,
    fail_puts: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail, to exercise upload-failure
    /// reporting.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn contains(&self, bucket: Bucket, key: &str) -> bool {
        self.objects
            .read()
            .await
            .contains_key(&(bucket, key.to_string()))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn ensure_buckets(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn put(
        &self,
        bucket: Bucket,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> StorageResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::connection("blob store unavailable"));
        }
        self.objects
            .write()
            .await
            .insert((bucket, key.to_string()), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn get(&self, bucket: Bucket, key: &str) -> StorageResult<Bytes> {
        self.objects
            .read()
            .await
            .get(&(bucket, key.to_string()))
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StorageError::not_found(format!("object {key}")))
    }

    async fn delete(&self, bucket: Bucket, key: &str) -> StorageResult<()> {
        self.objects.write().await.remove(&(bucket, key.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    photos: HashMap<Uuid, Photo>,
    events: Vec<EventRecord>,
    next_event_id: i64,
}

impl MemoryState {
    fn push_event(
        &mut self,
        photo_id: Uuid,
        event_type: EventType,
        message: String,
        metadata: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) -> EventRecord {
        self.next_event_id += 1;
        let record = EventRecord {
            id: self.next_event_id,
            photo_id,
            event_type,
            message,
            metadata,
            timestamp,
        };
        self.events.push(record.clone());
        record
    }
}

/// In-memory metadata store.
#[derive(Default)]
pub struct MemoryMetadataStore {
    state: RwLock<MemoryState>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `updated_at` for a row: wall clock, nudged forward when the
    /// clock has not advanced past the previous value.
    fn bump(previous: DateTime<Utc>) -> DateTime<Utc> {
        let now = Utc::now();
        if now > previous {
            now
        } else {
            previous + Duration::microseconds(1)
        }
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_photo(&self, new: NewPhoto) -> StorageResult<Photo> {
        let mut state = self.state.write().await;
        if state.photos.contains_key(&new.id) {
            return Err(StorageError::conflict(format!("photo {} exists", new.id)));
        }

        let now = Utc::now();
        let photo = Photo {
            id: new.id,
            short_id: Some(new.short_id()),
            filename: new.filename,
            original_filename: new.original_filename.clone(),
            status: PhotoStatus::Uploaded,
            size: new.size,
            mime_type: new.mime_type,
            storage_path: new.storage_path,
            thumbnail_path: None,
            metadata: serde_json::json!({}),
            is_favorite: false,
            deleted_at: None,
            uploaded_at: now,
            processed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.photos.insert(photo.id, photo.clone());
        state.push_event(
            photo.id,
            EventType::Uploaded,
            format!("Uploaded {}", new.original_filename),
            None,
            now,
        );
        Ok(photo)
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        target: PhotoStatus,
        message: &str,
    ) -> StorageResult<TransitionOutcome> {
        let mut state = self.state.write().await;
        let Some(current) = state.photos.get(&id).cloned() else {
            return Ok(TransitionOutcome::Missing);
        };

        match decide(current.status, target) {
            TransitionDecision::Noop => Ok(TransitionOutcome::Superseded(current.status)),
            TransitionDecision::Reject => Ok(TransitionOutcome::Rejected(current.status)),
            TransitionDecision::Apply => {
                let now = Self::bump(current.updated_at);
                let photo = state.photos.get_mut(&id).expect("row present");
                photo.status = target;
                photo.updated_at = now;
                if target.is_terminal() && photo.processed_at.is_none() {
                    photo.processed_at = Some(now);
                }
                let updated = photo.clone();
                state.push_event(id, target.event_type(), message.to_string(), None, now);
                Ok(TransitionOutcome::Applied(updated))
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<Photo>> {
        Ok(self.state.read().await.photos.get(&id).cloned())
    }

    async fn find_all_by_id(&self, ids: &[Uuid]) -> StorageResult<Vec<Photo>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.photos.get(id).cloned())
            .collect())
    }

    async fn list(
        &self,
        filter: PhotoFilter,
        page: Page,
        sort: PhotoSort,
    ) -> StorageResult<Vec<Photo>> {
        let state = self.state.read().await;
        let mut photos: Vec<Photo> = state
            .photos
            .values()
            .filter(|p| filter.include_deleted || !p.is_deleted())
            .filter(|p| filter.status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        match sort {
            PhotoSort::UploadedAtDesc => {
                photos.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at))
            }
            PhotoSort::UploadedAtAsc => photos.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at)),
            PhotoSort::UpdatedAtDesc => photos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        }
        Ok(photos
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect())
    }

    async fn count(&self, filter: &PhotoFilter) -> StorageResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .photos
            .values()
            .filter(|p| filter.include_deleted || !p.is_deleted())
            .filter(|p| filter.status.is_none_or(|s| p.status == s))
            .count() as u64)
    }

    async fn find_updated_after(
        &self,
        t: DateTime<Utc>,
        ids: Option<&[Uuid]>,
    ) -> StorageResult<Vec<Photo>> {
        let state = self.state.read().await;
        let mut photos: Vec<Photo> = state
            .photos
            .values()
            .filter(|p| p.updated_at > t)
            .filter(|p| ids.is_none_or(|ids| ids.contains(&p.id)))
            .cloned()
            .collect();
        photos.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(photos)
    }

    async fn soft_delete(&self, id: Uuid) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let Some(photo) = state.photos.get_mut(&id) else {
            return Ok(false);
        };
        if photo.deleted_at.is_none() {
            let now = Self::bump(photo.updated_at);
            photo.deleted_at = Some(now);
            photo.updated_at = now;
        }
        Ok(true)
    }

    async fn delete_permanently(&self, id: Uuid) -> StorageResult<Option<Photo>> {
        let mut state = self.state.write().await;
        let removed = state.photos.remove(&id);
        if removed.is_some() {
            state.events.retain(|e| e.photo_id != id);
        }
        Ok(removed)
    }

    async fn append_event(&self, event: NewEvent) -> StorageResult<EventRecord> {
        let mut state = self.state.write().await;
        if !state.photos.contains_key(&event.photo_id) {
            return Err(StorageError::not_found(format!("photo {}", event.photo_id)));
        }
        Ok(state.push_event(
            event.photo_id,
            event.event_type,
            event.message,
            event.metadata,
            Utc::now(),
        ))
    }

    async fn events_for_photo(&self, photo_id: Uuid) -> StorageResult<Vec<EventRecord>> {
        let state = self.state.read().await;
        let mut events: Vec<EventRecord> = state
            .events
            .iter()
            .filter(|e| e.photo_id == photo_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        Ok(events)
    }

    async fn list_events(
        &self,
        filter: EventFilter,
        page: Page,
    ) -> StorageResult<Vec<EventRecord>> {
        let state = self.state.read().await;
        let mut events: Vec<EventRecord> = state
            .events
            .iter()
            .filter(|e| filter.photo_id.is_none_or(|id| e.photo_id == id))
            .filter(|e| filter.event_type.is_none_or(|t| e.event_type == t))
            .cloned()
            .collect();
        events.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        Ok(events
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect())
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
