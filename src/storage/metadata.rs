//! Metadata store: photo rows and their event log, with transactional
//! status transitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::StorageResult;
use crate::photo::{EventRecord, EventType, NewEvent, NewPhoto, Photo, PhotoStatus};

/// Result of a transactional transition attempt.
///
/// The store evaluates the transition table while holding the row lock,
/// so concurrent transitions on one photo resolve to a linear history.
#[derive(Debug)]
pub enum TransitionOutcome {
    /// Row updated and event appended in one transaction.
    Applied(Photo),
    /// The photo is already in a terminal state; nothing written.
    Superseded(PhotoStatus),
    /// The pair is not in the transition table; nothing written.
    Rejected(PhotoStatus),
    /// The row does not exist (deleted mid-flight); nothing written.
    Missing,
}

/// Filter for photo listings.
#[derive(Debug, Clone, Default)]
pub struct PhotoFilter {
    pub status: Option<PhotoStatus>,
    /// Include soft-deleted rows. Normal listings exclude them.
    pub include_deleted: bool,
}

/// Sort order for photo listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhotoSort {
    #[default]
    UploadedAtDesc,
    UploadedAtAsc,
    UpdatedAtDesc,
}

/// 1-based pagination window.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub const MAX_SIZE: u32 = 100;

    pub fn new(number: u32, size: u32) -> Self {
        Self {
            number: number.max(1),
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.number - 1) * u64::from(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// Filter for event-log queries. When both fields are present the query
/// is evaluated in-store, not by client-side filtering.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub photo_id: Option<Uuid>,
    pub event_type: Option<EventType>,
}

/// Photo and event-log persistence.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a photo in `Uploaded` state and its `UPLOADED` event in one
    /// transaction. Returns the stored row.
    async fn insert_photo(&self, new: NewPhoto) -> StorageResult<Photo>;

    /// Atomically evaluate and, if admitted, apply a status transition:
    /// update the row (status, `updated_at`, `processed_at` on terminal)
    /// and append the matching event in the same transaction. Soft-deleted
    /// rows transition like any other.
    async fn apply_transition(
        &self,
        id: Uuid,
        target: PhotoStatus,
        message: &str,
    ) -> StorageResult<TransitionOutcome>;

    /// Fetch a row by id, soft-deleted or not. Callers that must hide
    /// trashed photos check `deleted_at` themselves.
    async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<Photo>>;

    /// Fetch the subset of `ids` that exist.
    async fn find_all_by_id(&self, ids: &[Uuid]) -> StorageResult<Vec<Photo>>;

    /// Paged listing.
    async fn list(
        &self,
        filter: PhotoFilter,
        page: Page,
        sort: PhotoSort,
    ) -> StorageResult<Vec<Photo>>;

    /// Total rows matching the filter.
    async fn count(&self, filter: &PhotoFilter) -> StorageResult<u64>;

    /// Every row with `updated_at > t`, ordered by `updated_at`
    /// ascending, optionally restricted to an id set. Backs the polling
    /// fallback contract.
    async fn find_updated_after(
        &self,
        t: DateTime<Utc>,
        ids: Option<&[Uuid]>,
    ) -> StorageResult<Vec<Photo>>;

    /// Set `deleted_at`, compare-and-swap on `updated_at` with one
    /// automatic retry on conflict. A vanished row is a no-op; returns
    /// whether the row is (now) soft-deleted.
    async fn soft_delete(&self, id: Uuid) -> StorageResult<bool>;

    /// Remove the row; events cascade. Returns the removed row so the
    /// caller can clean up blobs.
    async fn delete_permanently(&self, id: Uuid) -> StorageResult<Option<Photo>>;

    /// Append one event with a server-assigned timestamp.
    async fn append_event(&self, event: NewEvent) -> StorageResult<EventRecord>;

    /// All events for a photo, newest first.
    async fn events_for_photo(&self, photo_id: Uuid) -> StorageResult<Vec<EventRecord>>;

    /// Paged event query, newest first.
    async fn list_events(&self, filter: EventFilter, page: Page)
        -> StorageResult<Vec<EventRecord>>;

    /// Cheap connectivity probe.
    async fn health_check(&self) -> StorageResult<()>;
}
