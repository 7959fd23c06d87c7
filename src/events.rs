//! Event log service: append-only workflow history per photo.

use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::photo::{EventRecord, EventType, NewEvent};
use crate::storage::{EventFilter, MetadataStore, Page, StorageResult};

/// Emits and queries event-log entries. Per-photo ordering is stable:
/// the store orders by `(timestamp, serial id)` so events inside one
/// wall-clock tick keep their emission order.
pub struct EventLogService {
    store: Arc<dyn MetadataStore>,
}

impl EventLogService {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Append one event with a server-assigned UTC timestamp.
    pub async fn append(
        &self,
        photo_id: Uuid,
        event_type: EventType,
        message: impl Into<String>,
        metadata: Option<Value>,
    ) -> StorageResult<EventRecord> {
        self.store
            .append_event(NewEvent {
                photo_id,
                event_type,
                message: message.into(),
                metadata,
            })
            .await
    }

    /// All events for one photo, newest first.
    pub async fn list_by_photo(&self, photo_id: Uuid) -> StorageResult<Vec<EventRecord>> {
        self.store.events_for_photo(photo_id).await
    }

    /// Filtered, paged query. Both filters combined are evaluated
    /// in-store.
    pub async fn list(&self, filter: EventFilter, page: Page) -> StorageResult<Vec<EventRecord>> {
        self.store.list_events(filter, page).await
    }
}
