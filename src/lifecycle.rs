//! Lifecycle coordinator: the only component that mutates photo status.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::notify::{NotificationHub, StatusNotification};
use crate::photo::{Photo, PhotoStatus};
use crate::storage::{MetadataStore, StorageError, TransitionOutcome};

#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The transition table does not admit this pair; the caller has a
    /// bug.
    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition { from: PhotoStatus, to: PhotoStatus },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Drives status transitions: one transaction updating the row and
/// appending the event, then a notification on the broadcast and
/// per-photo topics.
pub struct LifecycleCoordinator {
    store: Arc<dyn MetadataStore>,
    hub: Arc<NotificationHub>,
}

impl LifecycleCoordinator {
    pub fn new(store: Arc<dyn MetadataStore>, hub: Arc<NotificationHub>) -> Self {
        Self { store, hub }
    }

    /// Apply a transition. Returns the updated photo, or `None` when the
    /// transition was suppressed: the photo is already terminal
    /// (re-delivered queue message) or the row is gone
    /// (delete-during-processing race). Suppressed transitions emit no
    /// event and no notification.
    pub async fn transition(
        &self,
        photo_id: Uuid,
        target: PhotoStatus,
        message: &str,
    ) -> Result<Option<Photo>, LifecycleError> {
        match self.store.apply_transition(photo_id, target, message).await? {
            TransitionOutcome::Applied(photo) => {
                info!("Photo {} -> {}", photo_id, target);
                self.hub
                    .publish(&StatusNotification::now(photo_id, target, message))
                    .await;
                Ok(Some(photo))
            }
            TransitionOutcome::Superseded(current) => {
                debug!(
                    "Photo {} already {}, ignoring transition to {}",
                    photo_id, current, target
                );
                Ok(None)
            }
            TransitionOutcome::Missing => {
                warn!(
                    "Photo {} no longer exists, skipping transition to {}",
                    photo_id, target
                );
                Ok(None)
            }
            TransitionOutcome::Rejected(current) => Err(LifecycleError::InvalidTransition {
                from: current,
                to: target,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::BROADCAST_TOPIC;
    use crate::photo::NewPhoto;
    use crate::storage::memory::MemoryMetadataStore;

    async fn seed(store: &MemoryMetadataStore) -> Photo {
        let id = Uuid::new_v4();
        store
            .insert_photo(NewPhoto {
                id,
                filename: "a.png".into(),
                original_filename: "a.png".into(),
                size: 10,
                mime_type: "image/png".into(),
                storage_path: format!("{}.png", id.simple()),
            })
            .await
            .unwrap()
    }

    fn coordinator() -> (Arc<MemoryMetadataStore>, Arc<NotificationHub>, LifecycleCoordinator) {
        let store = Arc::new(MemoryMetadataStore::new());
        let hub = Arc::new(NotificationHub::default());
        let coordinator = LifecycleCoordinator::new(store.clone(), hub.clone());
        (store, hub, coordinator)
    }

    #[tokio::test]
    async fn applied_transition_publishes_notification() {
        let (store, hub, coordinator) = coordinator();
        let photo = seed(&store).await;
        let mut rx = hub.subscribe(BROADCAST_TOPIC).await;

        let updated = coordinator
            .transition(photo.id, PhotoStatus::Queued, "Queued for processing")
            .await
            .unwrap()
            .expect("transition applies");
        assert_eq!(updated.status, PhotoStatus::Queued);

        let n = rx.recv().await.unwrap();
        assert_eq!(n.photo_id, photo.id);
        assert_eq!(n.status, PhotoStatus::Queued);
    }

    #[tokio::test]
    async fn terminal_photo_suppresses_notification() {
        let (store, hub, coordinator) = coordinator();
        let photo = seed(&store).await;
        for (s, m) in [
            (PhotoStatus::Queued, "q"),
            (PhotoStatus::Processing, "p"),
            (PhotoStatus::Completed, "c"),
        ] {
            coordinator.transition(photo.id, s, m).await.unwrap();
        }

        let mut rx = hub.subscribe(BROADCAST_TOPIC).await;
        let result = coordinator
            .transition(photo.id, PhotoStatus::Failed, "late")
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_photo_is_a_noop() {
        let (_store, _hub, coordinator) = coordinator();
        let result = coordinator
            .transition(Uuid::new_v4(), PhotoStatus::Queued, "q")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn rejected_transition_is_an_error() {
        let (store, _hub, coordinator) = coordinator();
        let photo = seed(&store).await;

        let err = coordinator
            .transition(photo.id, PhotoStatus::Completed, "skip ahead")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                from: PhotoStatus::Uploaded,
                to: PhotoStatus::Completed,
            }
        ));
    }
}
