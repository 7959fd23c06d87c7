//! Worker role: the per-message processing contract.

pub mod processor;

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::lifecycle::{LifecycleCoordinator, LifecycleError};
use crate::photo::PhotoStatus;
use crate::queue::JobMessage;
use crate::storage::MetadataStore;
use processor::PhotoProcessor;

/// What the consumer should do with the stream entry afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// Acknowledge: the job is finished (or must never be retried).
    Ack,
    /// Leave pending: the reclaim loop retries it after the idle window.
    Retry,
}

/// Executes one delivered job end to end: existence check, transition to
/// `Processing`, simulation, terminal transition. Delivery is
/// at-least-once, so everything here is safe to run again.
pub struct JobHandler {
    store: Arc<dyn MetadataStore>,
    coordinator: Arc<LifecycleCoordinator>,
    processor: Arc<PhotoProcessor>,
}

impl JobHandler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        coordinator: Arc<LifecycleCoordinator>,
        processor: Arc<PhotoProcessor>,
    ) -> Self {
        Self {
            store,
            coordinator,
            processor,
        }
    }

    pub async fn handle(&self, message: &JobMessage) -> JobDisposition {
        let photo_id = message.photo_id;

        let photo = match self.store.find_by_id(photo_id).await {
            Ok(Some(photo)) => photo,
            Ok(None) => {
                debug!("Photo {} deleted before dispatch, discarding job", photo_id);
                return JobDisposition::Ack;
            }
            Err(e) => {
                warn!("Lookup of photo {} failed, leaving job pending: {}", photo_id, e);
                return JobDisposition::Retry;
            }
        };

        // A re-delivered job for a finished photo: nothing to do, and
        // nothing may be emitted.
        if photo.status.is_terminal() {
            debug!("Photo {} already {}, discarding re-delivery", photo_id, photo.status);
            return JobDisposition::Ack;
        }

        match self
            .coordinator
            .transition(photo_id, PhotoStatus::Processing, "Processing started")
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => return JobDisposition::Ack,
            Err(LifecycleError::InvalidTransition { from, to }) => {
                // A job for a photo that never reached Queued. Retrying
                // cannot fix it, so don't let it cycle through reclaim.
                error!(
                    "Job for photo {} found it in {}, cannot enter {}; discarding",
                    photo_id, from, to
                );
                return JobDisposition::Ack;
            }
            Err(LifecycleError::Storage(e)) => {
                warn!("Transition of {} to Processing failed: {}", photo_id, e);
                return JobDisposition::Retry;
            }
        }

        if let Err(e) = self.processor.run(photo_id).await {
            warn!("Processing of photo {} failed: {}", photo_id, e);
            // Mark failed and ack so the job is not re-processed; the
            // failure is final for this photo.
            return match self
                .coordinator
                .transition(photo_id, PhotoStatus::Failed, &format!("Processing failed: {e}"))
                .await
            {
                Ok(_) => JobDisposition::Ack,
                Err(err) => {
                    warn!("Could not mark photo {} failed: {}", photo_id, err);
                    JobDisposition::Retry
                }
            };
        }

        match self
            .coordinator
            .transition(photo_id, PhotoStatus::Completed, "Processing completed")
            .await
        {
            Ok(_) => JobDisposition::Ack,
            Err(LifecycleError::InvalidTransition { .. }) => JobDisposition::Ack,
            Err(LifecycleError::Storage(e)) => {
                warn!("Transition of {} to Completed failed: {}", photo_id, e);
                JobDisposition::Retry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::processor::instant_steps;
    use super::*;
    use crate::events::EventLogService;
    use crate::notify::NotificationHub;
    use crate::photo::{EventType, NewPhoto, Photo};
    use crate::storage::memory::MemoryMetadataStore;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryMetadataStore>,
        hub: Arc<NotificationHub>,
        coordinator: Arc<LifecycleCoordinator>,
        handler: JobHandler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryMetadataStore::new());
        let hub = Arc::new(NotificationHub::default());
        let coordinator = Arc::new(LifecycleCoordinator::new(store.clone(), hub.clone()));
        let events = Arc::new(EventLogService::new(store.clone()));
        let processor = Arc::new(PhotoProcessor::with_steps(events, instant_steps()));
        let handler = JobHandler::new(store.clone(), coordinator.clone(), processor);
        Fixture {
            store,
            hub,
            coordinator,
            handler,
        }
    }

    async fn queued_photo(f: &Fixture) -> Photo {
        let id = Uuid::new_v4();
        let photo = f
            .store
            .insert_photo(NewPhoto {
                id,
                filename: "a.png".into(),
                original_filename: "a.png".into(),
                size: 1,
                mime_type: "image/png".into(),
                storage_path: format!("{}.png", id.simple()),
            })
            .await
            .unwrap();
        f.coordinator
            .transition(id, PhotoStatus::Queued, "Queued for processing")
            .await
            .unwrap();
        photo
    }

    fn job(photo: &Photo) -> JobMessage {
        JobMessage {
            photo_id: photo.id,
            filename: photo.filename.clone(),
            storage_path: photo.storage_path.clone(),
        }
    }

    #[tokio::test]
    async fn happy_path_completes_photo_with_full_history() {
        let f = fixture();
        let photo = queued_photo(&f).await;

        assert_eq!(f.handler.handle(&job(&photo)).await, JobDisposition::Ack);

        let done = f.store.find_by_id(photo.id).await.unwrap().unwrap();
        assert_eq!(done.status, PhotoStatus::Completed);
        assert!(done.processed_at.is_some());

        let mut events = f.store.events_for_photo(photo.id).await.unwrap();
        events.reverse();
        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::Uploaded,
                EventType::Queued,
                EventType::Processing, // transition
                EventType::Processing, // 4 sub-steps
                EventType::Processing,
                EventType::Processing,
                EventType::Processing,
                EventType::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn redelivery_after_completion_is_silent() {
        let f = fixture();
        let photo = queued_photo(&f).await;
        let message = job(&photo);

        assert_eq!(f.handler.handle(&message).await, JobDisposition::Ack);
        let events_before = f.store.events_for_photo(photo.id).await.unwrap().len();

        let mut rx = f.hub.subscribe(crate::notify::BROADCAST_TOPIC).await;
        assert_eq!(f.handler.handle(&message).await, JobDisposition::Ack);

        let events_after = f.store.events_for_photo(photo.id).await.unwrap().len();
        assert_eq!(events_before, events_after);
        assert!(rx.try_recv().is_err(), "re-delivery must not notify");
    }

    #[tokio::test]
    async fn photo_deleted_before_dispatch_is_discarded() {
        let f = fixture();
        let photo = queued_photo(&f).await;
        f.store.delete_permanently(photo.id).await.unwrap();

        assert_eq!(f.handler.handle(&job(&photo)).await, JobDisposition::Ack);
    }

    #[tokio::test]
    async fn soft_deleted_photo_still_completes() {
        let f = fixture();
        let photo = queued_photo(&f).await;
        f.store.soft_delete(photo.id).await.unwrap();

        assert_eq!(f.handler.handle(&job(&photo)).await, JobDisposition::Ack);

        let done = f.store.find_by_id(photo.id).await.unwrap().unwrap();
        assert_eq!(done.status, PhotoStatus::Completed);
        assert!(done.is_deleted(), "completion must not resurrect the photo");
    }

    #[tokio::test]
    async fn permanent_delete_mid_processing_stops_quietly() {
        // The photo vanishes during the simulation: the next sub-step
        // event fails, the Failed transition observes a missing row, and
        // the job is acknowledged without further writes.
        let f = fixture();
        let photo = queued_photo(&f).await;

        let store = f.store.clone();
        let id = photo.id;
        let deleter = tokio::spawn(async move {
            store.delete_permanently(id).await.unwrap();
        });

        let disposition = f.handler.handle(&job(&photo)).await;
        deleter.await.unwrap();
        assert_eq!(disposition, JobDisposition::Ack);
        assert!(f.store.find_by_id(photo.id).await.unwrap().is_none());
        assert!(f.store.events_for_photo(photo.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reclaimed_job_mid_processing_reenters_processing() {
        let f = fixture();
        let photo = queued_photo(&f).await;

        // First delivery died after entering Processing.
        f.coordinator
            .transition(photo.id, PhotoStatus::Processing, "Processing started")
            .await
            .unwrap();

        assert_eq!(f.handler.handle(&job(&photo)).await, JobDisposition::Ack);

        let done = f.store.find_by_id(photo.id).await.unwrap().unwrap();
        assert_eq!(done.status, PhotoStatus::Completed);

        let events = f.store.events_for_photo(photo.id).await.unwrap();
        let starts = events
            .iter()
            .filter(|e| e.message == "Processing started")
            .count();
        assert_eq!(starts, 2, "both delivery attempts are on record");
        let terminals = events
            .iter()
            .filter(|e| e.event_type == EventType::Completed || e.event_type == EventType::Failed)
            .count();
        assert_eq!(terminals, 1);
    }

    #[tokio::test]
    async fn job_for_photo_stuck_in_uploaded_is_discarded() {
        let f = fixture();
        let id = Uuid::new_v4();
        let photo = f
            .store
            .insert_photo(NewPhoto {
                id,
                filename: "a.png".into(),
                original_filename: "a.png".into(),
                size: 1,
                mime_type: "image/png".into(),
                storage_path: "k.png".into(),
            })
            .await
            .unwrap();

        assert_eq!(f.handler.handle(&job(&photo)).await, JobDisposition::Ack);
        // Untouched: still Uploaded.
        let still = f.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(still.status, PhotoStatus::Uploaded);
    }
}
