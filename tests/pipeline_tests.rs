//! End-to-end pipeline scenarios over the in-memory backends: ingest a
//! batch, run delivered jobs through the worker contract, observe
//! subscribers and the polling fallback.

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;

use lightbox::config::IngestConfig;
use lightbox::events::EventLogService;
use lightbox::ingest::{IngestPipeline, UploadFile};
use lightbox::lifecycle::LifecycleCoordinator;
use lightbox::notify::{photo_topic, NotificationHub, BROADCAST_TOPIC};
use lightbox::photo::{EventType, Photo, PhotoStatus};
use lightbox::queue::{JobMessage, MemoryQueue};
use lightbox::storage::memory::{MemoryBlobStore, MemoryMetadataStore};
use lightbox::storage::{Bucket, MetadataStore};
use lightbox::worker::processor::{PhotoProcessor, ProcessingStep};
use lightbox::worker::{JobDisposition, JobHandler};

/// A full single-process deployment on memory backends.
struct Harness {
    blob: Arc<MemoryBlobStore>,
    store: Arc<MemoryMetadataStore>,
    queue: Arc<MemoryQueue>,
    hub: Arc<NotificationHub>,
    pipeline: IngestPipeline,
    handler: JobHandler,
}

fn harness() -> Harness {
    let blob = Arc::new(MemoryBlobStore::new());
    let store = Arc::new(MemoryMetadataStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let hub = Arc::new(NotificationHub::default());
    let coordinator = Arc::new(LifecycleCoordinator::new(store.clone(), hub.clone()));
    let events = Arc::new(EventLogService::new(store.clone()));

    let steps = vec![
        ProcessingStep::new("File validation completed", 0, 1),
        ProcessingStep::new("Metadata extracted", 0, 1),
        ProcessingStep::new("Thumbnail created", 0, 1),
        ProcessingStep::new("Image optimization completed", 0, 1),
    ];
    let processor = Arc::new(PhotoProcessor::with_steps(events, steps));

    let pipeline = IngestPipeline::new(
        blob.clone(),
        store.clone(),
        queue.clone(),
        coordinator.clone(),
        hub.clone(),
        IngestConfig::default(),
    );
    let handler = JobHandler::new(store.clone(), coordinator, processor);

    Harness {
        blob,
        store,
        queue,
        hub,
        pipeline,
        handler,
    }
}

fn png(name: &str, size: usize) -> UploadFile {
    UploadFile {
        original_filename: name.to_string(),
        content_type: "image/png".to_string(),
        bytes: Bytes::from(vec![0u8; size]),
    }
}

fn jpeg(name: &str, size: usize) -> UploadFile {
    UploadFile {
        original_filename: name.to_string(),
        content_type: "image/jpeg".to_string(),
        bytes: Bytes::from(vec![0u8; size]),
    }
}

async fn ingest_one(h: &Harness, file: UploadFile) -> Photo {
    let report = h.pipeline.ingest_batch(vec![file]).await.unwrap();
    assert_eq!(report.uploaded.len(), 1, "rejected: {:?}", report.rejected);
    report.uploaded.into_iter().next().unwrap()
}

fn event_types_oldest_first(events: &[lightbox::photo::EventRecord]) -> Vec<EventType> {
    let mut types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    types.reverse();
    types
}

#[tokio::test]
async fn happy_path_single_file() {
    let h = harness();
    let mut all = h.hub.subscribe(BROADCAST_TOPIC).await;

    let photo = ingest_one(&h, png("beach.png", 1024 * 1024)).await;
    assert_eq!(photo.status, PhotoStatus::Queued);

    // The ingest response round-trips the client's view of the file.
    assert_eq!(photo.original_filename, "beach.png");
    assert_eq!(photo.size, 1024 * 1024);

    // Drive the queued job like a worker would.
    let jobs = h.queue.drain().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(h.handler.handle(&jobs[0]).await, JobDisposition::Ack);

    // A broadcast subscriber sees Uploaded, Queued, Processing, Completed
    // in the photo's own order.
    let mut observed = Vec::new();
    while let Ok(n) = all.try_recv() {
        observed.push(n.status);
    }
    assert_eq!(
        observed,
        vec![
            PhotoStatus::Uploaded,
            PhotoStatus::Queued,
            PhotoStatus::Processing,
            PhotoStatus::Completed,
        ]
    );

    // Full event history: UPLOADED, QUEUED, PROCESSING transition plus
    // four sub-steps, COMPLETED.
    let events = h.store.events_for_photo(photo.id).await.unwrap();
    assert_eq!(
        event_types_oldest_first(&events),
        vec![
            EventType::Uploaded,
            EventType::Queued,
            EventType::Processing,
            EventType::Processing,
            EventType::Processing,
            EventType::Processing,
            EventType::Processing,
            EventType::Completed,
        ]
    );
    let sub_steps: Vec<&str> = events
        .iter()
        .rev()
        .filter(|e| e.event_type == EventType::Processing)
        .skip(1) // the transition itself
        .map(|e| e.message.as_str())
        .collect();
    assert_eq!(
        sub_steps,
        vec![
            "File validation completed",
            "Metadata extracted",
            "Thumbnail created",
            "Image optimization completed",
        ]
    );

    let done = h.store.find_by_id(photo.id).await.unwrap().unwrap();
    assert_eq!(done.status, PhotoStatus::Completed);
    assert!(done.processed_at.is_some());
    assert!(h.blob.contains(Bucket::Originals, &done.storage_path).await);
}

#[tokio::test]
async fn batch_with_mixed_validity() {
    let h = harness();
    let report = h
        .pipeline
        .ingest_batch(vec![
            jpeg("one.jpg", 500 * 1024),
            jpeg("two.jpg", 500 * 1024),
            jpeg("three.jpg", 500 * 1024),
            jpeg("big.jpg", 15 * 1024 * 1024),
            UploadFile {
                original_filename: "doc.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                bytes: Bytes::from(vec![0u8; 1024]),
            },
        ])
        .await
        .unwrap();

    assert_eq!(report.uploaded.len(), 3);
    assert_eq!(report.rejected.len(), 2);
    // Rejected files never touched the blob store.
    assert_eq!(h.blob.object_count().await, 3);

    // All three valid photos complete.
    for job in h.queue.drain().await {
        assert_eq!(h.handler.handle(&job).await, JobDisposition::Ack);
    }
    for photo in report.uploaded {
        let done = h.store.find_by_id(photo.id).await.unwrap().unwrap();
        assert_eq!(done.status, PhotoStatus::Completed);
    }
}

#[tokio::test]
async fn per_photo_topic_sees_only_its_photo() {
    let h = harness();

    let first = ingest_one(&h, png("first.png", 64)).await;
    let mut scoped = h.hub.subscribe(&photo_topic(first.id)).await;
    let _second = ingest_one(&h, png("second.png", 64)).await;

    for job in h.queue.drain().await {
        h.handler.handle(&job).await;
    }

    while let Ok(n) = scoped.try_recv() {
        assert_eq!(n.photo_id, first.id);
    }
}

#[tokio::test]
async fn soft_delete_during_processing_still_completes() {
    let h = harness();
    let photo = ingest_one(&h, png("trashme.png", 64)).await;

    // The user trashes the photo after it was queued.
    assert!(h.store.soft_delete(photo.id).await.unwrap());

    let jobs = h.queue.drain().await;
    assert_eq!(h.handler.handle(&jobs[0]).await, JobDisposition::Ack);

    // Completed and trashed at once: processing does not resurrect it.
    let done = h.store.find_by_id(photo.id).await.unwrap().unwrap();
    assert_eq!(done.status, PhotoStatus::Completed);
    assert!(done.is_deleted());
}

#[tokio::test]
async fn permanent_delete_before_dispatch_discards_the_job() {
    let h = harness();
    let photo = ingest_one(&h, png("gone.png", 64)).await;

    h.store.delete_permanently(photo.id).await.unwrap();

    let jobs = h.queue.drain().await;
    assert_eq!(h.handler.handle(&jobs[0]).await, JobDisposition::Ack);
    assert!(h.store.find_by_id(photo.id).await.unwrap().is_none());
    assert!(h.store.events_for_photo(photo.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn redelivery_after_completion_changes_nothing() {
    let h = harness();
    let photo = ingest_one(&h, png("twice.png", 64)).await;

    let jobs = h.queue.drain().await;
    assert_eq!(h.handler.handle(&jobs[0]).await, JobDisposition::Ack);

    let done = h.store.find_by_id(photo.id).await.unwrap().unwrap();
    let events_before = h.store.events_for_photo(photo.id).await.unwrap().len();
    let mut rx = h.hub.subscribe(BROADCAST_TOPIC).await;

    // The queue delivers the same message again.
    assert_eq!(h.handler.handle(&jobs[0]).await, JobDisposition::Ack);

    let after = h.store.find_by_id(photo.id).await.unwrap().unwrap();
    assert_eq!(after.status, PhotoStatus::Completed);
    assert_eq!(after.updated_at, done.updated_at);
    assert_eq!(
        h.store.events_for_photo(photo.id).await.unwrap().len(),
        events_before
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn reclaimed_job_after_worker_crash_finishes_the_photo() {
    let h = harness();
    let photo = ingest_one(&h, png("crash.png", 64)).await;
    let jobs = h.queue.drain().await;

    // First worker died right after entering Processing: the message was
    // never acknowledged.
    let entered = h
        .store
        .apply_transition(photo.id, PhotoStatus::Processing, "Processing started")
        .await
        .unwrap();
    assert!(matches!(
        entered,
        lightbox::storage::TransitionOutcome::Applied(_)
    ));

    // A second consumer reclaims and re-runs the job.
    assert_eq!(h.handler.handle(&jobs[0]).await, JobDisposition::Ack);

    let done = h.store.find_by_id(photo.id).await.unwrap().unwrap();
    assert_eq!(done.status, PhotoStatus::Completed);

    let events = h.store.events_for_photo(photo.id).await.unwrap();
    let starts = events
        .iter()
        .filter(|e| e.message == "Processing started")
        .count();
    assert_eq!(starts, 2, "both processing attempts are recorded");
    let terminals = events
        .iter()
        .filter(|e| matches!(e.event_type, EventType::Completed | EventType::Failed))
        .count();
    assert_eq!(terminals, 1, "exactly one terminal event");
}

#[tokio::test]
async fn poller_catches_up_after_reconnect() {
    let h = harness();
    let photo = ingest_one(&h, png("offline.png", 64)).await;

    // Subscriber disconnects here.
    let disconnected_at = Utc::now();

    // The photo completes while the subscriber is away.
    let jobs = h.queue.drain().await;
    assert_eq!(h.handler.handle(&jobs[0]).await, JobDisposition::Ack);

    // On reconnect, one poll with the remembered timestamp finds the
    // terminal state.
    let updated = h
        .store
        .find_updated_after(disconnected_at, Some(&[photo.id]))
        .await
        .unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].status, PhotoStatus::Completed);

    // Threading the new timestamp forward yields nothing further.
    let next = h
        .store
        .find_updated_after(updated[0].updated_at, Some(&[photo.id]))
        .await
        .unwrap();
    assert!(next.is_empty());
}

#[tokio::test]
async fn failed_enqueue_is_terminal_for_the_photo_but_not_the_batch() {
    let h = harness();

    let ok = ingest_one(&h, png("fine.png", 64)).await;
    h.queue.fail_enqueues(true);
    let report = h.pipeline.ingest_batch(vec![png("stuck.png", 64)]).await.unwrap();
    assert!(report.all_failed());

    // The failed photo is retrievable and terminal; the earlier one is
    // untouched.
    let photos = h
        .store
        .find_updated_after(chrono::DateTime::<Utc>::MIN_UTC, None)
        .await
        .unwrap();
    let stuck = photos
        .iter()
        .find(|p| p.original_filename == "stuck.png")
        .unwrap();
    assert_eq!(stuck.status, PhotoStatus::Failed);
    assert!(stuck.processed_at.is_some());
    assert_eq!(
        h.store.find_by_id(ok.id).await.unwrap().unwrap().status,
        PhotoStatus::Queued
    );
}

#[tokio::test]
async fn queue_message_carries_the_storage_key() {
    let h = harness();
    let photo = ingest_one(&h, png("key.png", 64)).await;

    let jobs = h.queue.drain().await;
    assert_eq!(
        jobs[0],
        JobMessage {
            photo_id: photo.id,
            filename: photo.filename.clone(),
            storage_path: photo.storage_path.clone(),
        }
    );
}
