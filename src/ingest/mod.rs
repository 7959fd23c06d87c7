//! Ingest pipeline: validation, parallel blob upload, metadata
//! persistence, enqueue, and the initial notifications.

pub mod sanitize;

use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::{ApiError, ErrorCode};
use crate::lifecycle::LifecycleCoordinator;
use crate::notify::{NotificationHub, StatusNotification};
use crate::photo::{NewPhoto, Photo, PhotoStatus};
use crate::queue::{JobMessage, JobQueue};
use crate::storage::{BlobStore, Bucket, MetadataStore};
use sanitize::{extension, sanitize_filename};

/// Content types accepted for upload.
pub const ALLOWED_CONTENT_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
];

/// Extensions accepted for upload (checked case-insensitively).
pub const ALLOWED_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".webp", ".gif"];

/// One candidate file. The byte buffer is owned: it was copied out of
/// the transport before reaching the pipeline, so upload tasks can
/// outlive the request body.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub original_filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Per-file failure reported in the batch response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedFile {
    pub filename: String,
    pub error: ErrorCode,
    pub reason: String,
}

impl RejectedFile {
    fn new(filename: &str, error: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            filename: filename.to_string(),
            error,
            reason: reason.into(),
        }
    }
}

/// Batch outcome: which files made it into the pipeline and which were
/// turned away, with reasons.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub uploaded: Vec<Photo>,
    pub rejected: Vec<RejectedFile>,
}

impl IngestReport {
    /// The batch fails only when every file failed.
    pub fn all_failed(&self) -> bool {
        self.uploaded.is_empty()
    }
}

/// The end-to-end path from accepted upload to enqueued job.
pub struct IngestPipeline {
    blob: Arc<dyn BlobStore>,
    store: Arc<dyn MetadataStore>,
    queue: Arc<dyn JobQueue>,
    coordinator: Arc<LifecycleCoordinator>,
    hub: Arc<NotificationHub>,
    uploads: Arc<Semaphore>,
    config: IngestConfig,
}

impl IngestPipeline {
    pub fn new(
        blob: Arc<dyn BlobStore>,
        store: Arc<dyn MetadataStore>,
        queue: Arc<dyn JobQueue>,
        coordinator: Arc<LifecycleCoordinator>,
        hub: Arc<NotificationHub>,
        config: IngestConfig,
    ) -> Self {
        let uploads = Arc::new(Semaphore::new(config.upload_concurrency));
        Self {
            blob,
            store,
            queue,
            coordinator,
            hub,
            uploads,
            config,
        }
    }

    /// Ingest a batch. Batch-level validation failures reject the whole
    /// request; per-file failures are collected and the rest of the
    /// batch proceeds. Valid files upload in parallel under the bounded
    /// upload pool.
    pub async fn ingest_batch(&self, files: Vec<UploadFile>) -> Result<IngestReport, ApiError> {
        if files.is_empty() {
            return Err(ApiError::validation("upload batch is empty"));
        }
        if files.len() > self.config.max_batch_files {
            return Err(ApiError::validation(format!(
                "upload batch exceeds {} files",
                self.config.max_batch_files
            )));
        }

        let mut rejected = Vec::new();
        let mut accepted = Vec::new();
        for file in files {
            match self.validate(&file) {
                Ok(()) => accepted.push(file),
                Err(rejection) => rejected.push(rejection),
            }
        }

        let results = join_all(accepted.into_iter().map(|file| self.ingest_one(file))).await;

        let mut uploaded = Vec::new();
        for result in results {
            match result {
                Ok(photo) => uploaded.push(photo),
                Err(rejection) => rejected.push(rejection),
            }
        }

        debug!(
            "Ingest batch finished: {} uploaded, {} rejected",
            uploaded.len(),
            rejected.len()
        );
        Ok(IngestReport { uploaded, rejected })
    }

    fn validate(&self, file: &UploadFile) -> Result<(), RejectedFile> {
        let name = &file.original_filename;

        if file.bytes.len() as u64 > self.config.max_file_bytes {
            return Err(RejectedFile::new(
                name,
                ErrorCode::FileTooLarge,
                format!(
                    "file is {} bytes, limit is {}",
                    file.bytes.len(),
                    self.config.max_file_bytes
                ),
            ));
        }
        if !ALLOWED_CONTENT_TYPES.contains(&file.content_type.as_str()) {
            return Err(RejectedFile::new(
                name,
                ErrorCode::UnsupportedFormat,
                format!("content type {} is not an accepted image type", file.content_type),
            ));
        }
        let ext = extension(name);
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(RejectedFile::new(
                name,
                ErrorCode::UnsupportedFormat,
                format!("extension {ext:?} is not an accepted image extension"),
            ));
        }
        if file.bytes.is_empty() {
            return Err(RejectedFile::new(
                name,
                ErrorCode::ValidationError,
                "file is empty",
            ));
        }
        Ok(())
    }

    async fn ingest_one(&self, file: UploadFile) -> Result<Photo, RejectedFile> {
        let _permit = self
            .uploads
            .acquire()
            .await
            .expect("upload semaphore never closes");

        let id = Uuid::new_v4();
        let storage_path = format!("{}{}", id.simple(), extension(&file.original_filename));

        self.blob
            .put(
                Bucket::Originals,
                &storage_path,
                file.bytes.clone(),
                &file.content_type,
            )
            .await
            .map_err(|e| {
                warn!("Blob upload of {} failed: {}", file.original_filename, e);
                RejectedFile::new(&file.original_filename, ErrorCode::StorageError, e.to_string())
            })?;

        let photo = self
            .store
            .insert_photo(NewPhoto {
                id,
                filename: sanitize_filename(&file.original_filename),
                original_filename: file.original_filename.clone(),
                size: file.bytes.len() as i64,
                mime_type: file.content_type.clone(),
                storage_path,
            })
            .await
            .map_err(|e| {
                warn!("Metadata insert for {} failed: {}", file.original_filename, e);
                RejectedFile::new(&file.original_filename, ErrorCode::DatabaseError, e.to_string())
            })?;

        self.hub
            .publish(&StatusNotification::now(
                id,
                PhotoStatus::Uploaded,
                format!("Uploaded {}", photo.original_filename),
            ))
            .await;

        match self.enqueue_and_mark(&photo).await {
            Ok(queued) => Ok(queued),
            Err(reason) => {
                // The blob stays addressable; the photo records the
                // failure instead of being rolled back.
                warn!("Enqueue of photo {} failed: {}", id, reason);
                if let Err(e) = self
                    .coordinator
                    .transition(id, PhotoStatus::Failed, &reason)
                    .await
                {
                    warn!("Could not mark photo {} failed: {}", id, e);
                }
                Err(RejectedFile::new(
                    &photo.original_filename,
                    ErrorCode::ProcessingError,
                    reason,
                ))
            }
        }
    }

    async fn enqueue_and_mark(&self, photo: &Photo) -> Result<Photo, String> {
        self.queue
            .enqueue(&JobMessage {
                photo_id: photo.id,
                filename: photo.filename.clone(),
                storage_path: photo.storage_path.clone(),
            })
            .await
            .map_err(|e| format!("queue append failed: {e}"))?;

        let queued = self
            .coordinator
            .transition(photo.id, PhotoStatus::Queued, "Queued for processing")
            .await
            .map_err(|e| format!("status update failed: {e}"))?;

        Ok(queued.unwrap_or_else(|| photo.clone()))
    }
}
