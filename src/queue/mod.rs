//! Durable job queue on a stream with consumer groups.

pub mod consumer;
pub mod producer;

use async_trait::async_trait;
use redis::{from_redis_value, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::storage::{StorageError, StorageResult};

/// Stream field names.
const FIELD_PHOTO_ID: &str = "photoId";
const FIELD_FILENAME: &str = "filename";
const FIELD_STORAGE_PATH: &str = "storagePath";

/// One processing job, carried as a flat field map on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMessage {
    pub photo_id: Uuid,
    pub filename: String,
    pub storage_path: String,
}

impl JobMessage {
    /// Flatten into stream fields.
    pub fn to_fields(&self) -> [(&'static str, String); 3] {
        [
            (FIELD_PHOTO_ID, self.photo_id.to_string()),
            (FIELD_FILENAME, self.filename.clone()),
            (FIELD_STORAGE_PATH, self.storage_path.clone()),
        ]
    }

    /// Parse a delivered stream entry. A malformed entry is an error the
    /// consumer acknowledges and discards rather than retries.
    pub fn from_fields(fields: &HashMap<String, Value>) -> StorageResult<Self> {
        let get = |name: &str| -> StorageResult<String> {
            let value = fields
                .get(name)
                .ok_or_else(|| StorageError::queue(format!("message missing field {name}")))?;
            from_redis_value(value)
                .map_err(|e| StorageError::queue(format!("message field {name} unreadable: {e}")))
        };

        let photo_id = get(FIELD_PHOTO_ID)?;
        let photo_id = Uuid::parse_str(&photo_id)
            .map_err(|e| StorageError::queue(format!("message has bad photo id: {e}")))?;

        Ok(Self {
            photo_id,
            filename: get(FIELD_FILENAME)?,
            storage_path: get(FIELD_STORAGE_PATH)?,
        })
    }
}

/// Producer side of the queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append one job to the stream; returns the stream entry id.
    async fn enqueue(&self, message: &JobMessage) -> StorageResult<String>;
}

/// In-memory queue for testing the ingest path.
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<Vec<JobMessage>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent enqueue fail, to exercise the
    /// enqueue-failure path.
    pub fn fail_enqueues(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn drain(&self) -> Vec<JobMessage> {
        std::mem::take(&mut *self.messages.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, message: &JobMessage) -> StorageResult<String> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StorageError::queue("stream unavailable"));
        }
        let mut messages = self.messages.lock().await;
        messages.push(message.clone());
        Ok(format!("0-{}", messages.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_fields() {
        let message = JobMessage {
            photo_id: Uuid::new_v4(),
            filename: "beach.png".into(),
            storage_path: "0af3.png".into(),
        };

        let fields: HashMap<String, Value> = message
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::BulkString(v.into_bytes())))
            .collect();

        assert_eq!(JobMessage::from_fields(&fields).unwrap(), message);
    }

    #[test]
    fn missing_field_is_rejected() {
        let fields = HashMap::from([(
            FIELD_PHOTO_ID.to_string(),
            Value::BulkString(Uuid::new_v4().to_string().into_bytes()),
        )]);
        let err = JobMessage::from_fields(&fields).unwrap_err();
        assert!(err.to_string().contains("filename"));
    }

    #[test]
    fn bad_photo_id_is_rejected() {
        let fields = HashMap::from([
            (
                FIELD_PHOTO_ID.to_string(),
                Value::BulkString(b"not-a-uuid".to_vec()),
            ),
            (
                FIELD_FILENAME.to_string(),
                Value::BulkString(b"a.png".to_vec()),
            ),
            (
                FIELD_STORAGE_PATH.to_string(),
                Value::BulkString(b"k.png".to_vec()),
            ),
        ]);
        assert!(JobMessage::from_fields(&fields).is_err());
    }
}
