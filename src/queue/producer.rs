//! Producer side of the photo stream.

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::{JobMessage, JobQueue};
use crate::config::QueueConfig;
use crate::storage::{StorageError, StorageResult};

/// Appends jobs to the stream. The stream materializes on the first
/// append; the consumer group is created lazily after the first
/// successful append so consumers starting before any producer still
/// find it.
pub struct RedisQueueProducer {
    pool: Pool,
    config: QueueConfig,
    group_created: AtomicBool,
}

impl RedisQueueProducer {
    pub fn new(pool: Pool, config: QueueConfig) -> Self {
        Self {
            pool,
            config,
            group_created: AtomicBool::new(false),
        }
    }

    async fn ensure_group(&self) -> StorageResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StorageError::connection(e.to_string()))?;

        let result: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.config.stream, &self.config.group, "0")
            .await;
        match result {
            Ok(()) => {
                info!("Created consumer group {}", self.config.group);
                Ok(())
            }
            // Someone else created it first: also success.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl JobQueue for RedisQueueProducer {
    async fn enqueue(&self, message: &JobMessage) -> StorageResult<String> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StorageError::connection(e.to_string()))?;

        let entry_id: String = conn
            .xadd(&self.config.stream, "*", &message.to_fields())
            .await?;
        debug!(
            "Enqueued photo {} as stream entry {}",
            message.photo_id, entry_id
        );

        if !self.group_created.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.ensure_group().await {
                // The append itself succeeded. Retry group creation on
                // the next append; the worker also creates the group at
                // startup.
                warn!("Consumer group creation failed: {}", e);
                self.group_created.store(false, Ordering::SeqCst);
            }
        }

        Ok(entry_id)
    }
}
