//! Consumer-group runtime for the worker role.
//!
//! Two loops share the runtime: the live loop reads fresh deliveries
//! every second, the reclaim loop adopts messages another consumer took
//! but never acknowledged. Both dispatch into a bounded worker pool and
//! return to their tick immediately, so a slow batch never stalls the
//! next read.

use deadpool_redis::Pool;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::JobMessage;
use crate::config::QueueConfig;
use crate::storage::{StorageError, StorageResult};
use crate::worker::{JobDisposition, JobHandler};

/// Joins the stream as one named consumer in the worker group and runs
/// the delivery loops until the task is dropped.
pub struct ConsumerRuntime {
    pool: Pool,
    handler: Arc<JobHandler>,
    config: QueueConfig,
    workers: Arc<Semaphore>,
}

impl ConsumerRuntime {
    pub fn new(pool: Pool, handler: Arc<JobHandler>, config: QueueConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_pool_size));
        Self {
            pool,
            handler,
            config,
            workers,
        }
    }

    /// Create the consumer group unconditionally, then run both loops.
    /// Returns only on a startup failure; shutdown is external (the
    /// caller drops the future; pending messages are reclaimed later).
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.ensure_group().await?;
        info!(
            "Consumer {} joined group {} on stream {}",
            self.config.consumer, self.config.group, self.config.stream
        );

        let live = {
            let runtime = self.clone();
            tokio::spawn(async move { runtime.live_loop().await })
        };
        let reclaim = {
            let runtime = self.clone();
            tokio::spawn(async move { runtime.reclaim_loop().await })
        };

        let _ = tokio::try_join!(live, reclaim);
        Ok(())
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
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn live_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.read_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if let Err(e) = Self::read_new_messages(&self).await {
                warn!("Stream read failed: {}", e);
            }
        }
    }

    async fn reclaim_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.reclaim_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if let Err(e) = Self::reclaim_pending(&self).await {
                warn!("Pending reclaim failed: {}", e);
            }
        }
    }

    /// One live tick: read up to the batch size of new deliveries and
    /// dispatch each to the worker pool.
    async fn read_new_messages(this: &Arc<Self>) -> StorageResult<()> {
        let mut conn = this
            .pool
            .get()
            .await
            .map_err(|e| StorageError::connection(e.to_string()))?;

        let options = StreamReadOptions::default()
            .group(&this.config.group, &this.config.consumer)
            .count(this.config.read_count);
        let reply: StreamReadReply = match conn
            .xread_options(&[&this.config.stream], &[">"], &options)
            .await
        {
            Ok(reply) => reply,
            // Stream or group not created yet: skip this tick.
            Err(e) if e.code() == Some("NOGROUP") => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for key in reply.keys {
            for entry in key.ids {
                Self::dispatch(this, entry);
            }
        }
        Ok(())
    }

    /// One reclaim tick: claim messages whose idle time exceeds the
    /// minimum (their consumer died or stalled) and dispatch them
    /// through the same path.
    async fn reclaim_pending(this: &Arc<Self>) -> StorageResult<()> {
        let mut conn = this
            .pool
            .get()
            .await
            .map_err(|e| StorageError::connection(e.to_string()))?;

        let options = StreamAutoClaimOptions::default().count(this.config.claim_count);
        let reply: StreamAutoClaimReply = match conn
            .xautoclaim_options(
                &this.config.stream,
                &this.config.group,
                &this.config.consumer,
                this.config.min_idle.as_millis() as u64,
                "0-0",
                options,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) if e.code() == Some("NOGROUP") => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if !reply.claimed.is_empty() {
            info!("Reclaimed {} pending messages", reply.claimed.len());
        }
        for entry in reply.claimed {
            Self::dispatch(this, entry);
        }
        Ok(())
    }

    /// Hand one delivered entry to the worker pool without waiting for
    /// it to finish.
    fn dispatch(this: &Arc<Self>, entry: StreamId) {
        let runtime = this.clone();
        tokio::spawn(async move {
            let _permit = runtime
                .workers
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore never closes");
            runtime.handle_entry(entry).await;
        });
    }

    async fn handle_entry(&self, entry: StreamId) {
        let disposition = match JobMessage::from_fields(&entry.map) {
            Ok(message) => {
                debug!("Processing entry {} (photo {})", entry.id, message.photo_id);
                self.handler.handle(&message).await
            }
            Err(e) => {
                // Malformed entries can never succeed; drop them.
                warn!("Discarding malformed stream entry {}: {}", entry.id, e);
                JobDisposition::Ack
            }
        };

        match disposition {
            JobDisposition::Ack => {
                if let Err(e) = self.ack(&entry.id).await {
                    // The message stays pending and will be re-delivered;
                    // the handler is idempotent for finished photos.
                    warn!("Ack of entry {} failed: {}", entry.id, e);
                }
            }
            JobDisposition::Retry => {
                debug!("Leaving entry {} pending for reclaim", entry.id);
            }
        }
    }

    async fn ack(&self, entry_id: &str) -> StorageResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StorageError::connection(e.to_string()))?;
        let _acked: i64 = conn
            .xack(&self.config.stream, &self.config.group, &[entry_id])
            .await?;
        Ok(())
    }
}
