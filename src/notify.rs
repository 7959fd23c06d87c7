//! Notification fabric: an in-process publish/subscribe broker.
//!
//! Two channel shapes: the broadcast topic `photo-status/all` carries
//! every status transition, and each photo additionally gets
//! `photo-status/{id}`. Per-subscriber buffering rides on
//! `tokio::sync::broadcast`: a bounded ring per receiver where the
//! oldest messages are dropped on overflow, so a slow subscriber loses
//! freshness, not liveness. Dropped transitions are recoverable through
//! the polling endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::photo::PhotoStatus;

/// Topic receiving every status transition on any photo.
pub const BROADCAST_TOPIC: &str = "photo-status/all";

/// Per-photo topic name.
pub fn photo_topic(photo_id: Uuid) -> String {
    format!("photo-status/{photo_id}")
}

/// One published status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotification {
    pub photo_id: Uuid,
    pub status: PhotoStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusNotification {
    pub fn now(photo_id: Uuid, status: PhotoStatus, message: impl Into<String>) -> Self {
        Self {
            photo_id,
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Topic broker. The registry lock is held only to look up or create
/// senders; delivery happens after it is released.
pub struct NotificationHub {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<StatusNotification>>>,
}

impl NotificationHub {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Join a topic. The topic is created on first subscribe.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<StatusNotification> {
        if let Some(sender) = self.topics.read().await.get(topic) {
            return sender.subscribe();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish one transition to the broadcast topic and the photo's own
    /// topic. Topics nobody subscribed to are skipped; topics whose last
    /// subscriber left are pruned.
    pub async fn publish(&self, notification: &StatusNotification) {
        let per_photo = photo_topic(notification.photo_id);
        let senders: Vec<(String, broadcast::Sender<StatusNotification>)> = {
            let topics = self.topics.read().await;
            [BROADCAST_TOPIC, per_photo.as_str()]
                .iter()
                .filter_map(|name| {
                    topics
                        .get(*name)
                        .map(|sender| (name.to_string(), sender.clone()))
                })
                .collect()
        };

        let mut stale = Vec::new();
        for (name, sender) in senders {
            if sender.send(notification.clone()).is_err() {
                stale.push(name);
            }
        }

        if !stale.is_empty() {
            let mut topics = self.topics.write().await;
            for name in stale {
                if topics
                    .get(&name)
                    .is_some_and(|s| s.receiver_count() == 0)
                {
                    debug!("Pruning idle topic {}", name);
                    topics.remove(&name);
                }
            }
        }
    }

    #[cfg(test)]
    async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
