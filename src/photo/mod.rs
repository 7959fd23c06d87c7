//! Photo domain model: the primary entity, its lifecycle status, and the
//! append-only event log records attached to it.

pub mod status;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a photo.
///
/// `Completed` and `Failed` are terminal: once reached, no further
/// transition is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhotoStatus {
    Uploaded,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl PhotoStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UPLOADED" => Some(Self::Uploaded),
            "QUEUED" => Some(Self::Queued),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// The event type recorded when a photo enters this status.
    pub fn event_type(self) -> EventType {
        match self {
            Self::Uploaded => EventType::Uploaded,
            Self::Queued => EventType::Queued,
            Self::Processing => EventType::Processing,
            Self::Completed => EventType::Completed,
            Self::Failed => EventType::Failed,
        }
    }
}

impl fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of an event-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Uploaded,
    Queued,
    Processing,
    Completed,
    Failed,
    Renamed,
    Restored,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Renamed => "RENAMED",
            Self::Restored => "RESTORED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UPLOADED" => Some(Self::Uploaded),
            "QUEUED" => Some(Self::Queued),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "RENAMED" => Some(Self::Renamed),
            "RESTORED" => Some(Self::Restored),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored photo row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: Uuid,
    pub short_id: Option<String>,
    /// Sanitized display filename.
    pub filename: String,
    /// Filename exactly as the client provided it.
    pub original_filename: String,
    pub status: PhotoStatus,
    pub size: i64,
    pub mime_type: String,
    /// Object-store key of the original bytes. Never user-controlled.
    pub storage_path: String,
    pub thumbnail_path: Option<String>,
    pub metadata: Value,
    pub is_favorite: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Photo {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Fields required to insert a new photo. Status, flags and timestamps
/// are assigned by the metadata store.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub id: Uuid,
    pub filename: String,
    pub original_filename: String,
    pub size: i64,
    pub mime_type: String,
    pub storage_path: String,
}

impl NewPhoto {
    /// Log-friendly 8-character reference derived from the id.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

/// One event-log entry. Events for a photo are strictly ordered by
/// `(timestamp, id)`; the serial id breaks wall-clock ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: i64,
    pub photo_id: Uuid,
    pub event_type: EventType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Fields for appending one event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub photo_id: Uuid,
    pub event_type: EventType,
    pub message: String,
    pub metadata: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            PhotoStatus::Uploaded,
            PhotoStatus::Queued,
            PhotoStatus::Processing,
            PhotoStatus::Completed,
            PhotoStatus::Failed,
        ] {
            assert_eq!(PhotoStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PhotoStatus::parse("ARCHIVED"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(PhotoStatus::Completed.is_terminal());
        assert!(PhotoStatus::Failed.is_terminal());
        assert!(!PhotoStatus::Uploaded.is_terminal());
        assert!(!PhotoStatus::Queued.is_terminal());
        assert!(!PhotoStatus::Processing.is_terminal());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&PhotoStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
    }
}
