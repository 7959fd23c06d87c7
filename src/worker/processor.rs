//! Processing simulation.
//!
//! No real decoding or resizing happens; each photo runs through four
//! timed sub-steps, each recording a `PROCESSING` event.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use uuid::Uuid;

use crate::events::EventLogService;
use crate::photo::EventType;
use crate::storage::StorageResult;

/// One simulated sub-step with its duration window.
#[derive(Debug, Clone)]
pub struct ProcessingStep {
    pub message: String,
    pub min: Duration,
    pub max: Duration,
}

impl ProcessingStep {
    pub fn new(message: &str, min_ms: u64, max_ms: u64) -> Self {
        Self {
            message: message.to_string(),
            min: Duration::from_millis(min_ms),
            max: Duration::from_millis(max_ms),
        }
    }
}

/// The standard four-step sequence: 2.5–5.0 s total.
pub fn default_steps() -> Vec<ProcessingStep> {
    vec![
        ProcessingStep::new("File validation completed", 500, 1000),
        ProcessingStep::new("Metadata extracted", 500, 1000),
        ProcessingStep::new("Thumbnail created", 1000, 2000),
        ProcessingStep::new("Image optimization completed", 500, 1000),
    ]
}

/// Runs the simulation for one photo. Durations are independently
/// uniform-random within each step's window.
pub struct PhotoProcessor {
    events: Arc<EventLogService>,
    steps: Vec<ProcessingStep>,
}

impl PhotoProcessor {
    pub fn new(events: Arc<EventLogService>) -> Self {
        Self::with_steps(events, default_steps())
    }

    pub fn with_steps(events: Arc<EventLogService>, steps: Vec<ProcessingStep>) -> Self {
        Self { events, steps }
    }

    /// Run every step in order. An error from the event log aborts the
    /// run and surfaces to the caller as a failure of this photo.
    pub async fn run(&self, photo_id: Uuid) -> StorageResult<()> {
        for step in &self.steps {
            let delay = {
                let mut rng = rand::rng();
                rng.random_range(step.min.as_millis() as u64..=step.max.as_millis() as u64)
            };
            sleep(Duration::from_millis(delay)).await;

            self.events
                .append(photo_id, EventType::Processing, step.message.clone(), None)
                .await?;
            debug!("Photo {}: {}", photo_id, step.message);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn instant_steps() -> Vec<ProcessingStep> {
    default_steps()
        .into_iter()
        .map(|step| ProcessingStep {
            min: Duration::ZERO,
            max: Duration::from_millis(1),
            ..step
        })
        .collect()
}
