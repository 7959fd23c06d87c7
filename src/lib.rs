//! # Lightbox
//!
//! Server-side core of a photo ingest and asynchronous processing
//! pipeline. Uploads are validated, stored durably, queued, and driven
//! through a lifecycle state machine by background workers, with status
//! transitions fanned out to live subscribers.
//!
//! ## Modules
//!
//! - `app` - Process composition for the two roles (ingest, worker)
//! - `cli` - Command-line interface
//! - `config` - Environment-driven configuration
//! - `error` - API error taxonomy and response envelope
//! - `events` - Append-only event log service
//! - `ingest` - Validation, sanitization, parallel upload, enqueue
//! - `lifecycle` - Status transition coordinator
//! - `notify` - In-process publish/subscribe notification fabric
//! - `photo` - Domain model and the transition table
//! - `queue` - Stream-backed job queue: producer and consumer-group runtime
//! - `server` - HTTP API and the WebSocket subscriber endpoint
//! - `storage` - Blob store and metadata store adapters
//! - `worker` - Per-message processing contract and simulation

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod lifecycle;
pub mod notify;
pub mod photo;
pub mod queue;
pub mod server;
pub mod storage;
pub mod worker;
