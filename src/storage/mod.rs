//! Storage layer: blob store adapter and metadata store.

pub mod blob;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod postgres;

pub use blob::{BlobStore, Bucket, S3BlobStore};
pub use error::{StorageError, StorageResult};
pub use metadata::{
    EventFilter, MetadataStore, Page, PhotoFilter, PhotoSort, TransitionOutcome,
};
pub use postgres::PgMetadataStore;
