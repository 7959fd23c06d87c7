//! Blob store adapter.
//!
//! Wraps a bucket-scoped object store behind the [`BlobStore`] trait.
//! Every `put` takes a full owned byte buffer so uploads can run on a
//! worker pool detached from whatever produced the bytes.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{StorageError, StorageResult};
use crate::config::ObjectStoreConfig;

/// The two buckets the pipeline writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Originals,
    Thumbnails,
}

/// Bucket-scoped object storage. Keys are sanitized storage filenames,
/// never user-controlled paths.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create both buckets if they do not exist. Idempotent.
    async fn ensure_buckets(&self) -> StorageResult<()>;

    /// Store an object. The buffer is owned by the call.
    async fn put(
        &self,
        bucket: Bucket,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> StorageResult<()>;

    /// Fetch an object's bytes, byte-for-byte as stored.
    async fn get(&self, bucket: Bucket, key: &str) -> StorageResult<Bytes>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, bucket: Bucket, key: &str) -> StorageResult<()>;
}

/// S3-compatible blob store (AWS S3, MinIO, or anything speaking the
/// same API).
pub struct S3BlobStore {
    client: Arc<Client>,
    config: ObjectStoreConfig,
}

impl S3BlobStore {
    pub async fn new(config: &ObjectStoreConfig) -> StorageResult<Self> {
        info!("Initializing object store client");

        let mut loader =
            aws_config::from_env().region(aws_config::Region::new(config.region.clone()));
        if let Some(ref endpoint) = config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let aws_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(config.force_path_style)
            .build();

        Ok(Self {
            client: Arc::new(Client::from_conf(s3_config)),
            config: config.clone(),
        })
    }

    fn bucket_name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Originals => &self.config.photos_bucket,
            Bucket::Thumbnails => &self.config.thumbnails_bucket,
        }
    }

    async fn ensure_bucket(&self, name: &str) -> StorageResult<()> {
        if self.client.head_bucket().bucket(name).send().await.is_ok() {
            return Ok(());
        }
        if let Err(err) = self.client.create_bucket().bucket(name).send().await {
            let service = err.into_service_error();
            if !service.is_bucket_already_owned_by_you() && !service.is_bucket_already_exists() {
                return Err(StorageError::connection(format!(
                    "failed to create bucket {name}: {service}"
                )));
            }
        }
        info!("Created bucket {}", name);
        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn ensure_buckets(&self) -> StorageResult<()> {
        self.ensure_bucket(&self.config.photos_bucket).await?;
        self.ensure_bucket(&self.config.thumbnails_bucket).await?;
        Ok(())
    }

    async fn put(
        &self,
        bucket: Bucket,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> StorageResult<()> {
        debug!("Storing object {}/{} ({} bytes)", self.bucket_name(bucket), key, bytes.len());

        self.client
            .put_object()
            .bucket(self.bucket_name(bucket))
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::connection(format!("failed to store object {key}: {e}")))?;

        Ok(())
    }

    async fn get(&self, bucket: Bucket, key: &str) -> StorageResult<Bytes> {
        debug!("Fetching object {}/{}", self.bucket_name(bucket), key);

        let result = self
            .client
            .get_object()
            .bucket(self.bucket_name(bucket))
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    StorageError::not_found(format!("object {key}"))
                } else {
                    StorageError::connection(format!("failed to fetch object {key}: {service}"))
                }
            })?;

        let bytes = result
            .body
            .collect()
            .await
            .map_err(|e| StorageError::connection(format!("failed to read object {key}: {e}")))?
            .into_bytes();

        Ok(bytes)
    }

    async fn delete(&self, bucket: Bucket, key: &str) -> StorageResult<()> {
        debug!("Deleting object {}/{}", self.bucket_name(bucket), key);

        self.client
            .delete_object()
            .bucket(self.bucket_name(bucket))
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::connection(format!("failed to delete object {key}: {e}")))?;

        Ok(())
    }
}
