//! S3-compatible object storage backend (requires the `s3` feature).
//!
//! The backend itself is thin; client construction, the multipart driver
//! and prefix deletion live in the sibling helper modules so that other
//! S3-flavoured backends can reuse them.

pub mod client;
pub mod multipart;
pub mod prefix;

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use filehub_core::config::S3StorageConfig;
use filehub_core::error::AppError;
use filehub_core::result::AppResult;
use filehub_core::traits::storage::{ByteStream, StorageBackend, StorageObjectMeta};

/// S3-compatible storage backend.
#[derive(Debug, Clone)]
pub struct S3StorageBackend {
    client: Client,
    settings: S3StorageConfig,
}

impl S3StorageBackend {
    /// Create a new S3 backend from configuration.
    pub async fn new(settings: &S3StorageConfig) -> AppResult<Self> {
        let client = client::build_client(settings).await?;
        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    fn bucket(&self) -> &str {
        &self.settings.bucket
    }

    async fn put_small(&self, key: &str, stream: ByteStream, size: u64) -> AppResult<u64> {
        let chunks: Vec<bytes::Bytes> = stream
            .try_collect()
            .await
            .map_err(|e| AppError::storage(format!("Stream read error for {key}: {e}")))?;
        let data = chunks.concat();
        if data.len() as u64 != size {
            return Err(AppError::storage(format!(
                "Size mismatch for {key}: expected {size} bytes, received {}",
                data.len()
            )));
        }

        self.client
            .put_object()
            .bucket(self.bucket())
            .key(key)
            .content_length(size as i64)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|e| {
                AppError::storage(format!("Failed to put {key}: {}", DisplayErrorContext(&e)))
            })?;
        Ok(size)
    }
}

fn to_chrono(t: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())
}

#[async_trait]
impl StorageBackend for S3StorageBackend {
    fn provider_type(&self) -> &str {
        "s3"
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(self
            .client
            .head_bucket()
            .bucket(self.bucket())
            .send()
            .await
            .is_ok())
    }

    async fn save(&self, key: &str, stream: ByteStream, size: u64) -> AppResult<u64> {
        let written = if size <= self.settings.multipart_threshold_bytes {
            self.put_small(key, stream, size).await?
        } else {
            multipart::upload(
                &self.client,
                self.bucket(),
                key,
                stream,
                size,
                self.settings.part_size_bytes,
            )
            .await?
        };
        debug!(key, bytes = written, "Saved object");
        Ok(written)
    }

    async fn get(&self, key: &str) -> AppResult<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(self.bucket())
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    AppError::not_found(format!("Object not found: {key}"))
                } else {
                    AppError::storage(format!("Failed to get {key}: {}", DisplayErrorContext(&e)))
                }
            })?;

        let reader = output.body.into_async_read();
        Ok(Box::pin(ReaderStream::new(reader)))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.client
            .delete_object()
            .bucket(self.bucket())
            .key(key)
            .send()
            .await
            .map_err(|e| {
                AppError::storage(format!("Failed to delete {key}: {}", DisplayErrorContext(&e)))
            })?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        match self.stat(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind == filehub_core::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stat(&self, key: &str) -> AppResult<StorageObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(self.bucket())
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_not_found()) {
                    AppError::not_found(format!("Object not found: {key}"))
                } else {
                    AppError::storage(format!("Failed to stat {key}: {}", DisplayErrorContext(&e)))
                }
            })?;

        Ok(StorageObjectMeta {
            key: key.to_string(),
            size_bytes: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: output.last_modified().and_then(to_chrono),
            etag: output.e_tag().map(str::to_string),
            is_directory: key.ends_with('/'),
        })
    }

    async fn copy(&self, from: &str, to: &str) -> AppResult<()> {
        let source = format!("{}/{}", self.bucket(), urlencoding::encode(from));
        self.client
            .copy_object()
            .bucket(self.bucket())
            .key(to)
            .copy_source(source)
            .send()
            .await
            .map_err(|e| {
                let code = e.as_service_error().and_then(|s| s.code());
                let status = e.raw_response().map(|r| r.status().as_u16());
                if missing_source(code, status) {
                    AppError::not_found(format!("Object not found: {from}"))
                } else {
                    AppError::storage(format!(
                        "Failed to copy {from} -> {to}: {}",
                        DisplayErrorContext(&e)
                    ))
                }
            })?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> AppResult<()> {
        self.copy(from, to).await?;
        self.delete(from).await
    }

    async fn create_dir(&self, key: &str) -> AppResult<()> {
        let marker = format!("{}/", key.trim_end_matches('/'));
        self.client
            .put_object()
            .bucket(self.bucket())
            .key(&marker)
            .content_length(0)
            .body(S3Body::from(Vec::new()))
            .send()
            .await
            .map_err(|e| {
                AppError::storage(format!(
                    "Failed to create marker {marker}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn delete_dir(&self, key: &str) -> AppResult<()> {
        let trimmed = key.trim_matches('/');
        if trimmed.is_empty() {
            return Err(AppError::validation("Refusing to delete the whole bucket"));
        }
        let deleted = prefix::delete_all(
            &self.client,
            self.bucket(),
            &format!("{trimmed}/"),
            self.settings.delete_batch_size,
            self.settings.delete_max_rounds,
        )
        .await?;
        debug!(prefix = trimmed, deleted, "Deleted prefix");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<StorageObjectMeta>> {
        let mut objects = prefix::list_all(&self.client, self.bucket(), prefix).await?;
        objects.retain(|o| !o.is_directory);
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn cleanup_incomplete(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        multipart::abort_stale(&self.client, self.bucket(), older_than).await
    }
}

/// Whether a failed `CopyObject` means the source key does not exist.
///
/// S3 reports a missing source as `NoSuchKey`; some compatible stores only
/// answer 404 without an error code. Other 404 codes such as `NoSuchBucket`
/// stay storage faults.
fn missing_source(code: Option<&str>, status: Option<u16>) -> bool {
    match code {
        Some(code) => matches!(code, "NoSuchKey" | "NotFound"),
        None => status == Some(404),
    }
}
