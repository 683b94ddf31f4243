//! Storage backend trait for pluggable blob stores.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};

use crate::error::AppError;
use crate::result::AppResult;

/// Metadata about a stored object.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StorageObjectMeta {
    /// Key within the storage backend.
    pub key: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Last modified timestamp.
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag reported by the backend, if any.
    pub etag: Option<String>,
    /// Whether this is a directory (or a directory marker object).
    pub is_directory: bool,
}

/// A byte stream type used for reading and writing blob contents.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Wrap an in-memory buffer as a single-chunk [`ByteStream`].
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drain a [`ByteStream`] into memory.
pub async fn collect_stream(stream: ByteStream) -> AppResult<Bytes> {
    let chunks: Vec<Bytes> = stream
        .try_collect()
        .await
        .map_err(|e| AppError::with_source(crate::ErrorKind::StorageIo, "Failed to read stream", e))?;
    Ok(Bytes::from(chunks.concat()))
}

/// Trait for blob storage backends.
///
/// Backends are independent and non-transactional. Keys are opaque
/// `/`-separated strings derived by `filehub_storage::keys`. The trait is
/// defined here in `filehub-core` and implemented in `filehub-storage`.
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug + 'static {
    /// Return the backend type name (e.g., "local", "s3").
    fn provider_type(&self) -> &str;

    /// Check whether the backend is healthy and reachable.
    async fn health_check(&self) -> AppResult<bool>;

    /// Store a stream under `key`, replacing any existing object.
    ///
    /// Readers never observe a partially written object. The number of
    /// bytes received must equal `size`; otherwise nothing is stored and a
    /// `StorageIo` error is returned.
    async fn save(&self, key: &str, stream: ByteStream, size: u64) -> AppResult<u64>;

    /// Open the object stored under `key`.
    async fn get(&self, key: &str) -> AppResult<ByteStream>;

    /// Read an object fully into memory.
    async fn read_bytes(&self, key: &str) -> AppResult<Bytes> {
        let stream = self.get(key).await?;
        collect_stream(stream).await
    }

    /// Delete the object under `key`. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Check whether an object exists under `key`.
    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// Get metadata about an object.
    async fn stat(&self, key: &str) -> AppResult<StorageObjectMeta>;

    /// Copy an object to a new key within this backend.
    async fn copy(&self, from: &str, to: &str) -> AppResult<()>;

    /// Move an object to a new key within this backend.
    async fn rename(&self, from: &str, to: &str) -> AppResult<()>;

    /// Create a directory (or directory marker) under `key`.
    async fn create_dir(&self, key: &str) -> AppResult<()>;

    /// Delete everything stored under the `key` prefix.
    async fn delete_dir(&self, key: &str) -> AppResult<()>;

    /// List every object stored under `prefix` (recursively). An empty
    /// prefix lists the whole backend.
    async fn list(&self, prefix: &str) -> AppResult<Vec<StorageObjectMeta>>;

    /// Remove abandoned in-flight uploads started before `older_than`.
    /// Returns the number of uploads cleaned up.
    async fn cleanup_incomplete(&self, older_than: DateTime<Utc>) -> AppResult<u64>;
}
