//! Storage manager: the single entry point services use for blob I/O.
//!
//! Wraps one backend and bounds every call with the configured operation
//! timeout. A timed-out call surfaces as a `StorageIo` error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use filehub_core::config::StorageConfig;
use filehub_core::error::AppError;
use filehub_core::result::AppResult;
use filehub_core::traits::storage::{ByteStream, StorageBackend, StorageObjectMeta};

use crate::providers::LocalStorageBackend;

/// Storage facade holding the configured backend.
#[derive(Debug, Clone)]
pub struct StorageManager {
    backend: Arc<dyn StorageBackend>,
    timeout: Duration,
}

impl StorageManager {
    /// Wrap an existing backend.
    pub fn new(backend: Arc<dyn StorageBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Build the backend named by `storage.provider`.
    pub async fn from_config(config: &StorageConfig) -> AppResult<Self> {
        let backend: Arc<dyn StorageBackend> = match config.provider.as_str() {
            "local" => Arc::new(LocalStorageBackend::new(&config.local.root_path).await?),
            #[cfg(feature = "s3")]
            "s3" => Arc::new(crate::providers::S3StorageBackend::new(&config.s3).await?),
            other => {
                return Err(AppError::configuration(format!(
                    "Unsupported storage provider: '{other}'"
                )));
            }
        };
        info!(
            provider = backend.provider_type(),
            timeout_seconds = config.operation_timeout_seconds,
            "Storage backend ready"
        );
        Ok(Self::new(
            backend,
            Duration::from_secs(config.operation_timeout_seconds.max(1)),
        ))
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    async fn bounded<T, F>(&self, operation: &'static str, key: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Storage operation timed out"
                );
                Err(AppError::storage(format!(
                    "Storage {operation} on '{key}' timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    /// Delete a list of keys, returning the ones that failed with their errors.
    pub async fn delete_many(&self, keys: &[String]) -> Vec<(String, AppError)> {
        let mut failures = Vec::new();
        for key in keys {
            if let Err(e) = self.delete(key).await {
                warn!(key = %key, error = %e, "Failed to delete blob");
                failures.push((key.clone(), e));
            }
        }
        failures
    }
}

#[async_trait]
impl StorageBackend for StorageManager {
    fn provider_type(&self) -> &str {
        self.backend.provider_type()
    }

    async fn health_check(&self) -> AppResult<bool> {
        self.bounded("health_check", "", self.backend.health_check()).await
    }

    async fn save(&self, key: &str, stream: ByteStream, size: u64) -> AppResult<u64> {
        self.bounded("save", key, self.backend.save(key, stream, size)).await
    }

    async fn get(&self, key: &str) -> AppResult<ByteStream> {
        self.bounded("get", key, self.backend.get(key)).await
    }

    async fn read_bytes(&self, key: &str) -> AppResult<Bytes> {
        self.bounded("read", key, self.backend.read_bytes(key)).await
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.bounded("delete", key, self.backend.delete(key)).await
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        self.bounded("exists", key, self.backend.exists(key)).await
    }

    async fn stat(&self, key: &str) -> AppResult<StorageObjectMeta> {
        self.bounded("stat", key, self.backend.stat(key)).await
    }

    async fn copy(&self, from: &str, to: &str) -> AppResult<()> {
        self.bounded("copy", to, self.backend.copy(from, to)).await
    }

    async fn rename(&self, from: &str, to: &str) -> AppResult<()> {
        self.bounded("rename", to, self.backend.rename(from, to)).await
    }

    async fn create_dir(&self, key: &str) -> AppResult<()> {
        self.bounded("create_dir", key, self.backend.create_dir(key)).await
    }

    async fn delete_dir(&self, key: &str) -> AppResult<()> {
        self.bounded("delete_dir", key, self.backend.delete_dir(key)).await
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<StorageObjectMeta>> {
        self.bounded("list", prefix, self.backend.list(prefix)).await
    }

    async fn cleanup_incomplete(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        self.bounded(
            "cleanup_incomplete",
            "",
            self.backend.cleanup_incomplete(older_than),
        )
        .await
    }
}
