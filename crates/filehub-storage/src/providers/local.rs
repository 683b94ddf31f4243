//! Local filesystem storage backend.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use filehub_core::error::{AppError, ErrorKind};
use filehub_core::result::AppResult;
use filehub_core::traits::storage::{ByteStream, StorageBackend, StorageObjectMeta};

/// Directory under the root holding in-flight writes.
const TEMP_DIR: &str = ".tmp";

/// Local filesystem storage backend.
///
/// Writes go to `<root>/.tmp/<uuid>` and are renamed into place once
/// complete, so readers never see a partial object.
#[derive(Debug, Clone)]
pub struct LocalStorageBackend {
    /// Root directory for all stored blobs.
    root: PathBuf,
}

impl LocalStorageBackend {
    /// Create a new local backend rooted at the given path.
    pub async fn new(root_path: &str) -> AppResult<Self> {
        let root = PathBuf::from(root_path);
        fs::create_dir_all(root.join(TEMP_DIR)).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::StorageIo,
                format!("Failed to create storage root: {}", root.display()),
                e,
            )
        })?;
        Ok(Self { root })
    }

    /// Resolve a key to an absolute path within the root.
    fn resolve(&self, key: &str) -> AppResult<PathBuf> {
        let clean = key.trim_start_matches('/');
        let relative = Path::new(clean);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::validation(format!("Invalid storage key: {key}")));
        }
        Ok(self.root.join(relative))
    }

    /// Ensure the parent directory of a path exists.
    async fn ensure_parent(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::with_source(
                    ErrorKind::StorageIo,
                    format!("Failed to create parent directory: {}", parent.display()),
                    e,
                )
            })?;
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(TEMP_DIR).join(Uuid::new_v4().to_string())
    }

    /// Move a finished temp file into place.
    ///
    /// A concurrent delete may prune the freshly created parent directory,
    /// so a missing parent is recreated once.
    async fn publish(&self, temp: &Path, target: &Path, key: &str) -> AppResult<()> {
        self.ensure_parent(target).await?;
        let result = match fs::rename(temp, target).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.ensure_parent(target).await?;
                fs::rename(temp, target).await
            }
            other => other,
        };
        result.map_err(|e| {
            AppError::with_source(
                ErrorKind::StorageIo,
                format!("Failed to publish object: {key}"),
                e,
            )
        })
    }

    /// Write a stream to a fresh temp file, returning its path and length.
    async fn write_temp(&self, key: &str, mut stream: ByteStream) -> AppResult<(PathBuf, u64)> {
        let temp = self.temp_path();
        let mut file = fs::File::create(&temp).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::StorageIo,
                format!("Failed to create temp file for {key}"),
                e,
            )
        })?;

        let mut total_bytes = 0u64;
        let outcome: AppResult<()> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| {
                    AppError::with_source(ErrorKind::StorageIo, "Stream read error", e)
                })?;
                total_bytes += chunk.len() as u64;
                file.write_all(&chunk).await.map_err(|e| {
                    AppError::with_source(ErrorKind::StorageIo, "Failed to write chunk", e)
                })?;
            }
            file.flush().await.map_err(|e| {
                AppError::with_source(ErrorKind::StorageIo, "Failed to flush file", e)
            })?;
            file.sync_all().await.map_err(|e| {
                AppError::with_source(ErrorKind::StorageIo, "Failed to sync file", e)
            })
        }
        .await;
        drop(file);

        if let Err(e) = outcome {
            remove_quietly(&temp).await;
            return Err(e);
        }
        Ok((temp, total_bytes))
    }

    /// Prune now-empty directories between `path` and the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // Fails (and stops) as soon as a directory is not empty.
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}

fn map_not_found(key: &str, action: &str) -> impl FnOnce(std::io::Error) -> AppError {
    let key = key.to_string();
    let action = action.to_string();
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::not_found(format!("Object not found: {key}"))
        } else {
            AppError::with_source(ErrorKind::StorageIo, format!("Failed to {action}: {key}"), e)
        }
    }
}

fn modified_at(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

#[async_trait]
impl StorageBackend for LocalStorageBackend {
    fn provider_type(&self) -> &str {
        "local"
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn save(&self, key: &str, stream: ByteStream, size: u64) -> AppResult<u64> {
        let target = self.resolve(key)?;
        let (temp, written) = self.write_temp(key, stream).await?;

        if written != size {
            remove_quietly(&temp).await;
            return Err(AppError::storage(format!(
                "Size mismatch for {key}: expected {size} bytes, received {written}"
            )));
        }

        if let Err(e) = self.publish(&temp, &target, key).await {
            remove_quietly(&temp).await;
            return Err(e);
        }

        debug!(key, bytes = written, "Saved object");
        Ok(written)
    }

    async fn get(&self, key: &str) -> AppResult<ByteStream> {
        let full_path = self.resolve(key)?;
        let file = fs::File::open(&full_path)
            .await
            .map_err(map_not_found(key, "open object"))?;

        let stream = ReaderStream::new(file);
        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let full_path = self.resolve(key)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => {
                self.prune_empty_parents(&full_path).await;
                debug!(key, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::with_source(
                ErrorKind::StorageIo,
                format!("Failed to delete object: {key}"),
                e,
            )),
        }
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let full_path = self.resolve(key)?;
        fs::try_exists(&full_path).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::StorageIo,
                format!("Failed to check object: {key}"),
                e,
            )
        })
    }

    async fn stat(&self, key: &str) -> AppResult<StorageObjectMeta> {
        let full_path = self.resolve(key)?;
        let meta = fs::metadata(&full_path)
            .await
            .map_err(map_not_found(key, "stat object"))?;

        Ok(StorageObjectMeta {
            key: key.trim_start_matches('/').to_string(),
            size_bytes: meta.len(),
            last_modified: modified_at(&meta),
            etag: None,
            is_directory: meta.is_dir(),
        })
    }

    async fn copy(&self, from: &str, to: &str) -> AppResult<()> {
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        let temp = self.temp_path();

        fs::copy(&from_path, &temp)
            .await
            .map_err(map_not_found(from, "copy object"))?;

        if let Err(e) = self.publish(&temp, &to_path, to).await {
            remove_quietly(&temp).await;
            return Err(e);
        }
        debug!(from, to, "Copied object");
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> AppResult<()> {
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        self.ensure_parent(&to_path).await?;

        fs::rename(&from_path, &to_path)
            .await
            .map_err(map_not_found(from, "rename object"))?;
        self.prune_empty_parents(&from_path).await;
        debug!(from, to, "Renamed object");
        Ok(())
    }

    async fn create_dir(&self, key: &str) -> AppResult<()> {
        let full_path = self.resolve(key)?;
        fs::create_dir_all(&full_path).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::StorageIo,
                format!("Failed to create directory: {key}"),
                e,
            )
        })
    }

    async fn delete_dir(&self, key: &str) -> AppResult<()> {
        let full_path = self.resolve(key)?;
        if full_path == self.root {
            return Err(AppError::validation("Refusing to delete the storage root"));
        }
        match fs::remove_dir_all(&full_path).await {
            Ok(()) => {
                self.prune_empty_parents(&full_path).await;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::with_source(
                ErrorKind::StorageIo,
                format!("Failed to delete directory: {key}"),
                e,
            )),
        }
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<StorageObjectMeta>> {
        let prefix = prefix.trim_start_matches('/');
        let temp_root = self.root.join(TEMP_DIR);

        // Start from the deepest directory fully named by the prefix.
        let start = match prefix.rfind('/') {
            Some(pos) => self.resolve(&prefix[..pos])?,
            None => self.root.clone(),
        };

        let mut entries = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(AppError::with_source(
                        ErrorKind::StorageIo,
                        format!("Failed to list directory: {}", dir.display()),
                        e,
                    ));
                }
            };

            while let Some(entry) = reader.next_entry().await.map_err(|e| {
                AppError::with_source(ErrorKind::StorageIo, "Failed to read directory entry", e)
            })? {
                let path = entry.path();
                if path == temp_root {
                    continue;
                }
                let meta = entry.metadata().await.map_err(|e| {
                    AppError::with_source(ErrorKind::StorageIo, "Failed to get entry metadata", e)
                })?;
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(key) = self.key_for(&path) else {
                    continue;
                };
                if key.starts_with(prefix) {
                    entries.push(StorageObjectMeta {
                        key,
                        size_bytes: meta.len(),
                        last_modified: modified_at(&meta),
                        etag: None,
                        is_directory: false,
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn cleanup_incomplete(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let temp_root = self.root.join(TEMP_DIR);
        let mut reader = match fs::read_dir(&temp_root).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(AppError::with_source(
                    ErrorKind::StorageIo,
                    "Failed to read temp directory",
                    e,
                ));
            }
        };

        let mut removed = 0u64;
        while let Some(entry) = reader.next_entry().await.map_err(|e| {
            AppError::with_source(ErrorKind::StorageIo, "Failed to read temp entry", e)
        })? {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let stale = modified_at(&meta).is_some_and(|t| t < older_than);
            if meta.is_file() && stale && fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Removed stale temp files");
        }
        Ok(removed)
    }
}
