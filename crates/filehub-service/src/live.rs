//! Live-key mirror.
//!
//! The live key `{owner}/{path}` of an Active file holds a copy of its
//! current version blob. Downloads read the version blob, so the mirror is
//! rebuilt after commit and never inside a transaction. Only the sole Active
//! claimant of a path may write its live key.

use std::sync::Arc;

use tracing::{debug, warn};

use filehub_core::error::{AppError, ErrorKind};
use filehub_core::result::AppResult;
use filehub_core::traits::storage::{ByteStream, StorageBackend};
use filehub_core::types::id::{NodeId, OwnerId};
use filehub_database::DatabasePool;
use filehub_database::repositories::{NodeRepository, VersionRepository};
use filehub_entity::node::{BlobState, FileNode};
use filehub_storage::StorageManager;
use filehub_storage::keys;

use crate::guard::blob_error;

/// Rebuilds after a concurrent change before giving up on a publish.
const PUBLISH_ATTEMPTS: usize = 3;

/// Keeps live keys in line with the committed tree.
#[derive(Debug, Clone)]
pub struct LiveMirror {
    /// Database pool.
    db: DatabasePool,
    /// Blob storage.
    storage: Arc<StorageManager>,
    /// Node repository.
    node_repo: Arc<NodeRepository>,
    /// Version repository.
    version_repo: Arc<VersionRepository>,
}

impl LiveMirror {
    /// Creates a new live mirror.
    pub fn new(
        db: DatabasePool,
        storage: Arc<StorageManager>,
        node_repo: Arc<NodeRepository>,
        version_repo: Arc<VersionRepository>,
    ) -> Self {
        Self {
            db,
            storage,
            node_repo,
            version_repo,
        }
    }

    /// Open the current content of a file.
    ///
    /// Reads the current version blob. The live key is only consulted when
    /// that blob is gone and `node` is the sole Active claimant of its path.
    pub(crate) async fn open(&self, node: &FileNode) -> AppResult<ByteStream> {
        if node.blob_state == BlobState::Missing {
            return Err(AppError::storage(format!(
                "Content of '{}' is missing from storage",
                node.path
            )));
        }
        let current = {
            let mut conn = self.db.acquire().await?;
            self.version_repo.find(&mut conn, node.id, node.version).await?
        };
        if let Some(version) = &current {
            match self.storage.get(&version.storage_key).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.kind == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        let live = keys::live_key(node.owner_id, &node.path);
        if !self.sole_claimant(node).await? {
            let key = current.map(|v| v.storage_key).unwrap_or(live);
            return Err(AppError::storage(format!("Blob '{key}' is missing from storage")));
        }
        self.storage.get(&live).await.map_err(blob_error(&live))
    }

    /// Copy `node`'s current content to the live key of `path`.
    ///
    /// Falls back to the node's own live key when the version blob is gone,
    /// as long as no other node claims that path. Returns
    /// `BlobState::Missing` when neither blob exists.
    pub(crate) async fn materialize(&self, node: &FileNode, path: &str) -> AppResult<BlobState> {
        let target = keys::live_key(node.owner_id, path);
        let current = {
            let mut conn = self.db.acquire().await?;
            self.version_repo.find(&mut conn, node.id, node.version).await?
        };
        if let Some(version) = current {
            match self.storage.copy(&version.storage_key, &target).await {
                Ok(()) => return Ok(BlobState::Ok),
                Err(e) if e.kind == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        let present = if node.is_active() && self.sole_claimant(node).await? {
            let live = keys::live_key(node.owner_id, &node.path);
            if live == target {
                self.storage.exists(&target).await?
            } else {
                match self.storage.copy(&live, &target).await {
                    Ok(()) => true,
                    Err(e) if e.kind == ErrorKind::NotFound => false,
                    Err(e) => return Err(e),
                }
            }
        } else {
            false
        };
        if present {
            Ok(BlobState::Ok)
        } else {
            warn!(node_id = %node.id, path = %node.path, "No blob left for file content");
            Ok(BlobState::Missing)
        }
    }

    /// Rebuild the live key of a file after a committed change.
    ///
    /// Does nothing unless the file is Active and alone at its path. A
    /// failed copy is logged and leaves the live key absent; reconciliation
    /// rebuilds it later.
    pub(crate) async fn publish(&self, id: NodeId) {
        if let Err(e) = self.try_publish(id).await {
            warn!(node_id = %id, error = %e, "Failed to publish live content");
        }
    }

    async fn try_publish(&self, id: NodeId) -> AppResult<()> {
        for _ in 0..PUBLISH_ATTEMPTS {
            let Some(node) = self.load(id).await? else {
                return Ok(());
            };
            if !node.is_file() || !node.is_active() || !self.sole_claimant(&node).await? {
                return Ok(());
            }

            let live = keys::live_key(node.owner_id, &node.path);
            let blob_state = match self.materialize(&node, &node.path).await {
                Ok(state) => state,
                Err(e) => {
                    self.remove(&live).await;
                    return Err(e);
                }
            };

            // The node may have moved or changed while the copy ran.
            let Some(after) = self.load(id).await? else {
                self.settle_path(node.owner_id, &node.path).await;
                return Ok(());
            };
            if after.path != node.path || !after.is_active() {
                self.settle_path(node.owner_id, &node.path).await;
                continue;
            }
            if after.version != node.version {
                continue;
            }
            if after.blob_state != blob_state {
                let mut conn = self.db.acquire().await?;
                self.node_repo
                    .set_blob_state(&mut conn, id, blob_state)
                    .await?;
            }
            debug!(node_id = %id, key = %live, "Live content published");
            return Ok(());
        }
        warn!(node_id = %id, "File kept changing while its live content was published");
        Ok(())
    }

    /// Bring the live key of `path` in line with whoever claims it now.
    ///
    /// Removes the key when no Active node claims the path and republishes
    /// it when exactly one file does.
    pub(crate) async fn settle(&self, owner: OwnerId, path: &str) {
        let claimants = match self.claimants(owner, path).await {
            Ok(claimants) => claimants,
            Err(e) => {
                warn!(owner_id = %owner, path, error = %e, "Failed to look up path claimants");
                return;
            }
        };
        match claimants.as_slice() {
            [] => self.remove_file_blob(&keys::live_key(owner, path)).await,
            [only] if only.is_file() => self.publish(only.id).await,
            [only] if only.is_directory() => {
                self.remove_file_blob(&keys::live_key(owner, path)).await
            }
            _ => {}
        }
    }

    /// `settle` without republishing, for use while a publish is running.
    async fn settle_path(&self, owner: OwnerId, path: &str) {
        match self.claimants(owner, path).await {
            Ok(claimants) if claimants.is_empty() => {
                self.remove_file_blob(&keys::live_key(owner, path)).await
            }
            Ok(_) => {}
            Err(e) => {
                warn!(owner_id = %owner, path, error = %e, "Failed to look up path claimants");
            }
        }
    }

    /// Whether `node` is the only Active node at its path.
    pub(crate) async fn sole_claimant(&self, node: &FileNode) -> AppResult<bool> {
        let claimants = self.claimants(node.owner_id, &node.path).await?;
        Ok(matches!(claimants.as_slice(), [only] if only.id == node.id))
    }

    async fn claimants(&self, owner: OwnerId, path: &str) -> AppResult<Vec<FileNode>> {
        let mut conn = self.db.acquire().await?;
        self.node_repo.active_at_path(&mut conn, owner, path).await
    }

    async fn load(&self, id: NodeId) -> AppResult<Option<FileNode>> {
        let mut conn = self.db.acquire().await?;
        self.node_repo.find_by_id(&mut conn, id).await
    }

    /// Delete a file blob at `key`, leaving directories of other keys alone.
    async fn remove_file_blob(&self, key: &str) {
        match self.storage.stat(key).await {
            Ok(meta) if meta.is_directory => {}
            Ok(_) => self.remove(key).await,
            Err(e) if e.kind == ErrorKind::NotFound => {}
            Err(e) => warn!(key, error = %e, "Failed to inspect live blob"),
        }
    }

    async fn remove(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            warn!(key, error = %e, "Failed to delete live blob");
        }
    }
}
