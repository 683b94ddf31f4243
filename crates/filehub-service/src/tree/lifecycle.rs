//! Soft delete, restore and permanent delete.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use tracing::{info, warn};

use filehub_core::error::{AppError, SubtreeProgress};
use filehub_core::result::AppResult;
use filehub_core::types::id::{NodeId, OwnerId};
use filehub_database::commit;
use filehub_entity::node::{FileNode, NodeState};
use filehub_storage::keys;

use super::service::FileTreeService;
use crate::guard::{load_node, load_owned};

/// Outcome of a permanent delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PurgeReport {
    /// Nodes moved to the Purged state.
    pub purged_nodes: u64,
    /// Bytes given back to the owner's quota.
    pub released_bytes: i64,
    /// Blobs deleted after commit.
    pub deleted_blobs: u64,
    /// Keys of blobs whose deletion failed. They are left for reconciliation.
    pub failed_blobs: Vec<String>,
}

impl PurgeReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: PurgeReport) {
        self.purged_nodes += other.purged_nodes;
        self.released_bytes += other.released_bytes;
        self.deleted_blobs += other.deleted_blobs;
        self.failed_blobs.extend(other.failed_blobs);
    }
}

/// A node of a subtree queued for purging.
#[derive(Debug, Clone, Copy)]
struct PurgeTarget {
    id: NodeId,
    parent: Option<NodeId>,
    is_root: bool,
}

/// Metadata outcome of purging one node, before its blobs are deleted.
struct PurgedNode {
    released_bytes: i64,
    blob_keys: Vec<String>,
}

impl FileTreeService {
    /// Move a node and its Active descendants to the recycle bin.
    ///
    /// Version blobs stay and keep counting toward the owner's quota. The
    /// live keys of recycled files are released after commit so the names
    /// can be reused, by either kind of node.
    pub async fn soft_delete(&self, owner: OwnerId, node_id: NodeId) -> AppResult<FileNode> {
        let mut tx = self.db.begin().await?;
        self.quota.lock_owner(&mut tx, owner).await?;
        let node = load_owned(&self.node_repo, &mut tx, owner, node_id).await?;
        let recycled = node.state.recycle()?;

        let now = Utc::now();
        self.node_repo
            .set_state(&mut tx, node.id, recycled, Some(now), Some(node.id), now)
            .await?;

        let mut count = 1u64;
        let mut released = Vec::new();
        let mut worklist = VecDeque::new();
        if node.is_directory() {
            worklist.push_back(node.id);
        } else {
            released.push(node.path.clone());
        }
        while let Some(dir_id) = worklist.pop_front() {
            let children = self
                .node_repo
                .children_in_state(&mut tx, dir_id, NodeState::Active)
                .await?;
            for child in children {
                let state = child.state.recycle()?;
                self.node_repo
                    .set_state(&mut tx, child.id, state, Some(now), Some(node.id), now)
                    .await?;
                count += 1;
                if child.is_directory() {
                    worklist.push_back(child.id);
                } else {
                    released.push(child.path);
                }
            }
        }
        commit(tx).await?;

        for path in &released {
            self.mirror.settle(owner, path).await;
        }

        info!(
            owner_id = %owner,
            node_id = %node.id,
            path = %node.path,
            nodes = count,
            "Moved to recycle bin"
        );
        self.reload(node.id).await
    }

    /// Bring a recycle batch back to its original place.
    ///
    /// The original parent must be Active and must not have gained an
    /// Active child of the same name; otherwise nothing changes. Live keys
    /// of the restored files are rebuilt after commit.
    pub async fn restore(&self, owner: OwnerId, node_id: NodeId) -> AppResult<FileNode> {
        let mut tx = self.db.begin().await?;
        self.quota.lock_owner(&mut tx, owner).await?;
        let node = load_owned(&self.node_repo, &mut tx, owner, node_id).await?;
        node.state.restore()?;
        if node.recycle_root != Some(node.id) {
            return Err(AppError::invalid_target(format!(
                "'{}' was deleted together with its parent folder; restore that instead",
                node.path
            )));
        }

        let parent = match node.parent_id {
            Some(parent_id) => {
                let parent = load_node(&self.node_repo, &mut tx, parent_id).await?;
                if !parent.is_active() {
                    return Err(AppError::invalid_target(format!(
                        "Original folder '{}' is no longer active",
                        parent.path
                    )));
                }
                Some(parent)
            }
            None => None,
        };
        self.ensure_name_free(&mut tx, owner, parent.as_ref(), &node.name, None)
            .await?;

        let batch = self.node_repo.recycle_batch(&mut tx, node.id).await?;
        let now = Utc::now();
        for member in &batch {
            let state = member.state.restore()?;
            self.node_repo
                .set_state(&mut tx, member.id, state, None, None, now)
                .await?;
        }
        commit(tx).await?;

        for member in batch.iter().filter(|m| m.is_file()) {
            self.mirror.publish(member.id).await;
        }

        info!(
            owner_id = %owner,
            node_id = %node.id,
            path = %node.path,
            nodes = batch.len(),
            "Restored from recycle bin"
        );
        self.reload(node.id).await
    }

    /// Permanently delete a node and its whole subtree.
    pub async fn permanent_delete(&self, owner: OwnerId, node_id: NodeId) -> AppResult<PurgeReport> {
        self.purge_subtree(owner, node_id, false).await
    }

    /// Purge a subtree, descendants first.
    ///
    /// Each node is purged in its own transaction: state, version rows,
    /// shares and quota first, blobs after commit. When a node fails its
    /// ancestors are left in place, so no live node ends up under a purged
    /// directory. With `only_recycled`, nodes that are no longer Recycled
    /// are not touched.
    pub(crate) async fn purge_subtree(
        &self,
        owner: OwnerId,
        node_id: NodeId,
        only_recycled: bool,
    ) -> AppResult<PurgeReport> {
        let targets = {
            let mut conn = self.db.acquire().await?;
            let root = load_owned(&self.node_repo, &mut conn, owner, node_id).await?;
            if only_recycled && root.state != NodeState::Recycled {
                return Err(AppError::invalid_target(format!(
                    "'{}' is not in the recycle bin",
                    root.path
                )));
            }

            let mut targets = vec![PurgeTarget {
                id: root.id,
                parent: root.parent_id,
                is_root: true,
            }];
            let mut worklist = VecDeque::new();
            if root.is_directory() {
                worklist.push_back(root.id);
            }
            while let Some(dir_id) = worklist.pop_front() {
                for child in self.node_repo.live_children(&mut conn, dir_id).await? {
                    targets.push(PurgeTarget {
                        id: child.id,
                        parent: Some(dir_id),
                        is_root: false,
                    });
                    if child.is_directory() {
                        worklist.push_back(child.id);
                    }
                }
            }
            targets
        };

        let mut report = PurgeReport::default();
        let mut progress = SubtreeProgress::default();
        let mut blocked: HashSet<NodeId> = HashSet::new();

        for target in targets.iter().rev() {
            if blocked.contains(&target.id) {
                progress.failed += 1;
                if let Some(parent) = target.parent {
                    blocked.insert(parent);
                }
                continue;
            }
            match self.purge_one(owner, *target, only_recycled).await {
                Ok(Some(purged)) => {
                    progress.succeeded += 1;
                    report.purged_nodes += 1;
                    report.released_bytes += purged.released_bytes;
                    let failures = self.storage.delete_many(&purged.blob_keys).await;
                    report.deleted_blobs += (purged.blob_keys.len() - failures.len()) as u64;
                    report
                        .failed_blobs
                        .extend(failures.into_iter().map(|(key, _)| key));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(node_id = %target.id, error = %e, "Failed to purge node");
                    progress.failed += 1;
                    if let Some(parent) = target.parent {
                        blocked.insert(parent);
                    }
                }
            }
        }

        info!(
            owner_id = %owner,
            node_id = %node_id,
            purged = report.purged_nodes,
            released_bytes = report.released_bytes,
            failed_blobs = report.failed_blobs.len(),
            "Permanently deleted"
        );
        if progress.failed > 0 {
            return Err(AppError::partial_failure(
                format!("{} nodes could not be purged", progress.failed),
                progress,
            ));
        }
        Ok(report)
    }

    /// Purge the metadata of one node. Returns `None` if it was already
    /// gone or left the subtree.
    async fn purge_one(
        &self,
        owner: OwnerId,
        target: PurgeTarget,
        only_recycled: bool,
    ) -> AppResult<Option<PurgedNode>> {
        let mut tx = self.db.begin().await?;
        self.quota.lock_owner(&mut tx, owner).await?;
        let Some(node) = self.node_repo.find_by_id(&mut tx, target.id).await? else {
            return Ok(None);
        };
        if node.state == NodeState::Purged || (!target.is_root && node.parent_id != target.parent) {
            return Ok(None);
        }
        if only_recycled && node.state != NodeState::Recycled {
            return Err(AppError::invalid_target(format!(
                "'{}' was restored while being purged",
                node.path
            )));
        }
        let purged = node.state.purge()?;

        if node.is_directory()
            && !self
                .node_repo
                .live_children(&mut tx, node.id)
                .await?
                .is_empty()
        {
            return Err(AppError::conflict(format!(
                "'{}' gained new children while being purged",
                node.path
            )));
        }

        let now = Utc::now();
        self.node_repo
            .set_state(
                &mut tx,
                node.id,
                purged,
                node.recycled_at.or(Some(now)),
                node.recycle_root,
                now,
            )
            .await?;
        let shares = self.share_repo.deactivate_for_node(&mut tx, node.id).await?;

        let mut blob_keys = Vec::new();
        let mut released_bytes = 0;
        if node.is_file() {
            let versions = self.version_repo.delete_for_file(&mut tx, node.id).await?;
            blob_keys.extend(versions.into_iter().map(|v| v.storage_key));
            self.quota.release(&mut tx, owner, node.size_bytes).await?;
            released_bytes = node.size_bytes;

            // Another Active node may have taken over the path.
            let claimants = self
                .node_repo
                .active_at_path(&mut tx, owner, &node.path)
                .await?;
            if claimants.is_empty() {
                blob_keys.push(keys::live_key(owner, &node.path));
            }
        }
        commit(tx).await?;

        if shares > 0 {
            info!(node_id = %node.id, shares, "Shares deactivated for purged node");
        }
        Ok(Some(PurgedNode {
            released_bytes,
            blob_keys,
        }))
    }
}
