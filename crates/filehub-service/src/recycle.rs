//! Recycle bin: listing, restoring and purging soft-deleted nodes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use filehub_core::config::RecycleConfig;
use filehub_core::error::{AppError, SubtreeProgress};
use filehub_core::result::AppResult;
use filehub_core::types::id::{NodeId, OwnerId};
use filehub_core::types::pagination::{PageRequest, PageResponse};
use filehub_database::DatabasePool;
use filehub_database::repositories::NodeRepository;
use filehub_entity::node::FileNode;

use crate::tree::{FileTreeService, PurgeReport};

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SweepReport {
    /// Recycle batches fully purged.
    pub batches_purged: u64,
    /// Recycle batches that failed, fully or in part.
    pub batches_failed: u64,
    /// Combined purge totals.
    pub purge: PurgeReport,
}

/// Manages the recycle bin on top of the file tree.
#[derive(Debug, Clone)]
pub struct RecycleService {
    /// Database pool.
    db: DatabasePool,
    /// Node repository.
    node_repo: Arc<NodeRepository>,
    /// File tree service performing the state changes.
    tree: Arc<FileTreeService>,
    /// Retention settings.
    config: RecycleConfig,
}

impl RecycleService {
    /// Creates a new recycle service.
    pub fn new(
        db: DatabasePool,
        node_repo: Arc<NodeRepository>,
        tree: Arc<FileTreeService>,
        config: RecycleConfig,
    ) -> Self {
        Self {
            db,
            node_repo,
            tree,
            config,
        }
    }

    /// Move a node and its subtree to the recycle bin.
    pub async fn soft_delete(&self, owner: OwnerId, node_id: NodeId) -> AppResult<FileNode> {
        self.tree.soft_delete(owner, node_id).await
    }

    /// Restore a recycle batch.
    pub async fn restore(&self, owner: OwnerId, node_id: NodeId) -> AppResult<FileNode> {
        self.tree.restore(owner, node_id).await
    }

    /// Permanently delete a recycled node and its subtree.
    pub async fn purge(&self, owner: OwnerId, node_id: NodeId) -> AppResult<PurgeReport> {
        self.tree.purge_subtree(owner, node_id, true).await
    }

    /// One page of the owner's recycle batches, newest first.
    pub async fn list(
        &self,
        owner: OwnerId,
        page: PageRequest,
    ) -> AppResult<PageResponse<FileNode>> {
        let mut conn = self.db.acquire().await?;
        let (items, total) = self
            .node_repo
            .list_recycle_roots(&mut conn, owner, &page)
            .await?;
        Ok(PageResponse::new(items, &page, total))
    }

    /// Purge everything in the owner's recycle bin.
    pub async fn empty(&self, owner: OwnerId) -> AppResult<PurgeReport> {
        let roots = {
            let mut conn = self.db.acquire().await?;
            self.node_repo.all_recycle_roots(&mut conn, owner).await?
        };

        let mut report = PurgeReport::default();
        let mut progress = SubtreeProgress::default();
        for root in roots {
            match self.tree.purge_subtree(owner, root.id, true).await {
                Ok(purged) => {
                    progress.succeeded += 1;
                    report.merge(purged);
                }
                Err(e) => {
                    warn!(
                        owner_id = %owner,
                        node_id = %root.id,
                        error = %e,
                        "Failed to purge recycle batch"
                    );
                    progress.failed += 1;
                }
            }
        }

        info!(
            owner_id = %owner,
            batches = progress.succeeded,
            purged = report.purged_nodes,
            "Recycle bin emptied"
        );
        if progress.failed > 0 {
            return Err(AppError::partial_failure(
                format!("{} recycle batches could not be purged", progress.failed),
                progress,
            ));
        }
        Ok(report)
    }

    /// Purge every recycle batch (of any owner) recycled before `older_than`.
    pub async fn sweep(&self, older_than: DateTime<Utc>) -> AppResult<SweepReport> {
        let roots = {
            let mut conn = self.db.acquire().await?;
            self.node_repo.recycle_roots_before(&mut conn, older_than).await?
        };

        let mut report = SweepReport::default();
        for root in roots {
            match self.tree.purge_subtree(root.owner_id, root.id, true).await {
                Ok(purged) => {
                    report.batches_purged += 1;
                    report.purge.merge(purged);
                }
                Err(e) => {
                    warn!(
                        owner_id = %root.owner_id,
                        node_id = %root.id,
                        error = %e,
                        "Failed to purge expired recycle batch"
                    );
                    report.batches_failed += 1;
                }
            }
        }

        if report.batches_purged > 0 || report.batches_failed > 0 {
            info!(
                purged = report.batches_purged,
                failed = report.batches_failed,
                released_bytes = report.purge.released_bytes,
                "Recycle bin sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep batches older than the configured retention period.
    pub async fn sweep_expired(&self) -> AppResult<SweepReport> {
        if self.config.retention_days <= 0 {
            return Ok(SweepReport::default());
        }
        self.sweep(Utc::now() - Duration::days(self.config.retention_days))
            .await
    }
}
