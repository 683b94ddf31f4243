//! Renames and moves.
//!
//! The root node is relocated in one transaction. For directories the
//! descendants are then visited through a worklist, each child relocated
//! in its own transaction. A file's content is copied to its new live key
//! before the row moves; the old key is settled after commit. Running the
//! same relocation again repairs any descendant left behind by an earlier
//! failure.

use std::collections::VecDeque;

use chrono::Utc;
use tracing::{info, warn};

use filehub_core::error::{AppError, SubtreeProgress};
use filehub_core::result::AppResult;
use filehub_core::types::id::{NodeId, OwnerId};
use filehub_database::{SqliteConnection, commit};
use filehub_entity::node::{BlobState, FileNode, NodeState};

use super::path::{compute_path, validate_name};
use super::service::FileTreeService;
use crate::guard::{load_node, load_owned, require_active};

/// Where a relocated node ends up.
#[derive(Debug, Clone, Copy)]
enum Placement<'a> {
    /// Same parent, new name.
    Rename(&'a str),
    /// New parent, same name.
    Move(Option<NodeId>),
}

/// A validated relocation.
#[derive(Debug)]
struct RelocationPlan {
    /// The node as read when the plan was made.
    node: FileNode,
    parent: Option<FileNode>,
    name: String,
    new_path: String,
}

impl RelocationPlan {
    fn moves_blob(&self) -> bool {
        self.node.is_file() && self.new_path != self.node.path
    }
}

/// Outcome of relocating one descendant's row.
#[derive(Debug)]
enum ChildMove {
    /// Updated; holds the row as it was before.
    Moved(FileNode),
    /// Already at the expected path.
    InPlace,
    /// No longer part of the subtree.
    Left,
}

impl FileTreeService {
    /// Rename a node in place.
    pub async fn rename(
        &self,
        owner: OwnerId,
        node_id: NodeId,
        new_name: &str,
    ) -> AppResult<FileNode> {
        validate_name(new_name)?;
        self.relocate(owner, node_id, Placement::Rename(new_name))
            .await
    }

    /// Move a node under another directory (or to the root level).
    pub async fn move_node(
        &self,
        owner: OwnerId,
        node_id: NodeId,
        new_parent: Option<NodeId>,
    ) -> AppResult<FileNode> {
        self.relocate(owner, node_id, Placement::Move(new_parent))
            .await
    }

    async fn relocate(
        &self,
        owner: OwnerId,
        node_id: NodeId,
        placement: Placement<'_>,
    ) -> AppResult<FileNode> {
        let plan = {
            let mut conn = self.db.acquire().await?;
            self.plan_relocation(&mut conn, owner, node_id, placement)
                .await?
        };

        // File content is copied to the destination before the rename commits.
        let wrote = plan.moves_blob() && self.path_unclaimed(owner, &plan.new_path).await?;
        let blob_state = if wrote {
            Some(self.mirror.materialize(&plan.node, &plan.new_path).await?)
        } else {
            None
        };

        let result = async {
            let mut tx = self.db.begin().await?;
            self.quota.lock_owner(&mut tx, owner).await?;
            let current = self
                .plan_relocation(&mut tx, owner, node_id, placement)
                .await?;
            if let Some(blob_state) = blob_state {
                if current.new_path == plan.new_path && blob_state != current.node.blob_state {
                    self.node_repo
                        .set_blob_state(&mut tx, node_id, blob_state)
                        .await?;
                }
            }
            self.node_repo
                .update_location(
                    &mut tx,
                    node_id,
                    current.parent.as_ref().map(|p| p.id),
                    &current.name,
                    &current.new_path,
                    Utc::now(),
                )
                .await?;
            commit(tx).await?;
            Ok::<_, AppError>(current)
        }
        .await;
        let current = match result {
            Ok(current) => current,
            Err(e) => {
                if wrote {
                    self.mirror.settle(owner, &plan.new_path).await;
                }
                return Err(e);
            }
        };

        if current.moves_blob() {
            self.mirror.settle(owner, &current.node.path).await;
            if !wrote
                || current.new_path != plan.new_path
                || current.node.version != plan.node.version
            {
                self.mirror.publish(node_id).await;
            }
        }
        if wrote && current.new_path != plan.new_path {
            self.mirror.settle(owner, &plan.new_path).await;
        }
        let node = current.node;
        let new_path = current.new_path;
        info!(
            owner_id = %owner,
            node_id = %node.id,
            from = %node.path,
            to = %new_path,
            "Node relocated"
        );

        if node.is_directory() {
            let progress = self
                .relocate_descendants(owner, node.id, new_path)
                .await?;
            if progress.failed > 0 {
                warn!(
                    owner_id = %owner,
                    node_id = %node.id,
                    succeeded = progress.succeeded,
                    failed = progress.failed,
                    "Subtree relocation incomplete"
                );
                return Err(AppError::partial_failure(
                    format!("Relocation of '{}' left {} nodes behind", node.path, progress.failed),
                    progress,
                ));
            }
        }
        self.reload(node.id).await
    }

    /// Validate a relocation and work out where the node ends up.
    async fn plan_relocation(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        node_id: NodeId,
        placement: Placement<'_>,
    ) -> AppResult<RelocationPlan> {
        let node = load_owned(&self.node_repo, conn, owner, node_id).await?;
        require_active(&node)?;

        let (parent, name) = match placement {
            Placement::Rename(name) => {
                let parent = match node.parent_id {
                    Some(parent_id) => Some(load_node(&self.node_repo, conn, parent_id).await?),
                    None => None,
                };
                (parent, name.to_string())
            }
            Placement::Move(target) => {
                let parent = self.resolve_parent(conn, owner, target).await?;
                if let Some(dir) = &parent {
                    self.ensure_not_within(conn, dir.id, node.id).await?;
                }
                (parent, node.name.clone())
            }
        };
        self.ensure_name_free(conn, owner, parent.as_ref(), &name, Some(node.id))
            .await?;

        let new_path = compute_path(parent.as_ref().map(|p| p.path.as_str()), &name);
        Ok(RelocationPlan {
            node,
            parent,
            name,
            new_path,
        })
    }

    /// Whether no Active node claims `path`.
    async fn path_unclaimed(&self, owner: OwnerId, path: &str) -> AppResult<bool> {
        let mut conn = self.db.acquire().await?;
        Ok(self
            .node_repo
            .active_at_path(&mut conn, owner, path)
            .await?
            .is_empty())
    }

    /// Bring the paths (and live blobs) of every descendant of `root` in
    /// line with the root's path.
    async fn relocate_descendants(
        &self,
        owner: OwnerId,
        root: NodeId,
        root_path: String,
    ) -> AppResult<SubtreeProgress> {
        let mut progress = SubtreeProgress::default();
        let mut worklist = VecDeque::from([(root, root_path)]);

        while let Some((dir_id, dir_path)) = worklist.pop_front() {
            let children = {
                let mut conn = self.db.acquire().await?;
                self.node_repo.live_children(&mut conn, dir_id).await?
            };
            for child in children {
                let expected = compute_path(Some(&dir_path), &child.name);
                match self.relocate_child(owner, child.id, dir_id, &expected).await {
                    Ok(true) => {
                        progress.succeeded += 1;
                        if child.is_directory() {
                            worklist.push_back((child.id, expected));
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(
                            node_id = %child.id,
                            path = %child.path,
                            error = %e,
                            "Failed to relocate descendant"
                        );
                        progress.failed += 1;
                    }
                }
            }
        }
        Ok(progress)
    }

    /// Relocate one descendant. Returns `false` if it left the subtree
    /// before it was visited.
    async fn relocate_child(
        &self,
        owner: OwnerId,
        child_id: NodeId,
        parent_id: NodeId,
        expected_path: &str,
    ) -> AppResult<bool> {
        let child = {
            let mut conn = self.db.acquire().await?;
            self.node_repo.find_by_id(&mut conn, child_id).await?
        };
        let child = match child {
            Some(child) if child.state != NodeState::Purged && child.parent_id == Some(parent_id) => {
                child
            }
            _ => return Ok(false),
        };
        if child.path == expected_path {
            return Ok(true);
        }

        // Recycled files get their live blob back on restore.
        let wrote = child.is_file()
            && child.is_active()
            && self.path_unclaimed(owner, expected_path).await?;
        let blob_state = if wrote {
            Some(self.mirror.materialize(&child, expected_path).await?)
        } else {
            None
        };

        let result = self
            .move_child_row(owner, child_id, parent_id, expected_path, blob_state)
            .await;
        match &result {
            Ok(ChildMove::Moved(before)) if before.is_file() && before.is_active() => {
                self.mirror.settle(owner, &before.path).await;
                if !wrote || before.version != child.version {
                    self.mirror.publish(child_id).await;
                }
            }
            _ if wrote => self.mirror.settle(owner, expected_path).await,
            _ => {}
        }
        Ok(!matches!(result?, ChildMove::Left))
    }

    /// Point one descendant's row at `expected_path`.
    async fn move_child_row(
        &self,
        owner: OwnerId,
        child_id: NodeId,
        parent_id: NodeId,
        expected_path: &str,
        blob_state: Option<BlobState>,
    ) -> AppResult<ChildMove> {
        let mut tx = self.db.begin().await?;
        self.quota.lock_owner(&mut tx, owner).await?;
        let Some(child) = self.node_repo.find_by_id(&mut tx, child_id).await? else {
            return Ok(ChildMove::Left);
        };
        if child.state == NodeState::Purged || child.parent_id != Some(parent_id) {
            return Ok(ChildMove::Left);
        }
        if child.path == expected_path {
            return Ok(ChildMove::InPlace);
        }

        if blob_state == Some(BlobState::Missing) && child.blob_state != BlobState::Missing {
            self.node_repo
                .set_blob_state(&mut tx, child.id, BlobState::Missing)
                .await?;
        }
        self.node_repo
            .update_location(
                &mut tx,
                child.id,
                child.parent_id,
                &child.name,
                expected_path,
                Utc::now(),
            )
            .await?;
        commit(tx).await?;
        Ok(ChildMove::Moved(child))
    }
}
