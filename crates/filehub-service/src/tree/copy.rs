//! Copies of files and directory subtrees.

use std::collections::VecDeque;

use tracing::{info, warn};

use filehub_core::error::{AppError, SubtreeProgress};
use filehub_core::result::AppResult;
use filehub_core::types::id::{NodeId, OwnerId};
use filehub_database::{SqliteConnection, commit};
use filehub_entity::node::{FileNode, NodeKind, NodeState};

use super::path::validate_name;
use super::service::{FileTreeService, new_node};
use crate::guard::{load_owned, require_active};
use crate::version::StagedRevision;

impl FileTreeService {
    /// Copy a node (and for directories its Active descendants) under
    /// `new_parent`, optionally with a new name.
    ///
    /// Each copied file starts a fresh history at version 1 and is charged
    /// to the owner's quota. File content is copied server-side before the
    /// metadata transaction opens.
    pub async fn copy_node(
        &self,
        owner: OwnerId,
        node_id: NodeId,
        new_parent: Option<NodeId>,
        new_name: Option<String>,
    ) -> AppResult<FileNode> {
        if let Some(name) = &new_name {
            validate_name(name)?;
        }
        let new_name = new_name.as_deref();

        let (source, _, _) = {
            let mut conn = self.db.acquire().await?;
            self.plan_copy(&mut conn, owner, node_id, new_parent, new_name)
                .await?
        };
        let copy_id = NodeId::new();
        let staged = match source.kind {
            NodeKind::File => Some(self.stage_file_copy(owner, &source, copy_id).await?),
            NodeKind::Directory => None,
        };

        let result = async {
            let mut tx = self.db.begin().await?;
            self.quota.lock_owner(&mut tx, owner).await?;
            let (source, parent, name) = self
                .plan_copy(&mut tx, owner, node_id, new_parent, new_name)
                .await?;
            let copy = self
                .insert_copy(&mut tx, copy_id, owner, &source, parent.as_ref(), &name, staged.as_ref())
                .await?;
            commit(tx).await?;
            Ok::<_, AppError>(copy)
        }
        .await;
        let copy = match &staged {
            Some(staged) => self.versions.keep_or_discard(staged, result).await?,
            None => result?,
        };
        if copy.is_file() {
            self.mirror.publish(copy.id).await;
        }
        info!(
            owner_id = %owner,
            source_id = %source.id,
            node_id = %copy.id,
            path = %copy.path,
            "Node copied"
        );

        if copy.is_directory() {
            let progress = self.copy_descendants(owner, source.id, copy.clone()).await?;
            if progress.failed > 0 {
                warn!(
                    owner_id = %owner,
                    node_id = %copy.id,
                    succeeded = progress.succeeded,
                    failed = progress.failed,
                    "Subtree copy incomplete"
                );
                return Err(AppError::partial_failure(
                    format!("Copy of '{}' skipped {} nodes", source.path, progress.failed),
                    progress,
                ));
            }
        }
        self.reload(copy.id).await
    }

    /// Validate a copy: returns the source, the destination directory and
    /// the name of the copy.
    async fn plan_copy(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        node_id: NodeId,
        new_parent: Option<NodeId>,
        new_name: Option<&str>,
    ) -> AppResult<(FileNode, Option<FileNode>, String)> {
        let source = load_owned(&self.node_repo, conn, owner, node_id).await?;
        require_active(&source)?;
        let parent = self.resolve_parent(conn, owner, new_parent).await?;
        if let Some(dir) = &parent {
            self.ensure_not_within(conn, dir.id, source.id).await?;
        }
        let name = new_name.map_or_else(|| source.name.clone(), str::to_string);
        self.ensure_name_free(conn, owner, parent.as_ref(), &name, None)
            .await?;
        Ok((source, parent, name))
    }

    /// Copy the current content of `source` to a version key of `copy_id`.
    ///
    /// Checks the quota first so that an oversized copy moves no bytes.
    async fn stage_file_copy(
        &self,
        owner: OwnerId,
        source: &FileNode,
        copy_id: NodeId,
    ) -> AppResult<StagedRevision> {
        let current = {
            let mut conn = self.db.acquire().await?;
            self.quota
                .ensure_room(&mut conn, owner, source.size_bytes)
                .await?;
            self.version_repo
                .find(&mut conn, source.id, source.version)
                .await?
                .ok_or_else(|| {
                    AppError::internal(format!(
                        "Current version {} of '{}' has no record",
                        source.version, source.path
                    ))
                })?
        };
        self.versions
            .stage_copy(owner, copy_id, &current, owner)
            .await
    }

    /// Insert the row of a copy. Files take `staged` as version 1.
    #[allow(clippy::too_many_arguments)]
    async fn insert_copy(
        &self,
        conn: &mut SqliteConnection,
        copy_id: NodeId,
        owner: OwnerId,
        source: &FileNode,
        parent: Option<&FileNode>,
        name: &str,
        staged: Option<&StagedRevision>,
    ) -> AppResult<FileNode> {
        match staged {
            Some(staged) => {
                self.insert_file(conn, copy_id, owner, parent, name, staged)
                    .await
            }
            None => {
                let copy = new_node(copy_id, owner, parent, name, source.kind);
                self.node_repo.insert(conn, &copy).await?;
                Ok(copy)
            }
        }
    }

    async fn copy_descendants(
        &self,
        owner: OwnerId,
        source_root: NodeId,
        copy_root: FileNode,
    ) -> AppResult<SubtreeProgress> {
        let mut progress = SubtreeProgress::default();
        let mut worklist = VecDeque::from([(source_root, copy_root)]);

        while let Some((source_dir, copy_dir)) = worklist.pop_front() {
            let children = {
                let mut conn = self.db.acquire().await?;
                self.node_repo
                    .children_in_state(&mut conn, source_dir, NodeState::Active)
                    .await?
            };
            for child in children {
                match self.copy_child(owner, child.id, source_dir, &copy_dir).await {
                    Ok(Some(copy)) => {
                        progress.succeeded += 1;
                        if copy.is_directory() {
                            worklist.push_back((child.id, copy));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            node_id = %child.id,
                            path = %child.path,
                            error = %e,
                            "Failed to copy descendant"
                        );
                        progress.failed += 1;
                    }
                }
            }
        }
        Ok(progress)
    }

    /// Copy one descendant under `copy_dir`. Returns `None` if the source
    /// left the subtree before it was visited.
    async fn copy_child(
        &self,
        owner: OwnerId,
        child_id: NodeId,
        source_dir: NodeId,
        copy_dir: &FileNode,
    ) -> AppResult<Option<FileNode>> {
        let child = {
            let mut conn = self.db.acquire().await?;
            self.node_repo.find_by_id(&mut conn, child_id).await?
        };
        let child = match child {
            Some(child) if child.is_active() && child.parent_id == Some(source_dir) => child,
            _ => return Ok(None),
        };
        let copy_id = NodeId::new();
        let staged = match child.kind {
            NodeKind::File => Some(self.stage_file_copy(owner, &child, copy_id).await?),
            NodeKind::Directory => None,
        };

        let result = async {
            let mut tx = self.db.begin().await?;
            self.quota.lock_owner(&mut tx, owner).await?;
            let Some(child) = self.node_repo.find_by_id(&mut tx, child_id).await? else {
                return Ok(None);
            };
            if !child.is_active() || child.parent_id != Some(source_dir) {
                return Ok(None);
            }
            let destination = self.resolve_parent(&mut tx, owner, Some(copy_dir.id)).await?;
            self.ensure_name_free(&mut tx, owner, destination.as_ref(), &child.name, None)
                .await?;
            let copy = self
                .insert_copy(
                    &mut tx,
                    copy_id,
                    owner,
                    &child,
                    destination.as_ref(),
                    &child.name,
                    staged.as_ref(),
                )
                .await?;
            commit(tx).await?;
            Ok::<_, AppError>(Some(copy))
        }
        .await;

        let Some(staged) = &staged else {
            return result;
        };
        let copy = self.versions.keep_or_discard(staged, result).await?;
        match &copy {
            Some(copy) => self.mirror.publish(copy.id).await,
            None => self.versions.discard(staged).await,
        }
        Ok(copy)
    }
}
