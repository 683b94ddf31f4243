//! Node repository implementation.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use filehub_core::result::AppResult;
use filehub_core::types::id::{NodeId, OwnerId};
use filehub_core::types::pagination::PageRequest;
use filehub_entity::node::{BlobState, FileNode, NodeState, Visibility};

use super::map_db_error;

/// Repository for file tree nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeRepository;

impl NodeRepository {
    /// Create a new node repository.
    pub fn new() -> Self {
        Self
    }

    /// Find a node by ID in any state.
    pub async fn find_by_id(
        &self,
        conn: &mut SqliteConnection,
        id: NodeId,
    ) -> AppResult<Option<FileNode>> {
        sqlx::query_as::<_, FileNode>("SELECT * FROM nodes WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_db_error("Failed to find node"))
    }

    /// Find the Active child of `parent` (or root-level node) named `name`.
    pub async fn find_active_child(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        parent: Option<NodeId>,
        name: &str,
    ) -> AppResult<Option<FileNode>> {
        sqlx::query_as::<_, FileNode>(
            "SELECT * FROM nodes \
             WHERE owner_id = ?1 AND parent_id IS ?2 AND name = ?3 AND state = 'active'",
        )
        .bind(owner)
        .bind(parent)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error("Failed to find node by name"))
    }

    /// Find an Active node by its materialized path.
    pub async fn find_active_by_path(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        path: &str,
    ) -> AppResult<Option<FileNode>> {
        sqlx::query_as::<_, FileNode>(
            "SELECT * FROM nodes WHERE owner_id = ?1 AND path = ?2 AND state = 'active'",
        )
        .bind(owner)
        .bind(path)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error("Failed to find node by path"))
    }

    /// Every Active node claiming `path`. More than one only after an
    /// interrupted subtree move left a stale descendant behind.
    pub async fn active_at_path(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        path: &str,
    ) -> AppResult<Vec<FileNode>> {
        sqlx::query_as::<_, FileNode>(
            "SELECT * FROM nodes WHERE owner_id = ?1 AND path = ?2 AND state = 'active' \
             ORDER BY created_at",
        )
        .bind(owner)
        .bind(path)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to list nodes by path"))
    }

    /// List one page of Active children, directories first, then by name.
    pub async fn list_active_children(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        parent: Option<NodeId>,
        page: &PageRequest,
    ) -> AppResult<(Vec<FileNode>, u64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM nodes \
             WHERE owner_id = ?1 AND parent_id IS ?2 AND state = 'active'",
        )
        .bind(owner)
        .bind(parent)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_db_error("Failed to count children"))?;

        let nodes = sqlx::query_as::<_, FileNode>(
            "SELECT * FROM nodes \
             WHERE owner_id = ?1 AND parent_id IS ?2 AND state = 'active' \
             ORDER BY kind = 'file', name ASC LIMIT ?3 OFFSET ?4",
        )
        .bind(owner)
        .bind(parent)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to list children"))?;

        Ok((nodes, total as u64))
    }

    /// List the direct children of `parent` in the given state.
    pub async fn children_in_state(
        &self,
        conn: &mut SqliteConnection,
        parent: NodeId,
        state: NodeState,
    ) -> AppResult<Vec<FileNode>> {
        sqlx::query_as::<_, FileNode>(
            "SELECT * FROM nodes WHERE parent_id = ?1 AND state = ?2 ORDER BY name ASC",
        )
        .bind(parent)
        .bind(state)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to list children"))
    }

    /// List the direct children of `parent` that are not Purged.
    pub async fn live_children(
        &self,
        conn: &mut SqliteConnection,
        parent: NodeId,
    ) -> AppResult<Vec<FileNode>> {
        sqlx::query_as::<_, FileNode>(
            "SELECT * FROM nodes WHERE parent_id = ?1 AND state != 'purged' ORDER BY name ASC",
        )
        .bind(parent)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to list children"))
    }

    /// IDs of `id` and all of its ancestors, nearest first.
    pub async fn ancestor_chain(
        &self,
        conn: &mut SqliteConnection,
        id: NodeId,
    ) -> AppResult<Vec<NodeId>> {
        sqlx::query_scalar::<_, NodeId>(
            "WITH RECURSIVE chain (id, parent_id, depth) AS ( \
                 SELECT id, parent_id, 0 FROM nodes WHERE id = ?1 \
                 UNION ALL \
                 SELECT n.id, n.parent_id, c.depth + 1 FROM nodes n \
                 JOIN chain c ON n.id = c.parent_id \
             ) SELECT id FROM chain ORDER BY depth",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to walk ancestors"))
    }

    /// Insert a new node.
    pub async fn insert(&self, conn: &mut SqliteConnection, node: &FileNode) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO nodes (id, owner_id, parent_id, name, path, kind, size_bytes, \
             mime_type, content_hash, visibility, version, state, recycled_at, recycle_root, \
             blob_state, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )
        .bind(node.id)
        .bind(node.owner_id)
        .bind(node.parent_id)
        .bind(&node.name)
        .bind(&node.path)
        .bind(node.kind)
        .bind(node.size_bytes)
        .bind(&node.mime_type)
        .bind(&node.content_hash)
        .bind(node.visibility)
        .bind(node.version)
        .bind(node.state)
        .bind(node.recycled_at)
        .bind(node.recycle_root)
        .bind(node.blob_state)
        .bind(node.created_at)
        .bind(node.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(map_db_error("Failed to insert node"))?;
        Ok(())
    }

    /// Change a node's parent, name and path.
    pub async fn update_location(
        &self,
        conn: &mut SqliteConnection,
        id: NodeId,
        parent: Option<NodeId>,
        name: &str,
        path: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE nodes SET parent_id = ?2, name = ?3, path = ?4, updated_at = ?5 WHERE id = ?1",
        )
        .bind(id)
        .bind(parent)
        .bind(name)
        .bind(path)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(map_db_error("Failed to move node"))?;
        Ok(())
    }

    /// Record new current content for a file.
    pub async fn update_content(
        &self,
        conn: &mut SqliteConnection,
        id: NodeId,
        size_bytes: i64,
        mime_type: Option<&str>,
        content_hash: &str,
        version: i32,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE nodes SET size_bytes = ?2, mime_type = ?3, content_hash = ?4, version = ?5, \
             blob_state = 'ok', updated_at = ?6 WHERE id = ?1",
        )
        .bind(id)
        .bind(size_bytes)
        .bind(mime_type)
        .bind(content_hash)
        .bind(version)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(map_db_error("Failed to update node content"))?;
        Ok(())
    }

    /// Set the lifecycle state together with its recycle bookkeeping.
    pub async fn set_state(
        &self,
        conn: &mut SqliteConnection,
        id: NodeId,
        state: NodeState,
        recycled_at: Option<DateTime<Utc>>,
        recycle_root: Option<NodeId>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE nodes SET state = ?2, recycled_at = ?3, recycle_root = ?4, updated_at = ?5 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(state)
        .bind(recycled_at)
        .bind(recycle_root)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(map_db_error("Failed to update node state"))?;
        Ok(())
    }

    /// Change a node's visibility.
    pub async fn set_visibility(
        &self,
        conn: &mut SqliteConnection,
        id: NodeId,
        visibility: Visibility,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE nodes SET visibility = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(visibility)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(map_db_error("Failed to update visibility"))?;
        Ok(())
    }

    /// Record the outcome of a blob presence check.
    pub async fn set_blob_state(
        &self,
        conn: &mut SqliteConnection,
        id: NodeId,
        blob_state: BlobState,
    ) -> AppResult<()> {
        sqlx::query("UPDATE nodes SET blob_state = ?2 WHERE id = ?1")
            .bind(id)
            .bind(blob_state)
            .execute(&mut *conn)
            .await
            .map_err(map_db_error("Failed to update blob state"))?;
        Ok(())
    }

    /// Sum of current sizes of all non-Purged files of an owner.
    pub async fn live_bytes(&self, conn: &mut SqliteConnection, owner: OwnerId) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM nodes \
             WHERE owner_id = ?1 AND kind = 'file' AND state != 'purged'",
        )
        .bind(owner)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_db_error("Failed to sum live sizes"))
    }

    /// List one page of recycle-batch roots of an owner, newest first.
    pub async fn list_recycle_roots(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        page: &PageRequest,
    ) -> AppResult<(Vec<FileNode>, u64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM nodes \
             WHERE owner_id = ?1 AND state = 'recycled' AND recycle_root = id",
        )
        .bind(owner)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_db_error("Failed to count recycled nodes"))?;

        let nodes = sqlx::query_as::<_, FileNode>(
            "SELECT * FROM nodes \
             WHERE owner_id = ?1 AND state = 'recycled' AND recycle_root = id \
             ORDER BY recycled_at DESC LIMIT ?2 OFFSET ?3",
        )
        .bind(owner)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to list recycled nodes"))?;

        Ok((nodes, total as u64))
    }

    /// All recycle-batch roots of an owner.
    pub async fn all_recycle_roots(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
    ) -> AppResult<Vec<FileNode>> {
        sqlx::query_as::<_, FileNode>(
            "SELECT * FROM nodes \
             WHERE owner_id = ?1 AND state = 'recycled' AND recycle_root = id \
             ORDER BY recycled_at ASC",
        )
        .bind(owner)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to list recycled nodes"))
    }

    /// Recycle-batch roots (of any owner) recycled before `before`.
    pub async fn recycle_roots_before(
        &self,
        conn: &mut SqliteConnection,
        before: DateTime<Utc>,
    ) -> AppResult<Vec<FileNode>> {
        sqlx::query_as::<_, FileNode>(
            "SELECT * FROM nodes \
             WHERE state = 'recycled' AND recycle_root = id AND recycled_at < ?1 \
             ORDER BY recycled_at ASC",
        )
        .bind(before)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to find expired recycled nodes"))
    }

    /// Every node still Recycled as part of the batch rooted at `root`.
    pub async fn recycle_batch(
        &self,
        conn: &mut SqliteConnection,
        root: NodeId,
    ) -> AppResult<Vec<FileNode>> {
        sqlx::query_as::<_, FileNode>(
            "SELECT * FROM nodes WHERE recycle_root = ?1 AND state = 'recycled' ORDER BY path ASC",
        )
        .bind(root)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to load recycle batch"))
    }

    /// Every non-Purged file node, for reconciliation.
    pub async fn live_files(&self, conn: &mut SqliteConnection) -> AppResult<Vec<FileNode>> {
        sqlx::query_as::<_, FileNode>(
            "SELECT * FROM nodes WHERE kind = 'file' AND state != 'purged' ORDER BY owner_id, path",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to list live files"))
    }
}
