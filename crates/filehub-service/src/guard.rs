//! Shared node lookups and permission checks.

use filehub_core::error::{AppError, ErrorKind};
use filehub_core::result::AppResult;
use filehub_core::types::id::{NodeId, OwnerId};
use filehub_database::SqliteConnection;
use filehub_database::repositories::NodeRepository;
use filehub_entity::node::{FileNode, NodeState};

/// Load a node that has not been purged.
pub(crate) async fn load_node(
    repo: &NodeRepository,
    conn: &mut SqliteConnection,
    id: NodeId,
) -> AppResult<FileNode> {
    repo.find_by_id(conn, id)
        .await?
        .filter(|n| n.state != NodeState::Purged)
        .ok_or_else(|| AppError::not_found(format!("Node {id} not found")))
}

/// Load a node for mutation by `owner`.
pub(crate) async fn load_owned(
    repo: &NodeRepository,
    conn: &mut SqliteConnection,
    owner: OwnerId,
    id: NodeId,
) -> AppResult<FileNode> {
    let node = load_node(repo, conn, id).await?;
    if node.owner_id != owner {
        return Err(AppError::permission_denied(format!(
            "Node {id} belongs to another owner"
        )));
    }
    Ok(node)
}

/// Load a node for reading by `requester`.
///
/// Recycled nodes are only visible to their owner.
pub(crate) async fn load_readable(
    repo: &NodeRepository,
    conn: &mut SqliteConnection,
    requester: OwnerId,
    id: NodeId,
) -> AppResult<FileNode> {
    let node = load_node(repo, conn, id).await?;
    if node.owner_id == requester {
        return Ok(node);
    }
    if !node.is_active() {
        return Err(AppError::not_found(format!("Node {id} not found")));
    }
    if !node.is_readable_by(requester) {
        return Err(AppError::permission_denied(format!(
            "Node {id} is private"
        )));
    }
    Ok(node)
}

/// Fail unless the node is Active.
pub(crate) fn require_active(node: &FileNode) -> AppResult<()> {
    if node.is_active() {
        Ok(())
    } else {
        Err(AppError::invalid_target(format!(
            "'{}' is in the recycle bin",
            node.path
        )))
    }
}

/// Fail unless the node is a file.
pub(crate) fn require_file(node: &FileNode) -> AppResult<()> {
    if node.is_file() {
        Ok(())
    } else {
        Err(AppError::invalid_target(format!(
            "'{}' is a directory",
            node.path
        )))
    }
}

/// A missing blob behind a metadata row is a storage fault, not a lookup miss.
pub(crate) fn blob_error(key: &str) -> impl FnOnce(AppError) -> AppError + '_ {
    move |e| {
        if e.kind == ErrorKind::NotFound {
            AppError::storage(format!("Blob '{key}' is missing from storage"))
        } else {
            e
        }
    }
}
