//! File tree node model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use filehub_core::types::id::{NodeId, OwnerId};

use super::state::NodeState;

/// Whether a node holds content or other nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A regular file backed by a blob.
    File,
    /// A directory. Directories have no blob and size 0.
    Directory,
}

impl NodeKind {
    /// Return the kind as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who may read a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Only the owner.
    #[default]
    Private,
    /// Anyone who knows the node id.
    Public,
}

/// Result of the last reconciliation check on a file's live blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BlobState {
    /// The blob was present (or has not been checked).
    #[default]
    Ok,
    /// The blob was missing when last checked.
    Missing,
}

/// A file or directory in an owner's tree.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FileNode {
    /// Unique node identifier.
    pub id: NodeId,
    /// The owning user.
    pub owner_id: OwnerId,
    /// Containing directory. `None` for root-level nodes.
    pub parent_id: Option<NodeId>,
    /// Name within the parent.
    pub name: String,
    /// Materialized `/`-joined path from the owner's root.
    pub path: String,
    /// File or directory.
    pub kind: NodeKind,
    /// Current content size in bytes. Always 0 for directories.
    pub size_bytes: i64,
    /// MIME type of the current content.
    pub mime_type: Option<String>,
    /// SHA-256 hex digest of the current content.
    pub content_hash: Option<String>,
    /// Read visibility.
    pub visibility: Visibility,
    /// Current version number (starts at 1).
    pub version: i32,
    /// Lifecycle state.
    pub state: NodeState,
    /// When the node left the Active state.
    pub recycled_at: Option<DateTime<Utc>>,
    /// Root of the soft delete that recycled this node.
    pub recycle_root: Option<NodeId>,
    /// Reconciliation status of the live blob.
    pub blob_state: BlobState,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// When the node was last updated.
    pub updated_at: DateTime<Utc>,
}

impl FileNode {
    /// Check if this node is a file.
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// Check if this node is a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Check if this node is Active.
    pub fn is_active(&self) -> bool {
        self.state == NodeState::Active
    }

    /// Whether `requester` may read this node.
    pub fn is_readable_by(&self, requester: OwnerId) -> bool {
        self.owner_id == requester || self.visibility == Visibility::Public
    }

    /// Get the file extension (lowercase), if any.
    pub fn extension(&self) -> Option<String> {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
            .map(str::to_lowercase)
    }
}
