//! File version model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use filehub_core::types::id::{NodeId, OwnerId, VersionId};

/// One immutable revision of a file's content.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FileVersion {
    /// Unique version identifier.
    pub id: VersionId,
    /// The file this version belongs to.
    pub file_id: NodeId,
    /// Sequential version number, starting at 1.
    pub version: i32,
    /// Size in bytes.
    pub size_bytes: i64,
    /// SHA-256 hex digest.
    pub content_hash: String,
    /// Key of this revision's blob. Independent of the file's path.
    pub storage_key: String,
    /// MIME type of this revision.
    pub mime_type: Option<String>,
    /// User who created this revision.
    pub created_by: OwnerId,
    /// When this revision was created.
    pub created_at: DateTime<Utc>,
}

/// Data required to append a version row.
#[derive(Debug, Clone)]
pub struct NewFileVersion {
    /// Identifier chosen before the blob was written; it names the blob key.
    pub id: VersionId,
    /// The file the version belongs to.
    pub file_id: NodeId,
    /// The version number to record.
    pub version: i32,
    /// Size in bytes.
    pub size_bytes: i64,
    /// SHA-256 hex digest.
    pub content_hash: String,
    /// Blob key.
    pub storage_key: String,
    /// MIME type.
    pub mime_type: Option<String>,
    /// Creator.
    pub created_by: OwnerId,
}
