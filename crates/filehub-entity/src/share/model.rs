//! Share link model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use filehub_core::types::id::{NodeId, OwnerId, ShareId};

/// What a share token allows its holder to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ShareAccess {
    /// See metadata only.
    View,
    /// Download content.
    Download,
    /// Download and edit content.
    Edit,
}

impl ShareAccess {
    /// Whether this access level permits downloading content.
    pub fn allows_download(&self) -> bool {
        matches!(self, Self::Download | Self::Edit)
    }

    /// Return the access level as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Download => "download",
            Self::Edit => "edit",
        }
    }
}

impl fmt::Display for ShareAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A capability-token share of one node.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Share {
    /// Unique share identifier.
    pub id: ShareId,
    /// Unguessable URL-safe token.
    pub token: String,
    /// The shared node.
    pub node_id: NodeId,
    /// User who created the share.
    pub created_by: OwnerId,
    /// Argon2id hash of the share password.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    /// Access level granted.
    pub access: ShareAccess,
    /// When the share expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Maximum number of downloads.
    pub max_downloads: Option<i32>,
    /// Downloads recorded so far.
    pub download_count: i32,
    /// Whether the share can still be used.
    pub is_active: bool,
    /// When the share was created.
    pub created_at: DateTime<Utc>,
    /// Last successful access.
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl Share {
    /// Whether the share is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether the download limit has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.max_downloads
            .is_some_and(|max| self.download_count >= max)
    }

    /// Whether a password is required.
    pub fn requires_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Data required to insert a share.
#[derive(Debug, Clone)]
pub struct NewShare {
    /// Token.
    pub token: String,
    /// Shared node.
    pub node_id: NodeId,
    /// Creator.
    pub created_by: OwnerId,
    /// Password hash.
    pub password_hash: Option<String>,
    /// Access level.
    pub access: ShareAccess,
    /// Expiry time (None = never).
    pub expires_at: Option<DateTime<Utc>>,
    /// Max downloads (None = unlimited).
    pub max_downloads: Option<i32>,
}
