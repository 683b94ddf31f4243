//! Share link lifecycle: creation, access checks and counted downloads.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use filehub_core::config::ShareConfig;
use filehub_core::error::AppError;
use filehub_core::result::AppResult;
use filehub_core::traits::storage::ByteStream;
use filehub_core::types::id::{NodeId, OwnerId, ShareId};
use filehub_database::repositories::{NodeRepository, ShareRepository};
use filehub_database::{DatabasePool, commit};
use filehub_entity::node::FileNode;
use filehub_entity::share::{NewShare, Share, ShareAccess};

use super::password::PasswordHasher;
use super::token::LinkService;
use crate::guard::{load_owned, require_active, require_file};
use crate::quota::QuotaService;
use crate::tree::FileTreeService;

/// Request to create a new share.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CreateShareRequest {
    /// Node being shared.
    pub node_id: NodeId,
    /// What the link allows.
    pub access: ShareAccess,
    /// Password protection (optional).
    pub password: Option<String>,
    /// Expiration time (optional).
    pub expires_at: Option<DateTime<Utc>>,
    /// Maximum downloads (None = unlimited).
    pub max_downloads: Option<i32>,
}

/// Manages share creation, validation, downloads and revocation.
#[derive(Debug, Clone)]
pub struct ShareService {
    /// Database pool.
    db: DatabasePool,
    /// Node repository.
    node_repo: Arc<NodeRepository>,
    /// Share repository.
    share_repo: Arc<ShareRepository>,
    /// Quota service, for the owner lock.
    quota: Arc<QuotaService>,
    /// File tree, for opening shared content.
    tree: Arc<FileTreeService>,
    /// Link service for token generation.
    link_service: Arc<LinkService>,
    /// Password hasher for password-protected shares.
    hasher: Arc<PasswordHasher>,
    /// Share limits.
    config: ShareConfig,
}

impl ShareService {
    /// Creates a new share service.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DatabasePool,
        node_repo: Arc<NodeRepository>,
        share_repo: Arc<ShareRepository>,
        quota: Arc<QuotaService>,
        tree: Arc<FileTreeService>,
        link_service: Arc<LinkService>,
        hasher: Arc<PasswordHasher>,
        config: ShareConfig,
    ) -> Self {
        Self {
            db,
            node_repo,
            share_repo,
            quota,
            tree,
            link_service,
            hasher,
            config,
        }
    }

    /// Creates a share link for one of the owner's Active nodes.
    pub async fn create_share(&self, owner: OwnerId, req: CreateShareRequest) -> AppResult<Share> {
        let now = Utc::now();
        if let Some(max) = req.max_downloads
            && max <= 0
        {
            return Err(AppError::validation("max_downloads must be positive"));
        }
        if let Some(expires_at) = req.expires_at {
            if expires_at <= now {
                return Err(AppError::validation("Expiry must be in the future"));
            }
            if self.config.max_expiry_days > 0
                && expires_at > now + Duration::days(self.config.max_expiry_days)
            {
                return Err(AppError::validation(format!(
                    "Expiry must be within {} days",
                    self.config.max_expiry_days
                )));
            }
        }
        let password_hash = match req.password.as_deref() {
            Some(password) if password.chars().count() < self.config.min_password_length => {
                return Err(AppError::validation(format!(
                    "Share password must be at least {} characters",
                    self.config.min_password_length
                )));
            }
            Some(password) => Some(self.hasher.hash_password(password)?),
            None => None,
        };

        let mut tx = self.db.begin().await?;
        self.quota.lock_owner(&mut tx, owner).await?;
        let node = load_owned(&self.node_repo, &mut tx, owner, req.node_id).await?;
        require_active(&node)?;

        let share = self
            .share_repo
            .insert(
                &mut tx,
                &NewShare {
                    token: self.link_service.generate_token(),
                    node_id: node.id,
                    created_by: owner,
                    password_hash,
                    access: req.access,
                    expires_at: req.expires_at,
                    max_downloads: req.max_downloads,
                },
                now,
            )
            .await?;
        commit(tx).await?;

        info!(
            owner_id = %owner,
            share_id = %share.id,
            node_id = %node.id,
            access = %share.access.as_str(),
            "Share created"
        );
        Ok(share)
    }

    /// Validates a share token (and password) and records the access.
    pub async fn access_share(&self, token: &str, password: Option<&str>) -> AppResult<Share> {
        let (share, _) = self.validate(token, password).await?;
        Ok(share)
    }

    /// Counts one download against the share's limit.
    pub async fn record_download(&self, token: &str) -> AppResult<Share> {
        let mut conn = self.db.acquire().await?;
        self.share_repo
            .record_download(&mut conn, token, Utc::now())
            .await?
            .ok_or_else(|| AppError::share_invalid("Share link is no longer valid"))
    }

    /// Opens the shared file and counts the download.
    pub async fn download_shared_file(
        &self,
        token: &str,
        password: Option<&str>,
    ) -> AppResult<(ByteStream, FileNode)> {
        let (share, node) = self.validate(token, password).await?;
        if !share.access.allows_download() {
            return Err(AppError::permission_denied(
                "This share link does not allow downloads",
            ));
        }
        require_file(&node)?;

        let stream = self.tree.open_content(&node).await?;
        let share = match self.record_download(token).await {
            Ok(share) => share,
            Err(e) => {
                drop(stream);
                return Err(e);
            }
        };

        info!(
            share_id = %share.id,
            node_id = %node.id,
            download_count = share.download_count,
            "Shared file downloaded"
        );
        Ok((stream, node))
    }

    /// Lists the owner's shares, newest first.
    pub async fn list_shares(&self, owner: OwnerId) -> AppResult<Vec<Share>> {
        let mut conn = self.db.acquire().await?;
        self.share_repo.list_by_creator(&mut conn, owner).await
    }

    /// Deactivates one of the owner's shares.
    pub async fn revoke_share(&self, owner: OwnerId, share_id: ShareId) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        self.quota.lock_owner(&mut tx, owner).await?;
        let share = self
            .share_repo
            .find_by_id(&mut tx, share_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Share {share_id} not found")))?;
        if share.created_by != owner {
            return Err(AppError::permission_denied(
                "Cannot revoke another owner's share",
            ));
        }
        let changed = self.share_repo.deactivate(&mut tx, share_id).await?;
        commit(tx).await?;

        if changed {
            info!(owner_id = %owner, share_id = %share_id, "Share revoked");
        }
        Ok(())
    }

    /// Check a token in the documented order and record the access.
    async fn validate(&self, token: &str, password: Option<&str>) -> AppResult<(Share, FileNode)> {
        let now = Utc::now();
        let (mut share, node) = {
            let mut conn = self.db.acquire().await?;
            let share = self
                .share_repo
                .find_by_token(&mut conn, token)
                .await?
                .filter(|s| s.is_active)
                .ok_or_else(|| AppError::share_invalid("Share link is not valid"))?;
            let node = self
                .node_repo
                .find_by_id(&mut conn, share.node_id)
                .await?
                .filter(FileNode::is_active)
                .ok_or_else(|| AppError::share_invalid("Shared item is no longer available"))?;
            (share, node)
        };

        if share.is_expired_at(now) {
            return Err(AppError::share_expired("Share link has expired"));
        }
        if share.is_exhausted() {
            return Err(AppError::share_invalid(
                "Share link has reached its download limit",
            ));
        }
        if let Some(hash) = share.password_hash.as_deref() {
            let Some(password) = password else {
                return Err(AppError::password_required("This share link needs a password"));
            };
            if !self.hasher.verify_password(password, hash)? {
                return Err(AppError::password_incorrect("Wrong share password"));
            }
        }

        {
            let mut conn = self.db.acquire().await?;
            self.share_repo.touch(&mut conn, share.id, now).await?;
        }
        share.last_accessed_at = Some(now);
        debug!(share_id = %share.id, node_id = %node.id, "Share accessed");
        Ok((share, node))
    }
}
