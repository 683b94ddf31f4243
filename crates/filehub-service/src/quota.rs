//! Per-owner quota accounting.
//!
//! Usage changes are applied on the caller's connection, inside the same
//! transaction as the metadata change that caused them.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use filehub_core::config::QuotaConfig;
use filehub_core::error::AppError;
use filehub_core::result::AppResult;
use filehub_core::types::id::OwnerId;
use filehub_database::repositories::{NodeRepository, QuotaRepository};
use filehub_database::{DatabasePool, SqliteConnection, commit};
use filehub_entity::quota::Quota;

/// Tracks used and allotted bytes per owner.
#[derive(Debug, Clone)]
pub struct QuotaService {
    /// Database pool, for standalone administrative operations.
    db: DatabasePool,
    /// Quota repository.
    quota_repo: Arc<QuotaRepository>,
    /// Node repository, for recomputing usage.
    node_repo: Arc<NodeRepository>,
    /// Allotment given to owners on first use.
    default_allotment: i64,
}

impl QuotaService {
    /// Creates a new quota service.
    pub fn new(
        db: DatabasePool,
        quota_repo: Arc<QuotaRepository>,
        node_repo: Arc<NodeRepository>,
        config: &QuotaConfig,
    ) -> Self {
        Self {
            db,
            quota_repo,
            node_repo,
            default_allotment: config.default_allotment_bytes.max(0),
        }
    }

    /// Provision the owner's quota row and take the write lock on it.
    ///
    /// Must be the first statement of every mutating transaction.
    pub async fn lock_owner(&self, conn: &mut SqliteConnection, owner: OwnerId) -> AppResult<()> {
        self.quota_repo
            .lock_owner(conn, owner, self.default_allotment, Utc::now())
            .await
    }

    /// Reserve `delta` bytes, failing with `QuotaExceeded` if they do not fit.
    pub async fn check_and_reserve(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        delta: i64,
    ) -> AppResult<()> {
        if delta <= 0 {
            return Ok(());
        }
        if self.quota_repo.reserve(conn, owner, delta, Utc::now()).await? {
            return Ok(());
        }
        let available = self
            .quota_repo
            .find(conn, owner)
            .await?
            .map(|q| q.available_bytes())
            .unwrap_or(0);
        Err(AppError::quota_exceeded(format!(
            "Quota exceeded: {delta} bytes requested, {available} bytes available"
        )))
    }

    /// Fail with `QuotaExceeded` if `delta` bytes cannot fit right now.
    ///
    /// Read-only: used to refuse oversized writes before any blob is
    /// streamed. The binding reservation is still `check_and_reserve`.
    pub async fn ensure_room(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        delta: i64,
    ) -> AppResult<()> {
        if delta <= 0 {
            return Ok(());
        }
        let available = self
            .quota_repo
            .find(conn, owner)
            .await?
            .map(|q| q.available_bytes())
            .unwrap_or(self.default_allotment);
        if delta > available {
            return Err(AppError::quota_exceeded(format!(
                "Quota exceeded: {delta} bytes requested, {available} bytes available"
            )));
        }
        Ok(())
    }

    /// Give back `delta` bytes.
    pub async fn release(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        delta: i64,
    ) -> AppResult<()> {
        if delta <= 0 {
            return Ok(());
        }
        self.quota_repo.release(conn, owner, delta, Utc::now()).await
    }

    /// Apply a signed size change.
    pub async fn apply_delta(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        delta: i64,
    ) -> AppResult<()> {
        if delta > 0 {
            self.check_and_reserve(conn, owner, delta).await
        } else {
            self.release(conn, owner, -delta).await
        }
    }

    /// Current counters of an owner, provisioning the row if needed.
    pub async fn usage(&self, owner: OwnerId) -> AppResult<Quota> {
        let mut tx = self.db.begin().await?;
        self.lock_owner(&mut tx, owner).await?;
        let quota = self
            .quota_repo
            .find(&mut tx, owner)
            .await?
            .ok_or_else(|| AppError::internal("Quota row vanished after provisioning"))?;
        commit(tx).await?;
        Ok(quota)
    }

    /// Change an owner's allotment. Refused if usage is already above it.
    pub async fn set_allotment(&self, owner: OwnerId, allotted_bytes: i64) -> AppResult<Quota> {
        if allotted_bytes < 0 {
            return Err(AppError::validation("Allotment must not be negative"));
        }
        let mut tx = self.db.begin().await?;
        self.lock_owner(&mut tx, owner).await?;
        if !self
            .quota_repo
            .set_allotment(&mut tx, owner, allotted_bytes, Utc::now())
            .await?
        {
            return Err(AppError::validation(
                "Allotment is below the owner's current usage",
            ));
        }
        let quota = self
            .quota_repo
            .find(&mut tx, owner)
            .await?
            .ok_or_else(|| AppError::internal("Quota row vanished after update"))?;
        commit(tx).await?;

        info!(owner_id = %owner, allotted_bytes, "Quota allotment changed");
        Ok(quota)
    }

    /// Recompute `used` from the sizes of the owner's non-Purged files.
    pub async fn recalculate(&self, owner: OwnerId) -> AppResult<Quota> {
        let mut tx = self.db.begin().await?;
        self.lock_owner(&mut tx, owner).await?;
        let live = self.node_repo.live_bytes(&mut tx, owner).await?;
        let before = self.quota_repo.find(&mut tx, owner).await?;
        self.quota_repo
            .set_used(&mut tx, owner, live, Utc::now())
            .await?;
        let quota = self
            .quota_repo
            .find(&mut tx, owner)
            .await?
            .ok_or_else(|| AppError::internal("Quota row vanished after update"))?;
        commit(tx).await?;

        let previous = before.map(|q| q.used_bytes).unwrap_or(0);
        if previous != quota.used_bytes {
            warn!(
                owner_id = %owner,
                previous,
                recalculated = quota.used_bytes,
                "Quota usage drifted and was corrected"
            );
        }
        if live > quota.used_bytes {
            warn!(
                owner_id = %owner,
                live_bytes = live,
                allotted_bytes = quota.allotted_bytes,
                "Live content exceeds the allotment"
            );
        }
        Ok(quota)
    }
}
