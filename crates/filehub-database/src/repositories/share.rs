//! Share repository implementation.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use filehub_core::result::AppResult;
use filehub_core::types::id::{NodeId, OwnerId, ShareId};
use filehub_entity::share::{NewShare, Share};

use super::map_db_error;

/// Repository for share links.
#[derive(Debug, Clone, Default)]
pub struct ShareRepository;

impl ShareRepository {
    /// Create a new share repository.
    pub fn new() -> Self {
        Self
    }

    /// Insert a share.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        data: &NewShare,
        now: DateTime<Utc>,
    ) -> AppResult<Share> {
        sqlx::query_as::<_, Share>(
            "INSERT INTO shares (id, token, node_id, created_by, password_hash, access, \
             expires_at, max_downloads, download_count, is_active, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 1, ?9) RETURNING *",
        )
        .bind(ShareId::new())
        .bind(&data.token)
        .bind(data.node_id)
        .bind(data.created_by)
        .bind(&data.password_hash)
        .bind(data.access)
        .bind(data.expires_at)
        .bind(data.max_downloads)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_db_error("Failed to create share"))
    }

    /// Find a share by ID.
    pub async fn find_by_id(
        &self,
        conn: &mut SqliteConnection,
        id: ShareId,
    ) -> AppResult<Option<Share>> {
        sqlx::query_as::<_, Share>("SELECT * FROM shares WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_db_error("Failed to find share"))
    }

    /// Find a share by token, active or not.
    pub async fn find_by_token(
        &self,
        conn: &mut SqliteConnection,
        token: &str,
    ) -> AppResult<Option<Share>> {
        sqlx::query_as::<_, Share>("SELECT * FROM shares WHERE token = ?1")
            .bind(token)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_db_error("Failed to find share by token"))
    }

    /// List shares created by an owner, newest first.
    pub async fn list_by_creator(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
    ) -> AppResult<Vec<Share>> {
        sqlx::query_as::<_, Share>(
            "SELECT * FROM shares WHERE created_by = ?1 ORDER BY created_at DESC",
        )
        .bind(owner)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to list shares"))
    }

    /// Record a successful access.
    pub async fn touch(
        &self,
        conn: &mut SqliteConnection,
        id: ShareId,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE shares SET last_accessed_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(map_db_error("Failed to update share access time"))?;
        Ok(())
    }

    /// Atomically count one download.
    ///
    /// The counter only moves while the share is active, unexpired and
    /// under its limit; reaching the limit deactivates the share in the
    /// same statement. Returns `None` when the download was not counted.
    pub async fn record_download(
        &self,
        conn: &mut SqliteConnection,
        token: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Share>> {
        sqlx::query_as::<_, Share>(
            "UPDATE shares SET download_count = download_count + 1, \
             is_active = CASE WHEN max_downloads IS NOT NULL \
                 AND download_count + 1 >= max_downloads THEN 0 ELSE is_active END, \
             last_accessed_at = ?2 \
             WHERE token = ?1 AND is_active = 1 \
             AND (max_downloads IS NULL OR download_count < max_downloads) \
             AND (expires_at IS NULL OR expires_at > ?2) \
             RETURNING *",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error("Failed to record share download"))
    }

    /// Deactivate one share.
    pub async fn deactivate(&self, conn: &mut SqliteConnection, id: ShareId) -> AppResult<bool> {
        let result = sqlx::query("UPDATE shares SET is_active = 0 WHERE id = ?1 AND is_active = 1")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(map_db_error("Failed to deactivate share"))?;
        Ok(result.rows_affected() == 1)
    }

    /// Deactivate every share of a node. Returns the number deactivated.
    pub async fn deactivate_for_node(
        &self,
        conn: &mut SqliteConnection,
        node_id: NodeId,
    ) -> AppResult<u64> {
        let result =
            sqlx::query("UPDATE shares SET is_active = 0 WHERE node_id = ?1 AND is_active = 1")
                .bind(node_id)
                .execute(&mut *conn)
                .await
                .map_err(map_db_error("Failed to deactivate node shares"))?;
        Ok(result.rows_affected())
    }
}
