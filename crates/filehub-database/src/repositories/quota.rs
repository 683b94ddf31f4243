//! Quota repository implementation.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use filehub_core::error::{AppError, ErrorKind};
use filehub_core::result::AppResult;
use filehub_core::types::id::OwnerId;
use filehub_entity::quota::Quota;

use super::map_db_error;

/// Repository for per-owner quota counters.
#[derive(Debug, Clone, Default)]
pub struct QuotaRepository;

impl QuotaRepository {
    /// Create a new quota repository.
    pub fn new() -> Self {
        Self
    }

    /// Provision the owner's row if needed and write to it.
    ///
    /// Run as the first statement of a transaction this takes the database
    /// write lock, serializing all mutations of the owner.
    pub async fn lock_owner(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        default_allotment: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO quotas (owner_id, allotted_bytes, used_bytes, updated_at) \
             VALUES (?1, ?2, 0, ?3) \
             ON CONFLICT (owner_id) DO UPDATE SET updated_at = excluded.updated_at",
        )
        .bind(owner)
        .bind(default_allotment)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(map_db_error("Failed to lock quota row"))?;
        Ok(())
    }

    /// Find an owner's quota row.
    pub async fn find(&self, conn: &mut SqliteConnection, owner: OwnerId) -> AppResult<Option<Quota>> {
        sqlx::query_as::<_, Quota>("SELECT * FROM quotas WHERE owner_id = ?1")
            .bind(owner)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_db_error("Failed to find quota"))
    }

    /// Add `delta` bytes to usage if it stays within the allotment.
    ///
    /// Returns `false` when the reservation would exceed the allotment.
    pub async fn reserve(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        delta: i64,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE quotas SET used_bytes = used_bytes + ?2, updated_at = ?3 \
             WHERE owner_id = ?1 AND used_bytes + ?2 <= allotted_bytes",
        )
        .bind(owner)
        .bind(delta)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            let check = matches!(
                &e,
                sqlx::Error::Database(db) if matches!(db.kind(), sqlx::error::ErrorKind::CheckViolation)
            );
            if check {
                AppError::with_source(ErrorKind::QuotaExceeded, "Quota constraint violated", e)
            } else {
                AppError::with_source(ErrorKind::Database, "Failed to reserve quota", e)
            }
        })?;
        Ok(result.rows_affected() == 1)
    }

    /// Subtract `delta` bytes from usage, flooring at zero.
    pub async fn release(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        delta: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE quotas SET used_bytes = MAX(used_bytes - ?2, 0), updated_at = ?3 \
             WHERE owner_id = ?1",
        )
        .bind(owner)
        .bind(delta)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(map_db_error("Failed to release quota"))?;
        Ok(())
    }

    /// Change the allotment. Returns `false` if current usage is above it.
    pub async fn set_allotment(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        allotted_bytes: i64,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE quotas SET allotted_bytes = ?2, updated_at = ?3 \
             WHERE owner_id = ?1 AND used_bytes <= ?2",
        )
        .bind(owner)
        .bind(allotted_bytes)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(map_db_error("Failed to set allotment"))?;
        Ok(result.rows_affected() == 1)
    }

    /// Overwrite usage with a recomputed value, capped at the allotment.
    pub async fn set_used(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        used_bytes: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE quotas SET used_bytes = MIN(MAX(?2, 0), allotted_bytes), updated_at = ?3 \
             WHERE owner_id = ?1",
        )
        .bind(owner)
        .bind(used_bytes)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(map_db_error("Failed to set quota usage"))?;
        Ok(())
    }
}
