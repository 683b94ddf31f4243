//! File version repository implementation.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use filehub_core::result::AppResult;
use filehub_core::types::id::{NodeId, VersionId};
use filehub_entity::version::{FileVersion, NewFileVersion};

use super::map_db_error;

/// Repository for append-only file versions.
#[derive(Debug, Clone, Default)]
pub struct VersionRepository;

impl VersionRepository {
    /// Create a new version repository.
    pub fn new() -> Self {
        Self
    }

    /// Append a version row.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        data: &NewFileVersion,
        now: DateTime<Utc>,
    ) -> AppResult<FileVersion> {
        sqlx::query_as::<_, FileVersion>(
            "INSERT INTO file_versions (id, file_id, version, size_bytes, content_hash, \
             storage_key, mime_type, created_by, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) RETURNING *",
        )
        .bind(data.id)
        .bind(data.file_id)
        .bind(data.version)
        .bind(data.size_bytes)
        .bind(&data.content_hash)
        .bind(&data.storage_key)
        .bind(&data.mime_type)
        .bind(data.created_by)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_db_error("Failed to insert file version"))
    }

    /// All versions of a file, oldest first.
    pub async fn list_for_file(
        &self,
        conn: &mut SqliteConnection,
        file_id: NodeId,
    ) -> AppResult<Vec<FileVersion>> {
        sqlx::query_as::<_, FileVersion>(
            "SELECT * FROM file_versions WHERE file_id = ?1 ORDER BY version ASC",
        )
        .bind(file_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to list file versions"))
    }

    /// Find one version of a file by number.
    pub async fn find(
        &self,
        conn: &mut SqliteConnection,
        file_id: NodeId,
        version: i32,
    ) -> AppResult<Option<FileVersion>> {
        sqlx::query_as::<_, FileVersion>(
            "SELECT * FROM file_versions WHERE file_id = ?1 AND version = ?2",
        )
        .bind(file_id)
        .bind(version)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error("Failed to find file version"))
    }

    /// Delete every version of a file, returning the removed rows.
    pub async fn delete_for_file(
        &self,
        conn: &mut SqliteConnection,
        file_id: NodeId,
    ) -> AppResult<Vec<FileVersion>> {
        sqlx::query_as::<_, FileVersion>(
            "DELETE FROM file_versions WHERE file_id = ?1 RETURNING *",
        )
        .bind(file_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to delete file versions"))
    }

    /// Delete a single version row.
    pub async fn delete(&self, conn: &mut SqliteConnection, id: VersionId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM file_versions WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(map_db_error("Failed to delete file version"))?;
        Ok(result.rows_affected() == 1)
    }

    /// Non-current versions of live files that fall outside the retention
    /// policy: more than `keep_latest` behind the current version (when
    /// `keep_latest > 0`) or created before `created_before`.
    pub async fn prune_candidates(
        &self,
        conn: &mut SqliteConnection,
        keep_latest: i64,
        created_before: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<FileVersion>> {
        sqlx::query_as::<_, FileVersion>(
            "SELECT v.* FROM file_versions v JOIN nodes n ON n.id = v.file_id \
             WHERE n.state != 'purged' AND v.version < n.version \
             AND ((?1 > 0 AND v.version <= n.version - ?1) \
                  OR (?2 IS NOT NULL AND v.created_at < ?2)) \
             ORDER BY v.file_id, v.version",
        )
        .bind(keep_latest)
        .bind(created_before)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error("Failed to find prunable versions"))
    }

    /// Every recorded version, for reconciliation.
    pub async fn all(&self, conn: &mut SqliteConnection) -> AppResult<Vec<FileVersion>> {
        sqlx::query_as::<_, FileVersion>("SELECT * FROM file_versions ORDER BY file_id, version")
            .fetch_all(&mut *conn)
            .await
            .map_err(map_db_error("Failed to list file versions"))
    }
}
