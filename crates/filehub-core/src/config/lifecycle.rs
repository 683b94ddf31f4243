//! Retention settings for the recycle bin, version history and the
//! reconciliation sweep.

use serde::{Deserialize, Serialize};

/// Recycle bin retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecycleConfig {
    /// Recycled batches older than this are purged by the sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for RecycleConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

/// Version history retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// Keep at most this many versions per file. Zero keeps all.
    #[serde(default = "default_max_versions")]
    pub max_versions: u32,
    /// Drop non-current versions older than this many days. Zero keeps all.
    #[serde(default)]
    pub max_age_days: i64,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            max_versions: default_max_versions(),
            max_age_days: 0,
        }
    }
}

/// Reconciliation sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Objects younger than this are never treated as orphans.
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            grace_minutes: default_grace_minutes(),
        }
    }
}

fn default_retention_days() -> i64 {
    30
}

fn default_max_versions() -> u32 {
    50
}

fn default_grace_minutes() -> i64 {
    60
}
