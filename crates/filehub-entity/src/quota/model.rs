//! Per-owner quota model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use filehub_core::types::id::OwnerId;

/// Byte counters for one owner.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quota {
    /// The owner.
    pub owner_id: OwnerId,
    /// Maximum bytes the owner may store.
    pub allotted_bytes: i64,
    /// Bytes currently charged to the owner.
    pub used_bytes: i64,
    /// When the counters last changed.
    pub updated_at: DateTime<Utc>,
}

impl Quota {
    /// Bytes still available.
    pub fn available_bytes(&self) -> i64 {
        (self.allotted_bytes - self.used_bytes).max(0)
    }

    /// Usage percentage (0.0 - 100.0).
    pub fn usage_percent(&self) -> f64 {
        if self.allotted_bytes == 0 {
            0.0
        } else {
            (self.used_bytes as f64 / self.allotted_bytes as f64) * 100.0
        }
    }

    /// Check if adding the given number of bytes would exceed the allotment.
    pub fn would_exceed(&self, additional_bytes: i64) -> bool {
        self.used_bytes + additional_bytes > self.allotted_bytes
    }
}
