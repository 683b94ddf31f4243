//! Node lifecycle state and its transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

use filehub_core::AppError;

/// Lifecycle state of a node.
///
/// Allowed transitions: Active -> Recycled, Recycled -> Active,
/// Active | Recycled -> Purged. Purged is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Visible in listings and name checks.
    Active,
    /// In the recycle bin. Blobs still exist and still count toward quota.
    Recycled,
    /// Permanently deleted. Kept as a tombstone row.
    Purged,
}

impl NodeState {
    /// Return the state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Recycled => "recycled",
            Self::Purged => "purged",
        }
    }

    /// Transition for a soft delete.
    pub fn recycle(self) -> Result<Self, AppError> {
        match self {
            Self::Active => Ok(Self::Recycled),
            other => Err(invalid(other, Self::Recycled)),
        }
    }

    /// Transition for a restore out of the recycle bin.
    pub fn restore(self) -> Result<Self, AppError> {
        match self {
            Self::Recycled => Ok(Self::Active),
            other => Err(invalid(other, Self::Active)),
        }
    }

    /// Transition for a permanent delete.
    pub fn purge(self) -> Result<Self, AppError> {
        match self {
            Self::Active | Self::Recycled => Ok(Self::Purged),
            other => Err(invalid(other, Self::Purged)),
        }
    }
}

fn invalid(from: NodeState, to: NodeState) -> AppError {
    AppError::invalid_target(format!("Cannot move node from {from} to {to}"))
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
