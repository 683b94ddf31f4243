//! Storage key derivation.
//!
//! Live content sits at `{owner}/{path}` and mirrors the current revision.
//! Each revision has its own key under `versions/`, named by its version id,
//! that never changes when the file is renamed or moved.

use filehub_core::types::id::{NodeId, OwnerId, VersionId};

/// Prefix under which all version blobs live.
pub const VERSIONS_PREFIX: &str = "versions/";

/// Key of a file's current content.
pub fn live_key(owner: OwnerId, path: &str) -> String {
    format!("{owner}/{}", path.trim_start_matches('/'))
}

/// Key of one revision of a file.
pub fn version_key(owner: OwnerId, node: NodeId, version: VersionId) -> String {
    format!("{VERSIONS_PREFIX}{owner}/{node}/{version}")
}

/// Prefix of every live key of an owner.
pub fn owner_prefix(owner: OwnerId) -> String {
    format!("{owner}/")
}
