//! Materialized path helpers.

use filehub_core::error::AppError;
use filehub_core::result::AppResult;

/// Longest allowed node name in bytes.
pub const MAX_NAME_BYTES: usize = 255;

/// Path of a node named `name` under a parent with path `parent_path`
/// (`None` for the owner's root level).
pub fn compute_path(parent_path: Option<&str>, name: &str) -> String {
    match parent_path {
        Some(parent) => format!("{}/{name}", parent.trim_end_matches('/')),
        None => format!("/{name}"),
    }
}

/// Reject names that cannot be a single path segment.
pub fn validate_name(name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(AppError::validation("Name must not be empty"));
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(AppError::validation(format!(
            "Name exceeds {MAX_NAME_BYTES} bytes"
        )));
    }
    if name == "." || name == ".." {
        return Err(AppError::validation(format!("'{name}' is not a valid name")));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(AppError::validation(
            "Name must not contain '/' or NUL characters",
        ));
    }
    Ok(())
}
