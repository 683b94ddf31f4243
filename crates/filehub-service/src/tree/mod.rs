//! Hierarchical file tree: directories, file content, moves, copies and
//! the recycle lifecycle.

pub mod copy;
pub mod lifecycle;
pub mod path;
pub mod relocate;
pub mod service;

pub use lifecycle::PurgeReport;
pub use path::{compute_path, validate_name};
pub use service::{FileTreeService, UploadRequest};
