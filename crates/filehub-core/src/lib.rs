//! # filehub-core
//!
//! Core crate for FileHub. Contains the storage backend trait, configuration
//! schemas, typed identifiers, pagination types and the unified error system.
//!
//! This crate has **no** internal dependencies on other FileHub crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::{AppError, ErrorKind, SubtreeProgress};
pub use result::AppResult;
