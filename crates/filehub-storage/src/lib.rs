//! # filehub-storage
//!
//! Blob storage backends for FileHub. Supports the local filesystem and,
//! behind the `s3` feature, S3-compatible object stores (AWS, MinIO).

pub mod keys;
pub mod manager;
pub mod providers;

pub use manager::StorageManager;
