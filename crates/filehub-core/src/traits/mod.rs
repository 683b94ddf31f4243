//! Core traits defined in `filehub-core` and implemented by other crates.

pub mod storage;

pub use storage::{ByteStream, StorageBackend, StorageObjectMeta};
