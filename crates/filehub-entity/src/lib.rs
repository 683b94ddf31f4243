//! # filehub-entity
//!
//! Domain entity models for the FileHub storage core. Every struct in this
//! crate represents a database table row or a domain value object. All
//! entities derive `Debug`, `Clone`, `Serialize`, `Deserialize`, and
//! database entities additionally derive `sqlx::FromRow`.

pub mod node;
pub mod quota;
pub mod share;
pub mod version;
