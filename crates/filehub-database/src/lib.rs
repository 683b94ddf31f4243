//! # filehub-database
//!
//! SQLite metadata store for FileHub: connection management, embedded
//! migrations and repositories for nodes, versions, shares and quotas.
//!
//! Repository methods take an explicit `&mut SqliteConnection` so that
//! services can run several of them inside one transaction.

pub mod connection;
pub mod migration;
pub mod repositories;

pub use connection::{DatabasePool, DbTransaction, commit};
pub use sqlx::SqliteConnection;
