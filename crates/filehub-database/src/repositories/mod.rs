//! Repository implementations for FileHub metadata.

pub mod node;
pub mod quota;
pub mod share;
pub mod version;

pub use node::NodeRepository;
pub use quota::QuotaRepository;
pub use share::ShareRepository;
pub use version::VersionRepository;

use filehub_core::error::{AppError, ErrorKind};

/// Map a sqlx error, turning unique-constraint violations into `Conflict`.
pub(crate) fn map_db_error(message: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| {
        let unique = matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation());
        if unique {
            AppError::with_source(ErrorKind::Conflict, format!("{message}: name already exists"), e)
        } else {
            AppError::with_source(ErrorKind::Database, message, e)
        }
    }
}
