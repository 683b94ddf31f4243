//! Quota entities.

pub mod model;

pub use model::Quota;
