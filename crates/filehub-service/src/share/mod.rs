//! Share link services.

pub mod password;
pub mod service;
pub mod token;

pub use password::PasswordHasher;
pub use service::{CreateShareRequest, ShareService};
pub use token::LinkService;
