//! File tree node entities.

pub mod model;
pub mod state;

pub use model::{BlobState, FileNode, NodeKind, Visibility};
pub use state::NodeState;
