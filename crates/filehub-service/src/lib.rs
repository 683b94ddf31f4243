//! # filehub-service
//!
//! Business logic for FileHub's storage core. Each service orchestrates
//! metadata transactions and blob I/O to implement one use case: the file
//! tree, version history, quotas, share links, the recycle bin and the
//! reconciliation sweep. Blob content is written before a transaction opens
//! and live keys are mirrored after it commits, so no transaction waits on
//! storage.
//!
//! Services take all their dependencies at construction time as `Arc`
//! references. [`Services`] wires them all.

mod guard;

pub mod hashing;
pub mod live;
pub mod mime;
pub mod quota;
pub mod reconcile;
pub mod recycle;
pub mod services;
pub mod share;
pub mod tree;
pub mod version;

pub use live::LiveMirror;
pub use quota::QuotaService;
pub use reconcile::{ReconcileReport, ReconcileService};
pub use recycle::{RecycleService, SweepReport};
pub use services::Services;
pub use share::{CreateShareRequest, LinkService, PasswordHasher, ShareService};
pub use tree::{FileTreeService, PurgeReport, UploadRequest};
pub use version::{PruneReport, VersionService};
