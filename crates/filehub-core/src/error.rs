//! Unified application error types for FileHub.
//!
//! All crates map their internal errors into [`AppError`] for consistent
//! propagation through the ? operator.

use std::fmt;
use thiserror::Error;

/// Top-level error kind categorization used across the entire application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// The requested node, share or account was not found.
    NotFound,
    /// The caller does not own the resource and it is not public.
    PermissionDenied,
    /// Input validation failed (bad name, bad share parameters, ...).
    Validation,
    /// The operation would push the owner's usage past the allotment.
    QuotaExceeded,
    /// An active sibling with the same name already exists.
    Conflict,
    /// The destination is not a directory, or the move/copy would create a cycle.
    InvalidTarget,
    /// The requested file version does not exist.
    VersionNotFound,
    /// The share token is unknown, deactivated or exhausted.
    ShareInvalid,
    /// The share has passed its expiry time.
    ShareExpired,
    /// The share is password protected and no password was supplied.
    PasswordRequired,
    /// The supplied share password does not match.
    PasswordIncorrect,
    /// A storage backend operation failed or timed out.
    StorageIo,
    /// A subtree operation completed for only part of the subtree.
    PartialFailure,
    /// A database error occurred.
    Database,
    /// A configuration error occurred.
    Configuration,
    /// A serialization/deserialization error occurred.
    Serialization,
    /// An internal error occurred.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::PermissionDenied => write!(f, "PERMISSION_DENIED"),
            Self::Validation => write!(f, "VALIDATION"),
            Self::QuotaExceeded => write!(f, "QUOTA_EXCEEDED"),
            Self::Conflict => write!(f, "CONFLICT"),
            Self::InvalidTarget => write!(f, "INVALID_TARGET"),
            Self::VersionNotFound => write!(f, "VERSION_NOT_FOUND"),
            Self::ShareInvalid => write!(f, "SHARE_INVALID"),
            Self::ShareExpired => write!(f, "SHARE_EXPIRED"),
            Self::PasswordRequired => write!(f, "PASSWORD_REQUIRED"),
            Self::PasswordIncorrect => write!(f, "PASSWORD_INCORRECT"),
            Self::StorageIo => write!(f, "STORAGE_IO"),
            Self::PartialFailure => write!(f, "PARTIAL_FAILURE"),
            Self::Database => write!(f, "DATABASE"),
            Self::Configuration => write!(f, "CONFIGURATION"),
            Self::Serialization => write!(f, "SERIALIZATION"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Progress counters carried by a [`ErrorKind::PartialFailure`] error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SubtreeProgress {
    /// Nodes whose own unit of work committed.
    pub succeeded: u64,
    /// Nodes whose unit of work failed. Descendants of a failed node are not visited.
    pub failed: u64,
}

/// The unified application error used throughout FileHub.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The category of error.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Subtree progress, set only for [`ErrorKind::PartialFailure`].
    pub progress: Option<SubtreeProgress>,
}

impl AppError {
    /// Create a new application error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            progress: None,
        }
    }

    /// Create a new application error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
            progress: None,
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a permission-denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create a quota-exceeded error.
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Create an invalid-target error.
    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTarget, message)
    }

    /// Create a version-not-found error.
    pub fn version_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::VersionNotFound, message)
    }

    /// Create a share-invalid error.
    pub fn share_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ShareInvalid, message)
    }

    /// Create a share-expired error.
    pub fn share_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ShareExpired, message)
    }

    /// Create a password-required error.
    pub fn password_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PasswordRequired, message)
    }

    /// Create a password-incorrect error.
    pub fn password_incorrect(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PasswordIncorrect, message)
    }

    /// Create a storage I/O error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageIo, message)
    }

    /// Create a partial-failure error carrying subtree progress.
    pub fn partial_failure(message: impl Into<String>, progress: SubtreeProgress) -> Self {
        Self {
            kind: ErrorKind::PartialFailure,
            message: message.into(),
            source: None,
            progress: Some(progress),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Whether this error was raised by validation before any side effect.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::NotFound
                | ErrorKind::PermissionDenied
                | ErrorKind::Validation
                | ErrorKind::QuotaExceeded
                | ErrorKind::Conflict
                | ErrorKind::InvalidTarget
                | ErrorKind::VersionNotFound
        )
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            source: None,
            progress: self.progress,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorKind::StorageIo, format!("I/O error: {err}"), err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}
