//! Error types for the handle bridge.
//!
//! Errors are layered the same way the bridge is:
//!
//! - [`HandleError`] - failures reported by a handle backend (the sandboxed
//!   environment's own exception names, mapped one-to-one)
//! - [`StoreError`] - failures of the persisted key/value collaborator
//! - [`ProviderError`] - the only error type that leaves the provider facade,
//!   classified by [`FsErrorKind`] and always carrying the offending identifier
//!
//! Handle errors never escape the facade raw; [`ProviderError::from_handle`]
//! is the single translation point.

use crate::identifier::Identifier;
use thiserror::Error;

/// Message surfaced when a handle rejects an operation for lack of permission.
pub const NOT_ALLOWED_MESSAGE: &str =
    "Insufficient permissions. Please retry and allow the operation.";

/// Errors reported by a handle backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandleError {
    /// No child with this name exists.
    #[error("Entry not found: {name}")]
    NotFound {
        /// Name of the missing child.
        name: String,
    },

    /// A child with this name exists but is of the other kind.
    #[error("Entry '{name}' exists with a different kind")]
    TypeMismatch {
        /// Name of the conflicting child.
        name: String,
    },

    /// The environment refused access (permission not granted or revoked).
    #[error("Permission not granted")]
    NotAllowed,

    /// The modification is invalid (e.g. removing a non-empty directory
    /// without the recursive flag).
    #[error("Invalid modification: {0}")]
    InvalidModification(String),

    /// The operation was aborted before completion.
    #[error("Operation aborted")]
    Aborted,

    /// The environment does not offer this primitive.
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// Underlying I/O failure.
    #[error("Handle I/O failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for HandleError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => HandleError::NotFound {
                name: e.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => HandleError::NotAllowed,
            _ => HandleError::Io(e.to_string()),
        }
    }
}

/// Errors reported by the persisted key/value collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A write was attempted inside a read-only transaction.
    #[error("Transaction is read-only")]
    ReadOnly,

    /// The backing store could not be reached or refused the transaction.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Classification of errors surfaced by the provider facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsErrorKind {
    /// Target (or a required parent) does not exist.
    FileNotFound,
    /// Target exists and overwriting was not requested.
    FileExists,
    /// Permission denied, or the operation is not supported.
    Unavailable,
    /// The operation was cancelled through its token.
    Cancelled,
    /// Any other failure, wrapped.
    Unknown,
}

impl FsErrorKind {
    fn default_message(self) -> &'static str {
        match self {
            FsErrorKind::FileNotFound => "No file or directory found",
            FsErrorKind::FileExists => "File already exists",
            FsErrorKind::Unavailable => "Operation unavailable",
            FsErrorKind::Cancelled => "Canceled",
            FsErrorKind::Unknown => "Unknown error",
        }
    }
}

impl From<&HandleError> for FsErrorKind {
    fn from(e: &HandleError) -> Self {
        match e {
            HandleError::NotFound { .. } => FsErrorKind::FileNotFound,
            HandleError::NotAllowed | HandleError::Unsupported(_) => FsErrorKind::Unavailable,
            HandleError::Aborted => FsErrorKind::Cancelled,
            HandleError::TypeMismatch { .. }
            | HandleError::InvalidModification(_)
            | HandleError::Io(_) => FsErrorKind::Unknown,
        }
    }
}

/// Error returned by every provider facade operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} ({path})")]
pub struct ProviderError {
    kind: FsErrorKind,
    path: Identifier,
    message: String,
}

impl ProviderError {
    /// Create an error with an explicit message.
    pub fn new(kind: FsErrorKind, path: Identifier, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create an error with the kind's default message.
    pub fn of_kind(kind: FsErrorKind, path: &Identifier) -> Self {
        Self::new(kind, path.clone(), kind.default_message())
    }

    pub fn not_found(path: &Identifier) -> Self {
        Self::of_kind(FsErrorKind::FileNotFound, path)
    }

    pub fn exists(path: &Identifier) -> Self {
        Self::of_kind(FsErrorKind::FileExists, path)
    }

    pub fn unavailable(path: &Identifier, message: impl Into<String>) -> Self {
        Self::new(FsErrorKind::Unavailable, path.clone(), message)
    }

    pub fn cancelled(path: &Identifier) -> Self {
        Self::of_kind(FsErrorKind::Cancelled, path)
    }

    pub fn unknown(path: &Identifier, message: impl Into<String>) -> Self {
        Self::new(FsErrorKind::Unknown, path.clone(), message)
    }

    /// Translate a handle backend error at the facade boundary.
    pub fn from_handle(e: &HandleError, path: &Identifier) -> Self {
        let kind = FsErrorKind::from(e);
        let message = match e {
            HandleError::NotAllowed => NOT_ALLOWED_MESSAGE.to_string(),
            other => other.to_string(),
        };
        Self::new(kind, path.clone(), message)
    }

    /// The error classification.
    pub fn kind(&self) -> FsErrorKind {
        self.kind
    }

    /// The identifier the failing operation targeted.
    pub fn path(&self) -> &Identifier {
        &self.path
    }

    /// Human-readable description without the path.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == FsErrorKind::FileNotFound
    }

    pub fn is_unavailable(&self) -> bool {
        self.kind == FsErrorKind::Unavailable
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FsErrorKind::Cancelled
    }
}

/// Result type for provider facade operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
