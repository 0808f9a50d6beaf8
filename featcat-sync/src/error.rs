//! Error types for featcat-sync.
//!
//! [`RemoteError`] is what a [`crate::remote::GitRemote`] returns: raw status
//! codes and transport failures. [`CatalogError`] is what callers of the
//! engine see; `From<RemoteError>` performs the boundary mapping.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use featcat_core::{CodecError, StoreError};
use featcat_renderer::RenderError;

use crate::cancel::Cancelled;

/// Statuses the retry executor treats as transient.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The remote answered with a non-success status.
    #[error("remote returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
        /// Parsed `Retry-After`, when the remote sent one.
        retry_after: Option<Duration>,
    },

    /// Connection, DNS, TLS or timeout failure before a status was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// A success response whose body could not be decoded.
    #[error("could not decode remote response: {0}")]
    Decode(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl RemoteError {
    pub fn status_code(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Status {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.status()
            .is_some_and(|s| RETRYABLE_STATUSES.contains(&s))
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// The remote refused to create something because it already exists
    /// (GitLab answers `400 A file with this name already exists`).
    pub fn is_already_exists(&self) -> bool {
        match self {
            RemoteError::Status { status, message, .. } => {
                matches!(status, 400 | 409)
                    && message.to_ascii_lowercase().contains("already exists")
            }
            _ => false,
        }
    }
}

impl From<Cancelled> for RemoteError {
    fn from(_: Cancelled) -> Self {
        RemoteError::Cancelled
    }
}

// ---------------------------------------------------------------------------
// CatalogError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid feature id: {0}")]
    InvalidId(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("catalog codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("local state error: {0}")]
    Store(#[from] StoreError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The proposal ledger exists but is not valid JSON.
    #[error("malformed proposal ledger {path}: {source}")]
    Ledger {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A remote failure with no more specific kind.
    #[error(transparent)]
    Remote(RemoteError),
}

impl From<RemoteError> for CatalogError {
    fn from(err: RemoteError) -> Self {
        if err.is_already_exists() {
            return CatalogError::AlreadyExists(err.to_string());
        }
        match err {
            RemoteError::Status { status: 404, message, .. } => CatalogError::NotFound(message),
            RemoteError::Status { status: 401 | 403, message, .. } => {
                CatalogError::Permission(message)
            }
            RemoteError::Status { status: 409, message, .. } => CatalogError::Conflict(message),
            RemoteError::Status { status: 429, message, .. } => CatalogError::RateLimited(message),
            RemoteError::Status { status: 500..=599, message, .. } => {
                CatalogError::BackendUnreachable(message)
            }
            RemoteError::Transport(message) => CatalogError::BackendUnreachable(message),
            RemoteError::Cancelled => CatalogError::Cancelled,
            other => CatalogError::Remote(other),
        }
    }
}

impl From<Cancelled> for CatalogError {
    fn from(_: Cancelled) -> Self {
        CatalogError::Cancelled
    }
}

/// Flat classification of a [`CatalogError`], for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidId,
    InvalidRequest,
    Permission,
    Conflict,
    RateLimited,
    BackendUnreachable,
    NotSupported,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::InvalidId => "invalid-id",
            ErrorKind::InvalidRequest => "invalid-request",
            ErrorKind::Permission => "permission",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::BackendUnreachable => "backend-unreachable",
            ErrorKind::NotSupported => "not-supported",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::NotFound(_) => ErrorKind::NotFound,
            CatalogError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            CatalogError::InvalidId(_) | CatalogError::Codec(CodecError::InvalidId(_)) => {
                ErrorKind::InvalidId
            }
            CatalogError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            CatalogError::Permission(_) => ErrorKind::Permission,
            CatalogError::Conflict(_) => ErrorKind::Conflict,
            CatalogError::RateLimited(_) => ErrorKind::RateLimited,
            CatalogError::BackendUnreachable(_) => ErrorKind::BackendUnreachable,
            CatalogError::NotSupported(_) => ErrorKind::NotSupported,
            CatalogError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CatalogError::Cancelled)
    }
}

/// Convenience constructor for [`CatalogError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CatalogError {
    CatalogError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for s in RETRYABLE_STATUSES {
            assert!(RemoteError::status_code(s, "x").is_retryable(), "{s}");
        }
        for s in [400, 401, 403, 404, 409, 422, 501] {
            assert!(!RemoteError::status_code(s, "x").is_retryable(), "{s}");
        }
        assert!(!RemoteError::Transport("dns".into()).is_retryable());
    }

    #[test]
    fn already_exists_detection() {
        let e = RemoteError::status_code(400, "A file with this name already exists");
        assert!(e.is_already_exists());
        assert!(!RemoteError::status_code(400, "branch is missing").is_already_exists());
        assert!(!RemoteError::status_code(500, "already exists").is_already_exists());
    }

    #[test]
    fn boundary_mapping() {
        let cases = [
            (404, ErrorKind::NotFound),
            (401, ErrorKind::Permission),
            (403, ErrorKind::Permission),
            (409, ErrorKind::Conflict),
            (429, ErrorKind::RateLimited),
            (500, ErrorKind::BackendUnreachable),
            (503, ErrorKind::BackendUnreachable),
            (422, ErrorKind::Internal),
        ];
        for (status, kind) in cases {
            let err: CatalogError = RemoteError::status_code(status, "m").into();
            assert_eq!(err.kind(), kind, "status {status}");
        }
        let err: CatalogError = RemoteError::Transport("timed out".into()).into();
        assert_eq!(err.kind(), ErrorKind::BackendUnreachable);
        let err: CatalogError = RemoteError::Cancelled.into();
        assert!(err.is_cancelled());
    }

    #[test]
    fn unmapped_status_passes_through() {
        let err: CatalogError = RemoteError::status_code(422, "unprocessable").into();
        match err {
            CatalogError::Remote(inner) => assert_eq!(inner.status(), Some(422)),
            other => panic!("expected pass-through, got {other:?}"),
        }
    }

    #[test]
    fn file_exists_maps_to_already_exists() {
        let err: CatalogError =
            RemoteError::status_code(400, "A file with this name already exists").into();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }
}
