//! Public error taxonomy.
//!
//! Every failure surfaced over REST or RPC is one of these kinds. Component
//! boundaries drop engine-specific detail into the `details` field (logged,
//! not shown to external consumers by default) and substitute a kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The failure classes of the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Request malformed or violates a precondition.
    InvalidArgument,
    /// Named resource does not exist (or is hidden in the branch).
    NotFound,
    /// Precondition violated by concurrent state (duplicate name, PK clash).
    Conflict,
    /// Missing or invalid credential.
    Unauthenticated,
    /// Credential valid but not authorized for the resource.
    PermissionDenied,
    /// Quota or descriptor exhaustion.
    ResourceExhausted,
    /// Operation exceeded its deadline.
    DeadlineExceeded,
    /// Transient engine/IO condition; retrying may succeed.
    Unavailable,
    /// Bug or unexpected engine error.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid-argument",
            Self::NotFound => "not-found",
            Self::Conflict => "conflict",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission-denied",
            Self::ResourceExhausted => "resource-exhausted",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }

    /// HTTP status the kind maps onto.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidArgument => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Unauthenticated => 401,
            Self::PermissionDenied => 403,
            Self::ResourceExhausted => 429,
            Self::DeadlineExceeded => 504,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service-level error carried across component boundaries.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct StorageError {
    pub kind: ErrorKind,
    pub message: String,
    /// Operator-facing detail (original engine message); logged at the
    /// boundary, not part of the public message.
    pub details: Option<String>,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::InvalidArgument).unwrap();
        assert_eq!(json, "\"invalid-argument\"");
        let parsed: ErrorKind = serde_json::from_str("\"deadline-exceeded\"").unwrap();
        assert_eq!(parsed, ErrorKind::DeadlineExceeded);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::Conflict.http_status(), 409);
        assert_eq!(ErrorKind::Unavailable.http_status(), 503);
    }

    #[test]
    fn details_stay_out_of_display() {
        let err = StorageError::internal("engine failure").with_details("IO error: disk full");
        assert_eq!(err.to_string(), "internal: engine failure");
        assert_eq!(err.details.as_deref(), Some("IO error: disk full"));
    }
}
