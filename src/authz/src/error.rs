//! Error types for the authorization engine

use thiserror::Error;

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// The subject id does not resolve to a known principal
    #[error("Principal not found: {0}")]
    PrincipalNotFound(String),

    /// The role→permission directory could not be read
    #[error("Permission source unavailable: {0}")]
    PermissionSourceUnavailable(String),

    /// An override points at a permission that no longer exists
    #[error("Malformed override reference: {0}")]
    MalformedOverrideReference(String),

    /// A mutation was rejected by a safety guardrail
    #[error("Safety violation: {reason}")]
    SafetyViolation { reason: String },

    /// The acting principal lacks the permission the operation requires
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Build a safety violation carrying the guardrail reason
    pub fn safety(reason: impl Into<String>) -> Self {
        Self::SafetyViolation {
            reason: reason.into(),
        }
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
