//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
///
/// Messages are stable message keys (for example `category.self_parent`); the
/// HTTP layer resolves them against the request culture.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(key: impl Into<String>) -> Self {
        Self::Validation(key.into())
    }

    pub fn invariant(key: impl Into<String>) -> Self {
        Self::InvariantViolation(key.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(key: impl Into<String>) -> Self {
        Self::Conflict(key.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    /// Message key (or raw message for `InvalidId`) carried by this error.
    pub fn key(&self) -> &str {
        match self {
            Self::Validation(k)
            | Self::InvariantViolation(k)
            | Self::InvalidId(k)
            | Self::NotFound(k)
            | Self::Conflict(k) => k,
        }
    }
}
