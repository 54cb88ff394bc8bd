use thiserror::Error;

use content_core::DomainError;
use content_infra::PersistenceError;

use crate::validation::ValidationFailure;

pub type AppResult<T> = Result<T, AppError>;

/// Outcome of a failed request.
///
/// Expected business failures (`Validation`, `Domain`) are values, not panics;
/// `Persistence` is anything the store could not do.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed ({} failures)", .0.len())]
    Validation(Vec<ValidationFailure>),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Persistence(PersistenceError),
}

impl AppError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Domain(DomainError::Validation(_) | DomainError::InvalidId(_)) => "validation",
            AppError::Domain(DomainError::InvariantViolation(_)) => "invariant",
            AppError::Domain(DomainError::NotFound(_)) => "not_found",
            AppError::Domain(DomainError::Conflict(_)) => "conflict",
            AppError::Persistence(_) => "persistence",
        }
    }
}

impl From<PersistenceError> for AppError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Rejected(domain) => AppError::Domain(domain),
            PersistenceError::Conflict(detail) => {
                tracing::debug!(%detail, "optimistic concurrency conflict");
                AppError::Domain(DomainError::conflict("concurrency.conflict"))
            }
            other => AppError::Persistence(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_become_domain_conflicts() {
        let err = AppError::from(PersistenceError::Conflict("content.post/1 expected 2".into()));

        assert_eq!(err.kind(), "conflict");
        assert!(matches!(err, AppError::Domain(DomainError::Conflict(ref k)) if k == "concurrency.conflict"));
    }

    #[test]
    fn rejected_writes_keep_their_domain_error() {
        let err = AppError::from(PersistenceError::Rejected(DomainError::invariant(
            "category.self_parent",
        )));

        assert_eq!(err.kind(), "invariant");
    }

    #[test]
    fn unavailable_store_is_a_persistence_failure() {
        let err = AppError::from(PersistenceError::Unavailable("pool timed out".into()));

        assert_eq!(err.kind(), "persistence");
    }
}
