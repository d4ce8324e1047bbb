//! Error types for post operations.

use ormrepo::RepositoryError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PostError {
    #[error("Post not found: {0}")]
    NotFound(String),

    #[error("Post validation error: {0}")]
    ValidationError(String),

    /// The post cannot change in the requested way.
    #[error("Invalid post state: {0}")]
    InvalidState(String),

    #[error("Post database error: {0}")]
    DatabaseError(String),
}

impl From<RepositoryError> for PostError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound { id, .. } => PostError::NotFound(id),
            RepositoryError::Validation(errors) => PostError::ValidationError(errors.to_string()),
            RepositoryError::InvalidSpecification(msg) => PostError::ValidationError(msg),
            RepositoryError::Conflict { detail, .. } => PostError::InvalidState(detail),
            other => PostError::DatabaseError(other.to_string()),
        }
    }
}
