//! Error types for user operations.

use ormrepo::RepositoryError;
use thiserror::Error;

/// Errors that can occur during user operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UserError {
    /// The requested user was not found.
    #[error("User not found: {0}")]
    NotFound(String),

    /// A user with the same email already exists.
    #[error("User already exists: {0}")]
    AlreadyExists(String),

    /// The user data provided is invalid.
    #[error("User validation error: {0}")]
    ValidationError(String),

    /// The store failed.
    #[error("User database error: {0}")]
    DatabaseError(String),
}

impl From<RepositoryError> for UserError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound { id, .. } => UserError::NotFound(id),
            RepositoryError::Conflict { detail, .. } => UserError::AlreadyExists(detail),
            RepositoryError::Validation(errors) => UserError::ValidationError(errors.to_string()),
            RepositoryError::InvalidSpecification(msg) => UserError::ValidationError(msg),
            other => UserError::DatabaseError(other.to_string()),
        }
    }
}
