//! # Repository Errors
//!
//! This module defines the error taxonomy shared by every component of the crate.
//! Repository operations, scopes, adapters and mappers all return
//! [`RepositoryResult`], so an error raised anywhere inside a unit of work travels
//! unchanged to the caller after the scope has rolled back.

use serde_json::Value;
use std::fmt;

/// A single field that failed one of its declared rules.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    /// Dotted path of the offending field (`"age"`, `"address.city"`).
    pub path: String,
    /// Name of the violated rule (`"required"`, `"min_length(2)"`, ...).
    pub rule: String,
    /// The value that was received.
    pub value: Value,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (got {})", self.path, self.rule, self.value)
    }
}

/// Every field-level failure found while validating one object.
///
/// Validation never stops at the first failure: the list carries all of them so
/// callers can report the complete set back to the user.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a list holding exactly one failure.
    pub fn single(path: impl Into<String>, rule: impl Into<String>, value: Value) -> Self {
        let mut errors = Self::new();
        errors.push(path, rule, value);
        errors
    }

    pub fn push(&mut self, path: impl Into<String>, rule: impl Into<String>, value: Value) {
        self.errors.push(FieldError {
            path: path.into(),
            rule: rule.into(),
            value,
        });
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    /// Failures recorded for one field path.
    pub fn for_field<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a FieldError> + 'a {
        self.errors.iter().filter(move |e| e.path == path)
    }

    /// `Ok(())` when nothing was recorded, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Errors surfaced by repositories and their collaborators.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum RepositoryError {
    /// DTO construction or merge failed field-level rules.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// An identity lookup that must succeed found nothing.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The store rejected a write because of a uniqueness or integrity constraint.
    #[error("Conflict on {entity}: {detail}")]
    Conflict { entity: &'static str, detail: String },

    /// A query specification is malformed (non-positive limit, bad operand, ...).
    #[error("Invalid query specification: {0}")]
    InvalidSpecification(String),

    /// An operation went through a scope that is closed or already finished.
    #[error("Scope error: {0}")]
    Scope(String),

    /// Repository configuration or a DTO schema is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The delegate store failed for a reason outside the taxonomy above.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl RepositoryError {
    /// HTTP-style status code for consumers that expose repositories over an API.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidSpecification(_) => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Scope(_) | Self::Config(_) | Self::Backend(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<ValidationErrors> for RepositoryError {
    fn from(errors: ValidationErrors) -> Self {
        RepositoryError::Validation(errors)
    }
}

/// Result alias used across the crate.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validation_errors_list_every_field() {
        let mut errors = ValidationErrors::new();
        errors.push("name", "required", Value::Null);
        errors.push("age", "min(0)", json!(-3));

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.for_field("age").count(), 1);
        assert_eq!(
            errors.to_string(),
            "name: required (got null); age: min(0) (got -3)"
        );
        assert!(errors.into_result().is_err());
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_status_codes() {
        let not_found = RepositoryError::NotFound {
            entity: "users",
            id: "1".into(),
        };
        assert_eq!(not_found.status_code(), 404);
        assert!(not_found.is_not_found());
        assert_eq!(
            RepositoryError::from(ValidationErrors::single("x", "required", Value::Null))
                .status_code(),
            400
        );
        assert_eq!(
            RepositoryError::Conflict {
                entity: "users",
                detail: "dup".into()
            }
            .status_code(),
            409
        );
    }
}
