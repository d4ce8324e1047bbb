//! # Repository Configuration
//!
//! [`RepositoryConfig`] carries the knobs that apply to every repository built with
//! it: the default read limit, global filters, and how explicit `null` values in a
//! partial update are treated. It derives `serde` so consumers can load it from
//! whatever source they use; loading itself is not this crate's concern.

use crate::entity::Fields;
use crate::error::{RepositoryError, RepositoryResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Limit applied to `list` when the specification carries no pagination.
pub const DEFAULT_LIMIT: u64 = 1000;

/// How an explicit `null` in a [`Patch`](crate::dto::Patch) is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullPolicy {
    /// `null` writes null. Rejected for fields that are not nullable.
    #[default]
    SetNull,
    /// `null` is treated exactly like an absent field.
    Ignore,
}

/// Settings shared by repositories.
///
/// # Example
/// ```
/// use ormrepo::{NullPolicy, RepositoryConfig};
///
/// let config = RepositoryConfig::default()
///     .with_default_limit(50)
///     .unwrap()
///     .with_global_filter("active", true)
///     .with_null_policy(NullPolicy::Ignore);
/// assert_eq!(config.default_limit, 50);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Maximum rows returned by `list` when the caller does not paginate.
    pub default_limit: u64,
    /// Equality filters AND-ed into every read. A filter naming a column the
    /// entity does not declare is discarded for that entity.
    pub global_filters: Fields,
    /// Treatment of explicit `null` in partial updates.
    pub null_policy: NullPolicy,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            global_filters: Fields::new(),
            null_policy: NullPolicy::default(),
        }
    }
}

impl RepositoryConfig {
    pub fn with_default_limit(mut self, limit: i64) -> RepositoryResult<Self> {
        if limit <= 0 {
            return Err(RepositoryError::Config(format!(
                "default_limit must be > 0, got {limit}"
            )));
        }
        self.default_limit = limit as u64;
        Ok(self)
    }

    pub fn with_global_filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.global_filters.insert(field.into(), value.into());
        self
    }

    pub fn without_global_filters(mut self) -> Self {
        self.global_filters.clear();
        self
    }

    pub fn with_null_policy(mut self, policy: NullPolicy) -> Self {
        self.null_policy = policy;
        self
    }

    /// Checks values that may have arrived through deserialization.
    pub fn validate(&self) -> RepositoryResult<()> {
        if self.default_limit == 0 {
            return Err(RepositoryError::Config("default_limit must be > 0".into()));
        }
        if let Some(key) = self.global_filters.keys().find(|k| k.trim().is_empty()) {
            return Err(RepositoryError::Config(format!(
                "global filter keys must be non-empty, got {key:?}"
            )));
        }
        Ok(())
    }
}
