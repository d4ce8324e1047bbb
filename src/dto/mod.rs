//! # DTOs and Mapping
//!
//! DTOs are the validated shapes that cross the repository boundary. This module
//! holds the pieces a repository needs to build them:
//!
//! - [`DtoSchema`]: per-field types, flags and rules
//! - [`DtoMapper`] / [`SchemaMapper`]: entity ↔ DTO conversion
//! - [`Patch`]: a partial DTO for updates
//!
//! Field values move between these as [`Fields`] maps, so merging a patch into an
//! existing object is the same operation for every DTO type.

mod mapper;
mod schema;

pub use mapper::{DtoMapper, SchemaMapper};
pub(crate) use mapper::dto_from_fields;
pub use schema::{DtoSchema, FieldSpec, FieldType, Rule};

use crate::config::NullPolicy;
use crate::entity::Fields;
use crate::error::ValidationErrors;
use crate::relation::{split_relations, Relation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::{self, Debug};
use std::marker::PhantomData;

/// Transport object type. Implemented for every `serde` type that fits.
pub trait Dto: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {}

impl<T> Dto for T where T: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {}

/// Field view of any serializable object. Non-objects are a validation failure.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, ValidationErrors> {
    match serde_json::to_value(value) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(ValidationErrors::single("$", "object", other)),
        Err(e) => Err(ValidationErrors::single("$", "serialize", Value::String(e.to_string()))),
    }
}

pub fn from_fields<T: DeserializeOwned>(fields: Fields) -> Result<T, ValidationErrors> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| ValidationErrors::single("$", "type", Value::String(e.to_string())))
}

/// Writes `changes` over `base`. Nested objects are merged key by key instead
/// of being replaced; every other value (arrays included) replaces.
pub fn merge_fields(base: &mut Fields, changes: &Fields) {
    for (key, value) in changes {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                merge_fields(existing, nested);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// A partial DTO: only the fields present are changed by an update.
///
/// ```
/// use ormrepo::dto::Patch;
/// use serde_json::json;
///
/// #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
/// struct UserDto { name: String, age: i64 }
///
/// let patch = Patch::<UserDto>::new().set("age", 31);
/// assert_eq!(patch.len(), 1);
/// assert_eq!(patch.fields()["age"], json!(31));
/// ```
pub struct Patch<D> {
    fields: Fields,
    _dto: PhantomData<fn() -> D>,
}

impl<D> Clone for Patch<D> {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            _dto: PhantomData,
        }
    }
}

impl<D> Default for Patch<D> {
    fn default() -> Self {
        Self {
            fields: Fields::new(),
            _dto: PhantomData,
        }
    }
}

impl<D> Debug for Patch<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Patch").field(&self.fields).finish()
    }
}

impl<D: Dto> Patch<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Explicit `null`; see [`NullPolicy`].
    pub fn set_null(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), Value::Null);
        self
    }

    /// From a JSON object as received on the wire.
    pub fn from_json(value: Value) -> Result<Self, ValidationErrors> {
        match value {
            Value::Object(fields) => Ok(Self {
                fields,
                _dto: PhantomData,
            }),
            other => Err(ValidationErrors::single("$", "object", other)),
        }
    }

    /// From any serializable struct, typically one with all-optional fields and
    /// `#[serde(skip_serializing_if = "Option::is_none")]`.
    pub fn from_partial<P: Serialize>(partial: &P) -> Result<Self, ValidationErrors> {
        Ok(Self {
            fields: to_fields(partial)?,
            _dto: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Separates relation fields from the entity's own fields.
    pub(crate) fn split_relations(mut self, relations: &[Relation]) -> (Self, Fields) {
        let nested = split_relations(relations, &mut self.fields);
        (self, nested)
    }

    /// Coerces and checks the present fields against `schema`.
    ///
    /// Rejects undeclared and read-only fields. Under [`NullPolicy::Ignore`]
    /// explicit nulls are dropped before anything else looks at them.
    pub fn resolve(&self, schema: &DtoSchema, policy: NullPolicy) -> Result<Fields, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let mut resolved = Fields::new();

        for (key, value) in schema.coerce(self.fields.clone()) {
            if value.is_null() && policy == NullPolicy::Ignore {
                continue;
            }
            match schema.get(&key) {
                None if schema.allows_unknown() => {}
                None => {
                    errors.push(&key, "unknown_field", value);
                    continue;
                }
                Some(spec) if spec.read_only => {
                    errors.push(&key, "read_only", value);
                    continue;
                }
                Some(spec) if value.is_object() && spec.ty == FieldType::Object => {}
                Some(spec) => spec.check(&key, &value, &mut errors),
            }
            resolved.insert(key, value);
        }

        errors.into_result()?;
        Ok(resolved)
    }
}
