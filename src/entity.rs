//! # Entity Contract
//!
//! The [`Entity`] trait describes how a persisted record type exposes its identity
//! and fields to generic code, and [`EntityAdapter`] is the one component that
//! talks to the store on an entity's behalf.
//!
//! # Architecture Note
//! The repository logic is written *once* against these two traits. Everything a
//! repository needs to know about a concrete type (its table, its key columns,
//! how to read its fields) comes through associated items, so a `User` repository
//! and an `Invoice` repository share every line of orchestration code.
//!
//! Entities are `serde` types. The generic field view ([`Fields`]) is derived from
//! their serialized form, which keeps filtering, sorting and merging independent
//! of any concrete struct.

use crate::error::{RepositoryError, RepositoryResult, ValidationErrors};
use crate::query::QuerySpec;
use crate::relation::Relation;
use crate::session::{ScopeHandle, Session};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::hash::Hash;

/// Field name → value view of an entity, DTO or stored row.
pub type Fields = serde_json::Map<String, Value>;

/// A persisted record type.
///
/// # Example
/// ```
/// use ormrepo::Entity;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Account {
///     id: Option<i64>,
///     owner: String,
/// }
///
/// impl Entity for Account {
///     type Id = i64;
///     const TABLE: &'static str = "accounts";
///     const PRIMARY_KEY: &'static [&'static str] = &["id"];
///     const COLUMNS: &'static [&'static str] = &["id", "owner"];
///
///     fn id(&self) -> Option<i64> { self.id }
///     fn assign_id(&mut self, id: i64) { self.id = Some(id); }
/// }
///
/// let account = Account { id: Some(7), owner: "ann".into() };
/// assert_eq!(account.to_fields()["owner"], "ann");
/// ```
pub trait Entity: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Identity type. Composite keys use a tuple whose serialized form is an
    /// array aligned with [`Entity::PRIMARY_KEY`], or a struct whose fields
    /// are the key columns.
    type Id: Serialize + DeserializeOwned + Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Table (collection) name; also used as `entity_type` in logs.
    const TABLE: &'static str;

    /// Columns forming the identity, in key order.
    const PRIMARY_KEY: &'static [&'static str];

    /// Every column the entity persists.
    const COLUMNS: &'static [&'static str];

    /// Relations this entity owns. Their fields are not columns; related rows
    /// live in their own tables.
    const RELATIONS: &'static [Relation] = &[];

    /// The identity, or `None` before the store assigned one.
    fn id(&self) -> Option<Self::Id>;

    /// Sets a store-assigned identity. Called at most once per entity.
    fn assign_id(&mut self, id: Self::Id);

    /// Generic field view of this entity.
    fn to_fields(&self) -> Fields {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => fields,
            _ => Fields::new(),
        }
    }

    /// Rebuilds an entity from its field view.
    fn from_fields(fields: Fields) -> Result<Self, ValidationErrors> {
        serde_json::from_value(Value::Object(fields)).map_err(|e| {
            ValidationErrors::single(Self::TABLE, "type", Value::String(e.to_string()))
        })
    }

    fn has_column(name: &str) -> bool {
        Self::COLUMNS.contains(&name)
    }
}

/// The identity's value for each primary key column, in key order.
///
/// ```
/// use ormrepo::entity::key_values;
/// use ormrepo::Entity;
/// use serde::{Deserialize, Serialize};
/// use serde_json::json;
///
/// #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// struct SeatKey { row: String, number: i64 }
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Seat { number: i64, row: String }
///
/// impl Entity for Seat {
///     type Id = SeatKey;
///     const TABLE: &'static str = "seats";
///     const PRIMARY_KEY: &'static [&'static str] = &["number", "row"];
///     const COLUMNS: &'static [&'static str] = &["number", "row"];
///     fn id(&self) -> Option<SeatKey> {
///         Some(SeatKey { row: self.row.clone(), number: self.number })
///     }
///     fn assign_id(&mut self, id: SeatKey) { (self.row, self.number) = (id.row, id.number); }
/// }
///
/// let key = SeatKey { row: "F".into(), number: 12 };
/// assert_eq!(key_values::<Seat>(&key).unwrap(), vec![json!(12), json!("F")]);
/// ```
pub fn key_values<E: Entity>(id: &E::Id) -> RepositoryResult<Vec<Value>> {
    let value = serde_json::to_value(id)
        .map_err(|e| RepositoryError::InvalidSpecification(format!("unserializable id: {e}")))?;
    let columns = E::PRIMARY_KEY;
    match value {
        Value::Object(mut map)
            if map.len() == columns.len() && columns.iter().all(|c| map.contains_key(*c)) =>
        {
            Ok(columns.iter().filter_map(|c| map.remove(*c)).collect())
        }
        Value::Object(map) if columns.len() > 1 => Err(RepositoryError::InvalidSpecification(format!(
            "{} key columns are ({}), got ({})",
            E::TABLE,
            columns.join(", "),
            map.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
        ))),
        Value::Array(values) if columns.len() > 1 && values.len() == columns.len() => Ok(values),
        value if columns.len() == 1 => Ok(vec![value]),
        other => Err(RepositoryError::InvalidSpecification(format!(
            "{} has a composite key ({}); expected {} values, got {other}",
            E::TABLE,
            columns.join(", "),
            columns.len()
        ))),
    }
}

/// Store-facing operations for one entity type.
///
/// Every method receives the handle of the scope it runs in; implementations
/// obtain their session through [`ScopeHandle::session`], which fails with a
/// scope error once the scope has closed.
#[async_trait]
pub trait EntityAdapter<E: Entity>: Send + Sync + 'static {
    /// Session type this adapter issues its calls through.
    type Session: Session;

    /// Runs a query specification, returning rows in the specification's order.
    async fn execute(
        &self,
        scope: &ScopeHandle<Self::Session>,
        spec: &QuerySpec,
    ) -> RepositoryResult<Vec<E>>;

    /// Number of rows matching the specification's filters.
    async fn count(&self, scope: &ScopeHandle<Self::Session>, spec: &QuerySpec)
        -> RepositoryResult<u64>;

    async fn get(&self, scope: &ScopeHandle<Self::Session>, id: &E::Id)
        -> RepositoryResult<Option<E>>;

    /// Persists a new entity and returns it with its identity and defaults.
    async fn insert(&self, scope: &ScopeHandle<Self::Session>, entity: E) -> RepositoryResult<E>;

    /// Persists `entity`, whose `fields` were changed by a partial update.
    async fn apply_patch(
        &self,
        scope: &ScopeHandle<Self::Session>,
        entity: E,
        fields: &Fields,
    ) -> RepositoryResult<E>;

    async fn remove(&self, scope: &ScopeHandle<Self::Session>, entity: &E) -> RepositoryResult<()>;
}
