//! # RepositoryClient Trait
//!
//! Domain services usually wrap a [`Repository`] and add their own operations on
//! top. This trait gives such a wrapper the standard reads and deletes for free,
//! with errors mapped into the service's own error type.
use crate::dto::{Dto, DtoMapper};
use crate::entity::{Entity, EntityAdapter};
use crate::error::RepositoryError;
use crate::query::QuerySpec;
use crate::repository::Repository;
use async_trait::async_trait;

/// Trait for entity-specific services to inherit standard repository operations.
///
/// # Example
///
/// ```rust
/// use ormrepo::memory::{MemoryAdapter, MemoryDatabase};
/// use ormrepo::{
///     DtoSchema, Entity, FieldSpec, FieldType, Repository, RepositoryClient, RepositoryError,
///     SchemaMapper, UnitOfWork,
/// };
/// use serde::{Deserialize, Serialize};
///
/// // 1. Define Entity and DTO
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct City { id: Option<i64>, name: String }
///
/// impl Entity for City {
///     type Id = i64;
///     const TABLE: &'static str = "cities";
///     const PRIMARY_KEY: &'static [&'static str] = &["id"];
///     const COLUMNS: &'static [&'static str] = &["id", "name"];
///     fn id(&self) -> Option<i64> { self.id }
///     fn assign_id(&mut self, id: i64) { self.id = Some(id); }
/// }
/// impl From<&City> for City { fn from(c: &City) -> Self { c.clone() } }
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("city error: {0}")]
/// struct CityError(String);
///
/// // 2. Define the service wrapper
/// struct CityService {
///     repo: Repository<City, City, MemoryAdapter<City>, SchemaMapper<City, City>>,
/// }
///
/// // 3. Implement RepositoryClient
/// impl RepositoryClient<City, City> for CityService {
///     type Adapter = MemoryAdapter<City>;
///     type Mapper = SchemaMapper<City, City>;
///     type Error = CityError;
///
///     fn inner(&self) -> &Repository<City, City, Self::Adapter, Self::Mapper> {
///         &self.repo
///     }
///
///     fn map_error(e: RepositoryError) -> CityError {
///         CityError(e.to_string())
///     }
/// }
///
/// // 4. Usage
/// async fn usage(service: CityService) {
///     // get(), delete(), list() and count() are provided automatically!
///     let _ = service.get(1).await;
///     let _ = service.delete(1).await;
/// }
/// ```
#[async_trait]
pub trait RepositoryClient<E: Entity, D: Dto>: Send + Sync {
    type Adapter: EntityAdapter<E>;
    type Mapper: DtoMapper<E, D>;

    /// The service-specific error type.
    type Error: Send + Sync;

    /// Access the wrapped repository.
    fn inner(&self) -> &Repository<E, D, Self::Adapter, Self::Mapper>;

    /// Map repository errors to the service's error type.
    fn map_error(e: RepositoryError) -> Self::Error;

    /// Fetch a DTO by identity.
    #[tracing::instrument(skip(self), fields(entity_type = E::TABLE))]
    async fn get(&self, id: E::Id) -> Result<Option<D>, Self::Error> {
        tracing::debug!("Fetching by id");
        self.inner().get_by_id(&id).await.map_err(Self::map_error)
    }

    /// Fetch a DTO by identity with the relations `spec` loads.
    #[tracing::instrument(skip(self), fields(entity_type = E::TABLE))]
    async fn get_with(&self, id: E::Id, spec: QuerySpec) -> Result<Option<D>, Self::Error> {
        tracing::debug!(%spec, "Fetching by id with relations");
        self.inner().get_by_id_with(&id, &spec).await.map_err(Self::map_error)
    }

    /// Delete by identity; `false` when nothing was there.
    #[tracing::instrument(skip(self), fields(entity_type = E::TABLE))]
    async fn delete(&self, id: E::Id) -> Result<bool, Self::Error> {
        tracing::debug!("Deleting by id");
        self.inner().delete(&id).await.map_err(Self::map_error)
    }

    #[tracing::instrument(skip(self), fields(entity_type = E::TABLE))]
    async fn list(&self, spec: QuerySpec) -> Result<Vec<D>, Self::Error> {
        tracing::debug!(%spec, "Listing");
        self.inner().list(&spec).await.map_err(Self::map_error)
    }

    #[tracing::instrument(skip(self), fields(entity_type = E::TABLE))]
    async fn count(&self, spec: QuerySpec) -> Result<u64, Self::Error> {
        tracing::debug!(%spec, "Counting");
        self.inner().count(&spec).await.map_err(Self::map_error)
    }
}
