//! # Generic Repository
//!
//! [`Repository`] implements create, read, update, delete, list and count once,
//! for any entity/DTO pair, on top of an [`EntityAdapter`], a [`DtoMapper`] and a
//! [`UnitOfWork`].
//!
//! Every operation runs in exactly one scope. The plain methods open a root
//! scope of their own; the `*_in` variants join a scope the caller already holds
//! as a nested scope, so several repository calls can commit or roll back as
//! one unit:
//!
//! ```rust
//! # use ormrepo::{Entity, Repository, SchemaMapper, DtoSchema, FieldSpec, FieldType};
//! # use ormrepo::memory::{MemoryAdapter, MemoryDatabase};
//! # use ormrepo::UnitOfWork;
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! # struct Note { id: Option<i64>, text: String }
//! # impl Entity for Note {
//! #     type Id = i64;
//! #     const TABLE: &'static str = "notes";
//! #     const PRIMARY_KEY: &'static [&'static str] = &["id"];
//! #     const COLUMNS: &'static [&'static str] = &["id", "text"];
//! #     fn id(&self) -> Option<i64> { self.id }
//! #     fn assign_id(&mut self, id: i64) { self.id = Some(id); }
//! # }
//! # impl From<&Note> for Note { fn from(n: &Note) -> Self { n.clone() } }
//! # #[tokio::main]
//! # async fn main() -> ormrepo::RepositoryResult<()> {
//! let db = MemoryDatabase::new();
//! let notes = Repository::new(
//!     MemoryAdapter::<Note>::new(db.clone()).with_sequence(|n| n as i64),
//!     SchemaMapper::<Note, Note>::new(
//!         DtoSchema::new("note")
//!             .field(FieldSpec::new("id", FieldType::Integer).read_only())
//!             .field(FieldSpec::new("text", FieldType::String)),
//!     ),
//!     UnitOfWork::new(db.clone()),
//! );
//!
//! // Both notes are written, or neither is.
//! let repo = &notes;
//! notes
//!     .unit_of_work()
//!     .run(|scope| async move {
//!         repo.create_in(&scope, Note { id: None, text: "a".into() }).await?;
//!         repo.create_in(&scope, Note { id: None, text: "b".into() }).await?;
//!         Ok(())
//!     })
//!     .await?;
//! assert_eq!(db.row_count("notes"), 2);
//! # Ok(())
//! # }
//! ```

use crate::config::{NullPolicy, RepositoryConfig};
use crate::dto::{self, Dto, DtoMapper, Patch};
use crate::entity::{key_values, Entity, EntityAdapter, Fields};
use crate::error::{RepositoryError, RepositoryResult, ValidationErrors};
use crate::logging::preview;
use crate::query::{Operator, Page, QuerySpec};
use crate::relation::{split_relations, LoadPlan, RelatedStore, RelationSet};
use crate::session::{ScopeHandle, UnitOfWork};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// CRUD and query operations for one entity type `E`, exposed as DTOs `D`.
///
/// # Architecture Note
/// The repository holds no data. It owns its collaborators behind `Arc`s, so
/// clones are cheap and can be handed to as many tasks as needed; every call
/// borrows its own session through the unit of work.
///
/// **Filters**:
/// Reads, updates and deletes only ever see rows that pass the repository's
/// base filters:
///
/// * **Global filters** come from [`RepositoryConfig`] and apply to every
///   repository sharing the configuration. A global filter on a column the entity
///   does not declare is ignored for that entity.
/// * **Local filters** are set on one repository instance.
///
/// Either kind can be switched off per instance.
///
/// # Operations
///
/// * **create**: maps the DTO to an entity (validating it), inserts it and
///   returns the stored entity as a DTO, with its assigned identity.
/// * **get_by_id**: `None` when no visible row has the identity.
/// * **update**: applies a [`Patch`]. Absent fields are untouched, the merged
///   DTO is validated as a whole, and a missing row is `NotFound`.
/// * **delete**: `true` when a row was removed, `false` when there was none.
/// * **list / count**: run a [`QuerySpec`] AND-ed with the base filters. `list`
///   falls back to the configured default limit when the specification has no
///   pagination; `count` ignores pagination.
///
/// **Relations**:
/// Relation fields declared in [`Entity::RELATIONS`] are written on create and
/// update through the stores registered with
/// [`with_relation`](Self::with_relation), and loaded by `list` and
/// [`get_by_id_with`](Self::get_by_id_with) for the paths the specification
/// names. See [`relation`](crate::relation) for the rules. DTO fields carrying
/// relations must tolerate being absent (`Option`, or `#[serde(default)]`).
pub struct Repository<E, D, A, M>
where
    E: Entity,
    D: Dto,
    A: EntityAdapter<E>,
    M: DtoMapper<E, D>,
{
    adapter: Arc<A>,
    mapper: Arc<M>,
    uow: UnitOfWork<A::Session>,
    config: Arc<RepositoryConfig>,
    local_filters: Arc<Fields>,
    relations: Arc<RelationSet<A::Session>>,
    use_global_filters: bool,
    use_local_filters: bool,
    _types: PhantomData<fn() -> (E, D)>,
}

impl<E, D, A, M> Clone for Repository<E, D, A, M>
where
    E: Entity,
    D: Dto,
    A: EntityAdapter<E>,
    M: DtoMapper<E, D>,
{
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            mapper: self.mapper.clone(),
            uow: self.uow.clone(),
            config: self.config.clone(),
            local_filters: self.local_filters.clone(),
            relations: self.relations.clone(),
            use_global_filters: self.use_global_filters,
            use_local_filters: self.use_local_filters,
            _types: PhantomData,
        }
    }
}

impl<E, D, A, M> Repository<E, D, A, M>
where
    E: Entity,
    D: Dto,
    A: EntityAdapter<E>,
    M: DtoMapper<E, D>,
{
    pub fn new(adapter: A, mapper: M, uow: UnitOfWork<A::Session>) -> Self {
        Self {
            adapter: Arc::new(adapter),
            mapper: Arc::new(mapper),
            uow,
            config: Arc::new(RepositoryConfig::default()),
            local_filters: Arc::new(Fields::new()),
            relations: Arc::new(RelationSet::default()),
            use_global_filters: true,
            use_local_filters: true,
            _types: PhantomData,
        }
    }

    /// Replaces the default configuration. Fails if the configuration is invalid.
    pub fn with_config(mut self, config: RepositoryConfig) -> RepositoryResult<Self> {
        config.validate()?;
        self.config = Arc::new(config);
        Ok(self)
    }

    /// Adds an equality filter applied to every read, update and delete of this
    /// instance.
    pub fn with_local_filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.local_filters).insert(field.into(), value.into());
        self
    }

    /// Registers the store holding the rows of relation `name`. Fails when the
    /// entity declares no such relation.
    pub fn with_relation(
        mut self,
        name: &str,
        store: impl RelatedStore<A::Session>,
    ) -> RepositoryResult<Self> {
        Arc::make_mut(&mut self.relations).register(
            E::TABLE,
            E::RELATIONS,
            name,
            Arc::new(store),
        )?;
        Ok(self)
    }

    pub fn use_global_filters(mut self, enabled: bool) -> Self {
        self.use_global_filters = enabled;
        self
    }

    pub fn use_local_filters(mut self, enabled: bool) -> Self {
        self.use_local_filters = enabled;
        self
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn unit_of_work(&self) -> &UnitOfWork<A::Session> {
        &self.uow
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    // =========================================================================
    // Operations in their own unit of work
    // =========================================================================

    pub async fn create(&self, input: D) -> RepositoryResult<D> {
        self.uow
            .run(|scope| async move { self.do_create(&scope, input).await })
            .await
            .inspect_err(|e| warn!(entity_type = E::TABLE, error = %e, "Create failed"))
    }

    pub async fn get_by_id(&self, id: &E::Id) -> RepositoryResult<Option<D>> {
        self.uow
            .run(|scope| async move { self.do_get(&scope, id).await })
            .await
            .inspect_err(|e| warn!(entity_type = E::TABLE, ?id, error = %e, "Get failed"))
    }

    /// Like [`get_by_id`](Self::get_by_id), with the relations `spec` loads.
    /// The row must also pass the specification's filters; sort keys and
    /// pagination are ignored.
    pub async fn get_by_id_with(&self, id: &E::Id, spec: &QuerySpec) -> RepositoryResult<Option<D>> {
        self.uow
            .run(|scope| async move { self.do_get_with(&scope, id, spec).await })
            .await
            .inspect_err(|e| warn!(entity_type = E::TABLE, ?id, %spec, error = %e, "Get failed"))
    }

    /// Like [`get_by_id`](Self::get_by_id), but absence is `NotFound`.
    pub async fn require_by_id(&self, id: &E::Id) -> RepositoryResult<D> {
        self.get_by_id(id).await?.ok_or_else(|| not_found::<E>(id))
    }

    pub async fn list(&self, spec: &QuerySpec) -> RepositoryResult<Vec<D>> {
        self.uow
            .run(|scope| async move { self.do_list(&scope, spec).await })
            .await
            .inspect_err(|e| warn!(entity_type = E::TABLE, %spec, error = %e, "List failed"))
    }

    pub async fn count(&self, spec: &QuerySpec) -> RepositoryResult<u64> {
        self.uow
            .run(|scope| async move { self.do_count(&scope, spec).await })
            .await
            .inspect_err(|e| warn!(entity_type = E::TABLE, %spec, error = %e, "Count failed"))
    }

    pub async fn update(&self, id: &E::Id, patch: Patch<D>) -> RepositoryResult<D> {
        self.uow
            .run(|scope| async move { self.do_update(&scope, id, patch).await })
            .await
            .inspect_err(|e| warn!(entity_type = E::TABLE, ?id, error = %e, "Update failed"))
    }

    pub async fn delete(&self, id: &E::Id) -> RepositoryResult<bool> {
        self.uow
            .run(|scope| async move { self.do_delete(&scope, id).await })
            .await
            .inspect_err(|e| warn!(entity_type = E::TABLE, ?id, error = %e, "Delete failed"))
    }

    // =========================================================================
    // Operations joining a caller's scope
    // =========================================================================

    pub async fn create_in(&self, scope: &ScopeHandle<A::Session>, input: D) -> RepositoryResult<D> {
        scope
            .run(|nested| async move { self.do_create(&nested, input).await })
            .await
    }

    pub async fn get_by_id_in(
        &self,
        scope: &ScopeHandle<A::Session>,
        id: &E::Id,
    ) -> RepositoryResult<Option<D>> {
        scope
            .run(|nested| async move { self.do_get(&nested, id).await })
            .await
    }

    pub async fn get_by_id_with_in(
        &self,
        scope: &ScopeHandle<A::Session>,
        id: &E::Id,
        spec: &QuerySpec,
    ) -> RepositoryResult<Option<D>> {
        scope
            .run(|nested| async move { self.do_get_with(&nested, id, spec).await })
            .await
    }

    pub async fn require_by_id_in(&self, scope: &ScopeHandle<A::Session>, id: &E::Id) -> RepositoryResult<D> {
        self.get_by_id_in(scope, id).await?.ok_or_else(|| not_found::<E>(id))
    }

    pub async fn list_in(
        &self,
        scope: &ScopeHandle<A::Session>,
        spec: &QuerySpec,
    ) -> RepositoryResult<Vec<D>> {
        scope
            .run(|nested| async move { self.do_list(&nested, spec).await })
            .await
    }

    pub async fn count_in(&self, scope: &ScopeHandle<A::Session>, spec: &QuerySpec) -> RepositoryResult<u64> {
        scope
            .run(|nested| async move { self.do_count(&nested, spec).await })
            .await
    }

    pub async fn update_in(
        &self,
        scope: &ScopeHandle<A::Session>,
        id: &E::Id,
        patch: Patch<D>,
    ) -> RepositoryResult<D> {
        scope
            .run(|nested| async move { self.do_update(&nested, id, patch).await })
            .await
    }

    pub async fn delete_in(&self, scope: &ScopeHandle<A::Session>, id: &E::Id) -> RepositoryResult<bool> {
        scope
            .run(|nested| async move { self.do_delete(&nested, id).await })
            .await
    }

    // =========================================================================
    // Implementation
    // =========================================================================

    async fn do_create(&self, scope: &ScopeHandle<A::Session>, input: D) -> RepositoryResult<D> {
        debug!(entity_type = E::TABLE, scope = scope.id(), ?input, "Create");
        let nested = if E::RELATIONS.is_empty() {
            Fields::new()
        } else {
            split_relations(E::RELATIONS, &mut dto::to_fields(&input)?)
        };
        let entity = self.mapper.to_entity(input, None)?;
        let entity = self.adapter.insert(scope, entity).await?;
        let related = if nested.is_empty() {
            nested
        } else {
            self.relations
                .create(scope, E::TABLE, E::RELATIONS, &entity.to_fields(), nested)
                .await?
        };
        info!(
            entity_type = E::TABLE,
            scope = scope.id(),
            id = ?entity.id(),
            relations = related.len(),
            "Created"
        );
        self.with_related(self.mapper.to_dto(&entity), related)
    }

    async fn do_get(&self, scope: &ScopeHandle<A::Session>, id: &E::Id) -> RepositoryResult<Option<D>> {
        let found = self.find(scope, id).await?;
        debug!(entity_type = E::TABLE, scope = scope.id(), ?id, found = found.is_some(), "Get");
        Ok(found.map(|entity| self.mapper.to_dto(&entity)))
    }

    async fn do_get_with(
        &self,
        scope: &ScopeHandle<A::Session>,
        id: &E::Id,
        spec: &QuerySpec,
    ) -> RepositoryResult<Option<D>> {
        spec.validate()?;
        let plan = LoadPlan::from_spec(spec);
        self.relations.check(E::TABLE, E::RELATIONS, &plan)?;

        let lookup = self
            .base_spec()
            .combine(&spec.filters_only())
            .combine(&identity_spec::<E>(id)?)
            .paginate(0, 1)?;
        let Some(entity) = self.adapter.execute(scope, &lookup).await?.into_iter().next() else {
            debug!(entity_type = E::TABLE, scope = scope.id(), ?id, found = false, "Get");
            return Ok(None);
        };
        let related = self.load_related(scope, &entity, &plan).await?;
        debug!(entity_type = E::TABLE, scope = scope.id(), ?id, relations = related.len(), "Get");
        self.with_related(self.mapper.to_dto(&entity), related).map(Some)
    }

    async fn do_list(&self, scope: &ScopeHandle<A::Session>, spec: &QuerySpec) -> RepositoryResult<Vec<D>> {
        let mut effective = self.base_spec().combine(spec);
        if effective.page().is_none() {
            effective = effective.with_page(Page::Offset {
                offset: 0,
                limit: self.config.default_limit,
            });
        }
        effective.validate()?;
        let plan = LoadPlan::from_spec(&effective);
        self.relations.check(E::TABLE, E::RELATIONS, &plan)?;

        let rows = self.adapter.execute(scope, &effective.without_relations()).await?;
        let ids: Vec<Option<E::Id>> = rows.iter().map(|entity| entity.id()).collect();
        info!(entity_type = E::TABLE, scope = scope.id(), count = rows.len(), "Listed");
        debug!(entity_type = E::TABLE, spec = %effective, ids = %preview(&ids, 5), "List result");

        let mut dtos = Vec::with_capacity(rows.len());
        for entity in &rows {
            let related = self.load_related(scope, entity, &plan).await?;
            dtos.push(self.with_related(self.mapper.to_dto(entity), related)?);
        }
        Ok(dtos)
    }

    async fn do_count(&self, scope: &ScopeHandle<A::Session>, spec: &QuerySpec) -> RepositoryResult<u64> {
        let effective = self.base_spec().combine(spec).filters_only();
        effective.validate()?;
        let count = self.adapter.count(scope, &effective).await?;
        debug!(entity_type = E::TABLE, scope = scope.id(), spec = %effective, count, "Count");
        Ok(count)
    }

    async fn do_update(
        &self,
        scope: &ScopeHandle<A::Session>,
        id: &E::Id,
        patch: Patch<D>,
    ) -> RepositoryResult<D> {
        debug!(entity_type = E::TABLE, scope = scope.id(), ?id, ?patch, "Update");
        let existing = self
            .find(scope, id)
            .await?
            .ok_or_else(|| not_found::<E>(id))?;

        let (patch, mut nested) = patch.split_relations(E::RELATIONS);
        if self.config.null_policy == NullPolicy::Ignore {
            nested.retain(|_, value| !value.is_null());
        }
        let changes = patch.resolve(self.mapper.schema(), self.config.null_policy)?;
        if changes.is_empty() && nested.is_empty() {
            debug!(entity_type = E::TABLE, ?id, "Empty patch, nothing to write");
            return Ok(self.mapper.to_dto(&existing));
        }

        let updated = if changes.is_empty() {
            existing
        } else {
            let mut merged = dto::to_fields(&self.mapper.to_dto(&existing))?;
            dto::merge_fields(&mut merged, &changes);
            let input: D = dto::dto_from_fields::<E, D, M>(&*self.mapper, merged)?;
            let updated = self.mapper.to_entity(input, Some(&existing))?;
            if updated.id() != existing.id() {
                let received = serde_json::to_value(updated.id()).unwrap_or(Value::Null);
                return Err(ValidationErrors::single(E::PRIMARY_KEY.join(","), "immutable", received).into());
            }
            self.adapter.apply_patch(scope, updated, &changes).await?
        };

        let related = if nested.is_empty() {
            nested
        } else {
            self.relations
                .update(scope, E::TABLE, E::RELATIONS, &updated.to_fields(), nested)
                .await?
        };
        info!(
            entity_type = E::TABLE,
            scope = scope.id(),
            ?id,
            fields = changes.len(),
            relations = related.len(),
            "Updated"
        );
        self.with_related(self.mapper.to_dto(&updated), related)
    }

    async fn do_delete(&self, scope: &ScopeHandle<A::Session>, id: &E::Id) -> RepositoryResult<bool> {
        let Some(existing) = self.find(scope, id).await? else {
            debug!(entity_type = E::TABLE, scope = scope.id(), ?id, "Delete: nothing to remove");
            return Ok(false);
        };
        self.relations
            .remove(scope, E::TABLE, E::RELATIONS, &existing.to_fields())
            .await?;
        self.adapter.remove(scope, &existing).await?;
        info!(entity_type = E::TABLE, scope = scope.id(), ?id, "Deleted");
        Ok(true)
    }

    /// Looks up one row by identity, honouring the base filters.
    async fn find(&self, scope: &ScopeHandle<A::Session>, id: &E::Id) -> RepositoryResult<Option<E>> {
        let by_id = identity_spec::<E>(id)?;
        let base = self.base_spec();
        if base.is_unfiltered() {
            return self.adapter.get(scope, id).await;
        }
        let spec = base.combine(&by_id).paginate(0, 1)?;
        Ok(self.adapter.execute(scope, &spec).await?.into_iter().next())
    }

    async fn load_related(
        &self,
        scope: &ScopeHandle<A::Session>,
        entity: &E,
        plan: &LoadPlan,
    ) -> RepositoryResult<Fields> {
        if plan.is_empty() {
            return Ok(Fields::new());
        }
        self.relations
            .load(scope, E::TABLE, E::RELATIONS, &entity.to_fields(), plan)
            .await
    }

    /// Adds related rows to a DTO through its field view.
    fn with_related(&self, dto: D, related: Fields) -> RepositoryResult<D> {
        if related.is_empty() {
            return Ok(dto);
        }
        let mut fields = dto::to_fields(&dto)?;
        fields.extend(related);
        Ok(dto::from_fields(fields)?)
    }

    /// Equality filters every read sees: local first, then global.
    fn base_spec(&self) -> QuerySpec {
        let mut spec = QuerySpec::new();
        if self.use_local_filters {
            for (field, value) in self.local_filters.iter() {
                spec = spec.filter(field.clone(), Operator::Eq, value.clone());
            }
        }
        if self.use_global_filters {
            for (field, value) in &self.config.global_filters {
                let column = field.split('.').next().unwrap_or(field);
                if E::has_column(column) {
                    spec = spec.filter(field.clone(), Operator::Eq, value.clone());
                } else {
                    debug!(entity_type = E::TABLE, field = %field, "Global filter skipped, no such column");
                }
            }
        }
        spec
    }
}

fn not_found<E: Entity>(id: &E::Id) -> RepositoryError {
    RepositoryError::NotFound {
        entity: E::TABLE,
        id: serde_json::to_string(id).unwrap_or_else(|_| format!("{id:?}")),
    }
}

/// Filters selecting exactly the row with identity `id`. See [`key_values`].
fn identity_spec<E: Entity>(id: &E::Id) -> RepositoryResult<QuerySpec> {
    Ok(E::PRIMARY_KEY
        .iter()
        .zip(key_values::<E>(id)?)
        .fold(QuerySpec::new(), |spec, (column, value)| {
            spec.filter(*column, Operator::Eq, value)
        }))
}
