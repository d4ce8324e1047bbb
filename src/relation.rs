//! # Relationships
//!
//! An entity declares the relations it owns in [`Entity::RELATIONS`]: the DTO
//! field carrying the related data, whether it holds one row or many, and the
//! parent columns the related rows reference. Related rows are ordinary
//! entities in their own tables. They are written through their own adapter,
//! registered on the parent's repository as a [`RelatedAdapter`], which can
//! register relations of its own. Nesting goes as deep as the model does.
//!
//! | Operation | Relation field |
//! |-----------|----------------|
//! | create | each nested object is inserted after its parent, join columns copied from it |
//! | update, one | `null` removes the related row, an object patches it (or inserts it when there is none) |
//! | update, many | items carrying the key of a current row patch it, other items are inserted, current rows left out are removed |
//! | delete | related rows are removed first ([`OnDelete::Cascade`]) or block the delete ([`OnDelete::Restrict`]) |
//! | read | loaded only for the paths named with [`QuerySpec::load`] |
//!
//! Everything runs in the scope of the operation that touched the parent, so a
//! failing child rolls back the parent as well.

use crate::dto::{merge_fields, DtoSchema};
use crate::entity::{Entity, EntityAdapter, Fields};
use crate::error::{RepositoryError, RepositoryResult, ValidationErrors};
use crate::query::{Filter, Operator, QuerySpec};
use crate::session::{ScopeHandle, Session};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one related row.
    One,
    /// Any number of related rows.
    Many,
}

/// What deleting a parent does to its related rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    /// The parent cannot be deleted while related rows exist.
    Restrict,
}

/// A relation owned by an entity.
///
/// ```
/// use ormrepo::relation::{Cardinality, OnDelete, Relation};
///
/// const LINES: Relation = Relation::many("lines", &[("id", "order_id")]);
/// const INVOICE: Relation = Relation::one("invoice", &[("id", "order_id")]).restrict();
///
/// assert_eq!(LINES.cardinality, Cardinality::Many);
/// assert_eq!(INVOICE.on_delete, OnDelete::Restrict);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    /// DTO field carrying the related data; also the load path segment.
    pub name: &'static str,
    pub cardinality: Cardinality,
    /// `(parent column, related column)` pairs.
    pub join: &'static [(&'static str, &'static str)],
    pub on_delete: OnDelete,
}

impl Relation {
    pub const fn one(name: &'static str, join: &'static [(&'static str, &'static str)]) -> Self {
        Self {
            name,
            cardinality: Cardinality::One,
            join,
            on_delete: OnDelete::Cascade,
        }
    }

    pub const fn many(name: &'static str, join: &'static [(&'static str, &'static str)]) -> Self {
        Self {
            name,
            cardinality: Cardinality::Many,
            join,
            on_delete: OnDelete::Cascade,
        }
    }

    pub const fn restrict(self) -> Self {
        Self {
            on_delete: OnDelete::Restrict,
            ..self
        }
    }

    /// Filters selecting the rows related to `parent`.
    pub fn join_spec(&self, parent: &Fields) -> QuerySpec {
        self.join
            .iter()
            .fold(QuerySpec::new(), |spec, (parent_column, column)| {
                spec.filter(*column, Operator::Eq, join_value(parent, parent_column))
            })
    }

    /// Points `child` at `parent`, replacing whatever join values it carried.
    fn attach(&self, parent: &Fields, child: &mut Fields) {
        for (parent_column, column) in self.join {
            child.insert(column.to_string(), join_value(parent, parent_column));
        }
    }
}

fn join_value(parent: &Fields, column: &str) -> Value {
    parent.get(column).cloned().unwrap_or(Value::Null)
}

/// Removes the relation fields from `fields` and returns them.
pub fn split_relations(relations: &[Relation], fields: &mut Fields) -> Fields {
    relations
        .iter()
        .filter_map(|r| fields.remove(r.name).map(|value| (r.name.to_string(), value)))
        .collect()
}

fn declared<'r>(owner: &str, relations: &'r [Relation], name: &str) -> RepositoryResult<&'r Relation> {
    relations.iter().find(|r| r.name == name).ok_or_else(|| {
        RepositoryError::InvalidSpecification(format!("{owner} has no relation '{name}'"))
    })
}

fn shape_error(relation: &Relation, index: Option<usize>, value: Value) -> RepositoryError {
    let (path, rule) = match (relation.cardinality, index) {
        (_, Some(i)) => (format!("{}[{i}]", relation.name), "object"),
        (Cardinality::One, None) => (relation.name.to_string(), "object"),
        (Cardinality::Many, None) => (relation.name.to_string(), "array"),
    };
    ValidationErrors::single(path, rule, value).into()
}

/// Key column values of a row, or `None` if any is missing.
fn key_of(row: &Fields, primary_key: &[&str]) -> Option<Vec<Value>> {
    primary_key
        .iter()
        .map(|c| row.get(*c).filter(|v| !v.is_null()).cloned())
        .collect()
}

/// Relations to load on a read, each with the filters its rows must pass.
/// Built from the load paths and relation filters of a [`QuerySpec`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadPlan {
    filters: Vec<Filter>,
    relations: BTreeMap<String, LoadPlan>,
}

impl LoadPlan {
    pub fn from_spec(spec: &QuerySpec) -> Self {
        let mut plan = Self::default();
        for path in spec.loads() {
            plan.node(path);
        }
        for (path, filters) in spec.relation_filters() {
            plan.node(path).filters.extend(filters.iter().cloned());
        }
        plan
    }

    fn node(&mut self, path: &str) -> &mut LoadPlan {
        let mut node = self;
        for segment in path.split('.') {
            node = node.relations.entry(segment.to_string()).or_default();
        }
        node
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &LoadPlan)> {
        self.relations.iter().map(|(name, plan)| (name.as_str(), plan))
    }

    fn spec(&self, relation: &Relation, parent: &Fields) -> QuerySpec {
        self.filters.iter().fold(relation.join_spec(parent), |spec, f| {
            spec.filter(f.field.clone(), f.op, f.value.clone())
        })
    }
}

/// Type-erased access to the rows of one related entity.
///
/// Rows cross this boundary as [`Fields`], so a parent repository can hold
/// stores for entities of any type. Every method handles the store's own
/// relations before returning.
#[async_trait]
pub trait RelatedStore<S: Session>: Send + Sync + 'static {
    fn table(&self) -> &'static str;

    fn primary_key(&self) -> &'static [&'static str];

    /// Relations the related entity owns in turn.
    fn relations(&self) -> &'static [Relation];

    fn nested(&self) -> &RelationSet<S>;

    /// Rows matching `spec`, each with the relations in `plan` loaded.
    async fn find(
        &self,
        scope: &ScopeHandle<S>,
        spec: &QuerySpec,
        plan: &LoadPlan,
    ) -> RepositoryResult<Vec<Fields>>;

    async fn insert(&self, scope: &ScopeHandle<S>, fields: Fields) -> RepositoryResult<Fields>;

    /// Merges `changes` into `current` and persists the result.
    async fn update(
        &self,
        scope: &ScopeHandle<S>,
        current: Fields,
        changes: Fields,
    ) -> RepositoryResult<Fields>;

    async fn remove(&self, scope: &ScopeHandle<S>, row: &Fields) -> RepositoryResult<()>;
}

/// Stores registered for the relations of one entity, by relation name.
pub struct RelationSet<S: Session> {
    stores: BTreeMap<&'static str, Arc<dyn RelatedStore<S>>>,
}

impl<S: Session> Clone for RelationSet<S> {
    fn clone(&self) -> Self {
        Self {
            stores: self.stores.clone(),
        }
    }
}

impl<S: Session> Default for RelationSet<S> {
    fn default() -> Self {
        Self {
            stores: BTreeMap::new(),
        }
    }
}

impl<S: Session> RelationSet<S> {
    /// Registers `store` for the relation `name`, which `relations` must declare.
    pub fn register(
        &mut self,
        owner: &'static str,
        relations: &'static [Relation],
        name: &str,
        store: Arc<dyn RelatedStore<S>>,
    ) -> RepositoryResult<()> {
        let relation = relations.iter().find(|r| r.name == name).ok_or_else(|| {
            RepositoryError::Config(format!("{owner} declares no relation '{name}'"))
        })?;
        debug!(entity_type = owner, relation = relation.name, related = store.table(), "Relation registered");
        self.stores.insert(relation.name, store);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    fn store(&self, owner: &str, relation: &Relation) -> RepositoryResult<&dyn RelatedStore<S>> {
        self.stores
            .get(relation.name)
            .map(|store| store.as_ref())
            .ok_or_else(|| {
                RepositoryError::Config(format!("{owner}.{} has no registered store", relation.name))
            })
    }

    /// Rejects load paths naming undeclared or unregistered relations.
    pub fn check(&self, owner: &str, relations: &[Relation], plan: &LoadPlan) -> RepositoryResult<()> {
        for (name, nested) in plan.relations() {
            let relation = declared(owner, relations, name)?;
            let store = self.store(owner, relation)?;
            store.nested().check(store.table(), store.relations(), nested)?;
        }
        Ok(())
    }

    /// Related rows of `parent` for every relation in `plan`, by relation name.
    pub async fn load(
        &self,
        scope: &ScopeHandle<S>,
        owner: &str,
        relations: &[Relation],
        parent: &Fields,
        plan: &LoadPlan,
    ) -> RepositoryResult<Fields> {
        let mut loaded = Fields::new();
        for (name, nested) in plan.relations() {
            let relation = declared(owner, relations, name)?;
            let store = self.store(owner, relation)?;
            let rows = store.find(scope, &nested.spec(relation, parent), nested).await?;
            let value = match relation.cardinality {
                Cardinality::One => rows.into_iter().next().map_or(Value::Null, Value::Object),
                Cardinality::Many => Value::Array(rows.into_iter().map(Value::Object).collect()),
            };
            loaded.insert(name.to_string(), value);
        }
        Ok(loaded)
    }

    /// Inserts the related rows in `nested` under `parent`. `null` relation
    /// values insert nothing.
    pub async fn create(
        &self,
        scope: &ScopeHandle<S>,
        owner: &str,
        relations: &[Relation],
        parent: &Fields,
        nested: Fields,
    ) -> RepositoryResult<Fields> {
        let mut created = Fields::new();
        for (name, value) in nested {
            let relation = declared(owner, relations, &name)?;
            let store = self.store(owner, relation)?;
            let value = match (relation.cardinality, value) {
                (_, Value::Null) => continue,
                (Cardinality::One, Value::Object(mut child)) => {
                    relation.attach(parent, &mut child);
                    Value::Object(store.insert(scope, child).await?)
                }
                (Cardinality::Many, Value::Array(items)) => {
                    let mut rows = Vec::with_capacity(items.len());
                    for (i, item) in items.into_iter().enumerate() {
                        let mut child = match item {
                            Value::Object(child) => child,
                            other => return Err(shape_error(relation, Some(i), other)),
                        };
                        relation.attach(parent, &mut child);
                        rows.push(Value::Object(store.insert(scope, child).await?));
                    }
                    Value::Array(rows)
                }
                (_, other) => return Err(shape_error(relation, None, other)),
            };
            created.insert(name, value);
        }
        Ok(created)
    }

    /// Replaces the related rows of `parent` for every relation in `changes`.
    pub async fn update(
        &self,
        scope: &ScopeHandle<S>,
        owner: &str,
        relations: &[Relation],
        parent: &Fields,
        changes: Fields,
    ) -> RepositoryResult<Fields> {
        let mut updated = Fields::new();
        for (name, value) in changes {
            let relation = declared(owner, relations, &name)?;
            let store = self.store(owner, relation)?;
            let current = store
                .find(scope, &relation.join_spec(parent), &LoadPlan::default())
                .await?;
            let value = match relation.cardinality {
                Cardinality::One => replace_one(scope, store, relation, parent, current, value).await?,
                Cardinality::Many => replace_many(scope, store, relation, parent, current, value).await?,
            };
            updated.insert(name, value);
        }
        Ok(updated)
    }

    /// Applies every relation's [`OnDelete`] rule ahead of deleting `parent`.
    pub async fn remove(
        &self,
        scope: &ScopeHandle<S>,
        owner: &'static str,
        relations: &[Relation],
        parent: &Fields,
    ) -> RepositoryResult<()> {
        for relation in relations {
            let store = self.store(owner, relation)?;
            let children = store
                .find(scope, &relation.join_spec(parent), &LoadPlan::default())
                .await?;
            if children.is_empty() {
                continue;
            }
            if relation.on_delete == OnDelete::Restrict {
                return Err(RepositoryError::Conflict {
                    entity: owner,
                    detail: format!(
                        "{} {} row(s) still reference it through '{}'",
                        children.len(),
                        store.table(),
                        relation.name
                    ),
                });
            }
            for child in &children {
                store.remove(scope, child).await?;
            }
            debug!(entity_type = owner, relation = relation.name, removed = children.len(), "Delete cascaded");
        }
        Ok(())
    }
}

async fn replace_one<S: Session>(
    scope: &ScopeHandle<S>,
    store: &dyn RelatedStore<S>,
    relation: &Relation,
    parent: &Fields,
    current: Vec<Fields>,
    value: Value,
) -> RepositoryResult<Value> {
    match (current.into_iter().next(), value) {
        (None, Value::Null) => Ok(Value::Null),
        (Some(row), Value::Null) => {
            store.remove(scope, &row).await?;
            Ok(Value::Null)
        }
        (Some(row), Value::Object(mut changes)) => {
            relation.attach(parent, &mut changes);
            Ok(Value::Object(store.update(scope, row, changes).await?))
        }
        (None, Value::Object(mut child)) => {
            relation.attach(parent, &mut child);
            Ok(Value::Object(store.insert(scope, child).await?))
        }
        (_, other) => Err(shape_error(relation, None, other)),
    }
}

async fn replace_many<S: Session>(
    scope: &ScopeHandle<S>,
    store: &dyn RelatedStore<S>,
    relation: &Relation,
    parent: &Fields,
    mut current: Vec<Fields>,
    value: Value,
) -> RepositoryResult<Value> {
    let items = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => return Err(shape_error(relation, None, other)),
    };

    let primary_key = store.primary_key();
    let mut matched = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let mut item = match item {
            Value::Object(item) => item,
            other => return Err(shape_error(relation, Some(i), other)),
        };
        relation.attach(parent, &mut item);
        let existing = key_of(&item, primary_key).and_then(|key| {
            current
                .iter()
                .position(|row| key_of(row, primary_key).as_ref() == Some(&key))
        });
        matched.push((item, existing.map(|index| current.swap_remove(index))));
    }

    // Rows left out go first, so replacements can reuse their unique values.
    for orphan in &current {
        store.remove(scope, orphan).await?;
    }

    let mut rows = Vec::with_capacity(matched.len());
    for (item, existing) in matched {
        let row = match existing {
            Some(row) => store.update(scope, row, item).await?,
            None => store.insert(scope, item).await?,
        };
        rows.push(Value::Object(row));
    }
    Ok(Value::Array(rows))
}

/// [`RelatedStore`] over a typed [`EntityAdapter`].
///
/// With a schema, related rows are coerced and checked against it before they
/// are written. Columns the schema does not declare pass through unchecked.
pub struct RelatedAdapter<C: Entity, A: EntityAdapter<C>> {
    adapter: A,
    schema: Option<DtoSchema>,
    nested: RelationSet<A::Session>,
    _entity: PhantomData<fn() -> C>,
}

impl<C: Entity, A: EntityAdapter<C>> RelatedAdapter<C, A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            schema: None,
            nested: RelationSet::default(),
            _entity: PhantomData,
        }
    }

    pub fn with_schema(mut self, schema: DtoSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Registers the store for one of `C`'s own relations.
    pub fn with_relation(
        mut self,
        name: &str,
        store: impl RelatedStore<A::Session>,
    ) -> RepositoryResult<Self> {
        self.nested.register(C::TABLE, C::RELATIONS, name, Arc::new(store))?;
        Ok(self)
    }

    fn build(&self, fields: Fields) -> Result<C, ValidationErrors> {
        let fields = match &self.schema {
            Some(schema) => {
                let fields = schema.coerce(fields);
                schema.validate(&schema.project(&fields))?;
                fields
            }
            None => fields,
        };
        C::from_fields(fields)
    }
}

#[async_trait]
impl<C, A> RelatedStore<A::Session> for RelatedAdapter<C, A>
where
    C: Entity,
    A: EntityAdapter<C>,
{
    fn table(&self) -> &'static str {
        C::TABLE
    }

    fn primary_key(&self) -> &'static [&'static str] {
        C::PRIMARY_KEY
    }

    fn relations(&self) -> &'static [Relation] {
        C::RELATIONS
    }

    fn nested(&self) -> &RelationSet<A::Session> {
        &self.nested
    }

    async fn find(
        &self,
        scope: &ScopeHandle<A::Session>,
        spec: &QuerySpec,
        plan: &LoadPlan,
    ) -> RepositoryResult<Vec<Fields>> {
        let entities = self.adapter.execute(scope, spec).await?;
        let mut rows = Vec::with_capacity(entities.len());
        for entity in entities {
            let mut row = entity.to_fields();
            if !plan.is_empty() {
                let loaded = self.nested.load(scope, C::TABLE, C::RELATIONS, &row, plan).await?;
                row.extend(loaded);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn insert(&self, scope: &ScopeHandle<A::Session>, mut fields: Fields) -> RepositoryResult<Fields> {
        let nested = split_relations(C::RELATIONS, &mut fields);
        let entity = self.adapter.insert(scope, self.build(fields)?).await?;
        debug!(entity_type = C::TABLE, scope = scope.id(), id = ?entity.id(), "Related row created");

        let mut row = entity.to_fields();
        let created = self.nested.create(scope, C::TABLE, C::RELATIONS, &row, nested).await?;
        row.extend(created);
        Ok(row)
    }

    async fn update(
        &self,
        scope: &ScopeHandle<A::Session>,
        current: Fields,
        mut changes: Fields,
    ) -> RepositoryResult<Fields> {
        let nested = split_relations(C::RELATIONS, &mut changes);
        let existing = C::from_fields(current.clone())?;
        let mut merged = current;
        merge_fields(&mut merged, &changes);
        let updated = self.build(merged)?;
        if updated.id() != existing.id() {
            let received = serde_json::to_value(updated.id()).unwrap_or(Value::Null);
            return Err(ValidationErrors::single(C::PRIMARY_KEY.join(","), "immutable", received).into());
        }

        let updated = self.adapter.apply_patch(scope, updated, &changes).await?;
        let mut row = updated.to_fields();
        if !nested.is_empty() {
            let replaced = self.nested.update(scope, C::TABLE, C::RELATIONS, &row, nested).await?;
            row.extend(replaced);
        }
        Ok(row)
    }

    async fn remove(&self, scope: &ScopeHandle<A::Session>, row: &Fields) -> RepositoryResult<()> {
        let mut own = row.clone();
        split_relations(C::RELATIONS, &mut own);
        self.nested.remove(scope, C::TABLE, C::RELATIONS, &own).await?;
        self.adapter.remove(scope, &C::from_fields(own)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ITEMS: Relation = Relation::many("items", &[("id", "cart_id"), ("region", "cart_region")]);

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_join_spec_and_attach_use_every_join_column() {
        let parent = fields(json!({ "id": 4, "region": "eu", "owner": "ann" }));
        assert_eq!(
            ITEMS.join_spec(&parent).to_string(),
            r#"filters=[cart_id = 4, cart_region = "eu"]"#
        );

        let mut child = fields(json!({ "sku": "a", "cart_id": 99 }));
        ITEMS.attach(&parent, &mut child);
        assert_eq!(Value::Object(child), json!({ "sku": "a", "cart_id": 4, "cart_region": "eu" }));
    }

    #[test]
    fn test_split_relations_takes_only_declared_fields() {
        let mut row = fields(json!({ "id": 1, "items": [], "note": "x" }));
        let related = split_relations(&[ITEMS], &mut row);
        assert_eq!(Value::Object(related), json!({ "items": [] }));
        assert_eq!(Value::Object(row), json!({ "id": 1, "note": "x" }));
    }

    #[test]
    fn test_load_plan_from_paths_and_filters() {
        let spec = QuerySpec::new()
            .load("items.discounts")
            .relation_filter("items", "qty", Operator::Gt, 0)
            .relation_filter("owner", "active", Operator::Eq, true);
        let plan = LoadPlan::from_spec(&spec);

        let names: Vec<&str> = plan.relations().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["items", "owner"]);
        let (_, items) = plan.relations().next().unwrap();
        assert_eq!(items.filters().len(), 1);
        assert_eq!(items.relations().map(|(name, _)| name).collect::<Vec<_>>(), vec!["discounts"]);
    }

    #[test]
    fn test_key_of_needs_every_column() {
        let row = fields(json!({ "a": 1, "b": null }));
        assert_eq!(key_of(&row, &["a"]), Some(vec![json!(1)]));
        assert_eq!(key_of(&row, &["a", "b"]), None);
    }
}
