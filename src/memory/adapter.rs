use super::eval::{self, Matcher};
use super::{MemoryDatabase, MemorySession};
use crate::entity::{key_values, Entity, EntityAdapter, Fields};
use crate::error::{RepositoryError, RepositoryResult, ValidationErrors};
use crate::query::QuerySpec;
use crate::session::ScopeHandle;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

type IdFn<Id> = Arc<dyn Fn(u64) -> Id + Send + Sync>;

/// [`EntityAdapter`] over a [`MemoryDatabase`].
///
/// Without a sequence every entity must arrive with its identity set, which
/// is how composite keys are handled.
pub struct MemoryAdapter<E: Entity> {
    db: MemoryDatabase,
    next_id: Option<IdFn<E::Id>>,
}

impl<E: Entity> Clone for MemoryAdapter<E> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<E: Entity> MemoryAdapter<E> {
    pub fn new(db: MemoryDatabase) -> Self {
        Self { db, next_id: None }
    }

    /// Assigns identities to new entities from the table's sequence.
    pub fn with_sequence<F>(mut self, next_id: F) -> Self
    where
        F: Fn(u64) -> E::Id + Send + Sync + 'static,
    {
        self.next_id = Some(Arc::new(next_id));
        self
    }

    /// Adds a unique constraint over `columns`.
    pub fn with_unique(self, columns: &[&'static str]) -> Self {
        self.db.register_unique(E::TABLE, columns);
        self
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    fn query(session: &mut MemorySession, spec: &QuerySpec) -> RepositoryResult<Vec<Fields>> {
        spec.validate()?;
        let matcher = Matcher::new(spec.filters())?;
        let mut rows: Vec<Fields> = session
            .scan(E::TABLE)?
            .into_iter()
            .filter(|row| matcher.matches(row))
            .collect();
        eval::sort(&mut rows, spec.order(), E::PRIMARY_KEY);
        Ok(eval::paginate(rows, spec.page(), E::PRIMARY_KEY))
    }
}

/// Storage key of an identity, in the same form [`row_key`] derives from a row.
pub(crate) fn id_key<E: Entity>(id: &E::Id) -> RepositoryResult<String> {
    let mut values = key_values::<E>(id)?;
    let key = if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    };
    Ok(key.to_string())
}

/// Storage key of a row, derived the same way an `Id` serializes.
fn row_key<E: Entity>(row: &Fields) -> Result<String, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    for column in E::PRIMARY_KEY {
        if row.get(*column).map_or(true, Value::is_null) {
            errors.push(*column, "required", Value::Null);
        }
    }
    errors.into_result()?;
    Ok(eval::identity(row, E::PRIMARY_KEY).to_string())
}

fn rebuild<E: Entity>(row: Fields) -> RepositoryResult<E> {
    E::from_fields(row).map_err(RepositoryError::from)
}

#[async_trait]
impl<E: Entity> EntityAdapter<E> for MemoryAdapter<E> {
    type Session = MemorySession;

    async fn execute(
        &self,
        scope: &ScopeHandle<MemorySession>,
        spec: &QuerySpec,
    ) -> RepositoryResult<Vec<E>> {
        let mut session = scope.session().await?;
        Self::query(&mut session, spec)?
            .into_iter()
            .map(rebuild::<E>)
            .collect()
    }

    async fn count(&self, scope: &ScopeHandle<MemorySession>, spec: &QuerySpec) -> RepositoryResult<u64> {
        let mut session = scope.session().await?;
        let rows = Self::query(&mut session, &spec.filters_only())?;
        Ok(rows.len() as u64)
    }

    async fn get(&self, scope: &ScopeHandle<MemorySession>, id: &E::Id) -> RepositoryResult<Option<E>> {
        let key = id_key::<E>(id)?;
        let mut session = scope.session().await?;
        session.fetch(E::TABLE, &key)?.map(rebuild::<E>).transpose()
    }

    async fn insert(&self, scope: &ScopeHandle<MemorySession>, mut entity: E) -> RepositoryResult<E> {
        let mut session = scope.session().await?;
        if entity.id().is_none() {
            if let Some(next_id) = &self.next_id {
                entity.assign_id(next_id(self.db.next_sequence(E::TABLE)));
            }
        }
        let row = entity.to_fields();
        let key = row_key::<E>(&row)?;
        session.insert(E::TABLE, key.clone(), row.clone())?;
        debug!(entity_type = E::TABLE, key = %key, "Row inserted");
        rebuild(row)
    }

    async fn apply_patch(
        &self,
        scope: &ScopeHandle<MemorySession>,
        entity: E,
        fields: &Fields,
    ) -> RepositoryResult<E> {
        let row = entity.to_fields();
        let key = row_key::<E>(&row)?;
        let mut session = scope.session().await?;
        session.update(E::TABLE, key.clone(), row)?;
        debug!(
            entity_type = E::TABLE,
            key = %key,
            changed = ?fields.keys().collect::<Vec<_>>(),
            "Row updated"
        );
        Ok(entity)
    }

    async fn remove(&self, scope: &ScopeHandle<MemorySession>, entity: &E) -> RepositoryResult<()> {
        let key = row_key::<E>(&entity.to_fields())?;
        let mut session = scope.session().await?;
        if !session.delete(E::TABLE, &key)? {
            return Err(RepositoryError::NotFound {
                entity: E::TABLE,
                id: key,
            });
        }
        debug!(entity_type = E::TABLE, key = %key, "Row deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Direction, Operator};
    use crate::session::UnitOfWork;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: Option<i64>,
        sku: String,
        qty: i64,
    }

    impl Entity for Item {
        type Id = i64;
        const TABLE: &'static str = "items";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];
        const COLUMNS: &'static [&'static str] = &["id", "sku", "qty"];

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn assign_id(&mut self, id: i64) {
            self.id = Some(id);
        }
    }

    fn item(sku: &str, qty: i64) -> Item {
        Item {
            id: None,
            sku: sku.into(),
            qty,
        }
    }

    fn setup() -> (MemoryDatabase, MemoryAdapter<Item>, UnitOfWork<MemorySession>) {
        let db = MemoryDatabase::new();
        let adapter = MemoryAdapter::<Item>::new(db.clone())
            .with_sequence(|n| n as i64)
            .with_unique(&["sku"]);
        (db.clone(), adapter, UnitOfWork::new(db))
    }

    #[tokio::test]
    async fn test_insert_assigns_sequence_ids() {
        let (db, adapter, uow) = setup();
        let (a, b) = uow
            .run(|scope| async move {
                let a = adapter.insert(&scope, item("a", 1)).await?;
                let b = adapter.insert(&scope, item("b", 2)).await?;
                Ok((a, b))
            })
            .await
            .unwrap();

        assert_eq!(a.id, Some(1));
        assert_eq!(b.id, Some(2));
        assert_eq!(db.row_count("items"), 2);
    }

    #[tokio::test]
    async fn test_unique_violation_is_conflict() {
        let (db, adapter, uow) = setup();
        let err = uow
            .run(|scope| async move {
                adapter.insert(&scope, item("dup", 1)).await?;
                adapter.insert(&scope, item("dup", 2)).await
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RepositoryError::Conflict { entity: "items", .. }));
        assert_eq!(db.row_count("items"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_insert_conflicts_at_commit() {
        let (db, adapter, uow) = setup();

        let first = uow.begin().await.unwrap();
        let second = uow.begin().await.unwrap();
        let mut explicit = item("x", 1);
        explicit.id = Some(10);
        adapter.insert(&first.handle(), explicit.clone()).await.unwrap();
        explicit.sku = "y".into();
        adapter.insert(&second.handle(), explicit).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { .. }));
        assert_eq!(db.rows("items")[0]["sku"], "x");
    }

    #[tokio::test]
    async fn test_update_of_concurrently_deleted_row_conflicts() {
        let (db, adapter, uow) = setup();
        let stored = uow
            .run(|scope| {
                let adapter = adapter.clone();
                async move { adapter.insert(&scope, item("gone", 1)).await }
            })
            .await
            .unwrap();

        let updater = uow.begin().await.unwrap();
        let deleter = uow.begin().await.unwrap();
        let mut changed = stored.clone();
        changed.qty = 5;
        let fields = changed.to_fields();
        adapter.apply_patch(&updater.handle(), changed, &fields).await.unwrap();
        adapter.remove(&deleter.handle(), &stored).await.unwrap();

        deleter.commit().await.unwrap();
        let err = updater.commit().await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { entity: "items", .. }));
        assert_eq!(db.row_count("items"), 0);
    }

    #[tokio::test]
    async fn test_savepoint_rollback_restores_writes() {
        let (db, adapter, uow) = setup();
        let adapter = Arc::new(adapter);
        let inner_adapter = adapter.clone();

        uow.run(|scope| async move {
            adapter.insert(&scope, item("kept", 1)).await?;
            let nested = scope
                .run(|inner| async move {
                    inner_adapter.insert(&inner, item("dropped", 1)).await?;
                    Err::<(), _>(RepositoryError::Backend("nested failure".into()))
                })
                .await;
            assert!(nested.is_err());
            Ok(())
        })
        .await
        .unwrap();

        let rows = db.rows("items");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["sku"], "kept");
    }

    #[tokio::test]
    async fn test_execute_and_count() {
        let (_db, adapter, uow) = setup();
        let adapter = Arc::new(adapter);
        let writer = adapter.clone();
        uow.run(|scope| async move {
            for (sku, qty) in [("a", 5), ("b", 1), ("c", 3), ("d", 3)] {
                writer.insert(&scope, item(sku, qty)).await?;
            }
            Ok(())
        })
        .await
        .unwrap();

        let spec = QuerySpec::new()
            .filter("qty", Operator::Ge, 3)
            .order_by("qty", Direction::Asc)
            .paginate(0, 2)
            .unwrap();
        let (rows, total) = uow
            .run(|scope| async move {
                let rows = adapter.execute(&scope, &spec).await?;
                let total = adapter.count(&scope, &spec).await?;
                Ok((rows, total))
            })
            .await
            .unwrap();

        let skus: Vec<&str> = rows.iter().map(|i| i.sku.as_str()).collect();
        assert_eq!(skus, vec!["c", "d"]);
        assert_eq!(total, 3);
    }
}
