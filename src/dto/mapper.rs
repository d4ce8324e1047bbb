use super::{from_fields, merge_fields, to_fields, Dto, DtoSchema};
use crate::entity::{Entity, Fields};
use crate::error::ValidationErrors;
use crate::relation::split_relations;
use std::marker::PhantomData;

/// Converts between one entity type and one DTO type.
///
/// Declared once per pair and pure: no I/O, no session access.
pub trait DtoMapper<E: Entity, D: Dto>: Send + Sync + 'static {
    /// Rules the DTO must satisfy. Also used to check patches.
    fn schema(&self) -> &DtoSchema;

    /// Total: every persisted entity has a DTO view.
    fn to_dto(&self, entity: &E) -> D;

    /// Builds an entity from a DTO. With `existing`, fields absent from the
    /// DTO keep the existing entity's values. Relation fields
    /// ([`Entity::RELATIONS`]) are written by the repository, not here.
    fn to_entity(&self, dto: D, existing: Option<&E>) -> Result<E, ValidationErrors>;
}

/// The stock mapper: `From<&E>` for the DTO view, the schema for the way back.
///
/// `to_entity` serializes the DTO, drops relation fields, coerces and validates
/// the rest against the schema, keeps only declared fields and merges them onto the existing entity's
/// fields (recursively for nested objects) before deserializing the entity.
pub struct SchemaMapper<E, D> {
    schema: DtoSchema,
    _types: PhantomData<fn() -> (E, D)>,
}

impl<E, D> SchemaMapper<E, D> {
    pub fn new(schema: DtoSchema) -> Self {
        Self {
            schema,
            _types: PhantomData,
        }
    }
}

impl<E, D> DtoMapper<E, D> for SchemaMapper<E, D>
where
    E: Entity,
    D: Dto + for<'a> From<&'a E>,
{
    fn schema(&self) -> &DtoSchema {
        &self.schema
    }

    fn to_dto(&self, entity: &E) -> D {
        D::from(entity)
    }

    fn to_entity(&self, dto: D, existing: Option<&E>) -> Result<E, ValidationErrors> {
        let mut fields = to_fields(&dto)?;
        split_relations(E::RELATIONS, &mut fields);
        let fields = self.schema.coerce(fields);
        self.schema.validate(&fields)?;

        let mut merged = existing.map(|e| e.to_fields()).unwrap_or_default();
        merge_fields(&mut merged, &self.schema.project(&fields));
        E::from_fields(merged)
    }
}

/// Builds a DTO from a field map, validating it against the mapper's schema.
pub(crate) fn dto_from_fields<E, D, M>(mapper: &M, fields: Fields) -> Result<D, ValidationErrors>
where
    E: Entity,
    D: Dto,
    M: DtoMapper<E, D> + ?Sized,
{
    let mut fields = fields;
    split_relations(E::RELATIONS, &mut fields);
    let fields = mapper.schema().coerce(fields);
    mapper.schema().validate(&fields)?;
    from_fields(fields)
}
