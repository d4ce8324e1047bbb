//! # Query Specification
//!
//! [`QuerySpec`] is an immutable, composable description of which rows to read:
//! filter predicates, sort keys and pagination. It never touches the store; an
//! [`EntityAdapter`](crate::EntityAdapter) translates it into whatever its backend
//! executes.
//!
//! ## Composition
//!
//! [`QuerySpec::combine`] merges two specifications:
//!
//! - filters are AND-ed (duplicates collapse, so composition is associative and
//!   the filter set does not depend on operand order)
//! - sort keys are concatenated, the left side winning when both sort on a field
//! - pagination comes from the right side when it sets one
//!
//! ```
//! use ormrepo::{Direction, Operator, QuerySpec};
//!
//! let adults = QuerySpec::new().filter("age", Operator::Ge, 18);
//! let page = QuerySpec::new()
//!     .order_by("name", Direction::Asc)
//!     .paginate(0, 20)
//!     .unwrap();
//!
//! let spec = adults.combine(&page);
//! assert_eq!(spec.filters().len(), 1);
//! assert_eq!(spec.to_string(), "filters=[age >= 18] order=[name asc] page=[offset 0 limit 20]");
//! ```
//!
//! ## Relations
//!
//! [`QuerySpec::load`] names a relation path (`"lines"`, `"lines.gift"`) whose
//! rows are attached to each result, and [`QuerySpec::relation_filter`] limits
//! which related rows are attached. Neither changes which parent rows match.
//! Both union under `combine`. Adapters never see them; the repository strips
//! them with [`QuerySpec::without_relations`] before executing.

use crate::error::{RepositoryError, RepositoryResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// Field value is one of the values in an array operand.
    In,
    NotIn,
    IsNull,
    IsNotNull,
    /// SQL `LIKE`: `%` matches any run of characters, `_` exactly one.
    Like,
}

impl Operator {
    /// Operators that ignore their operand.
    pub fn is_unary(self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::IsNull => "is null",
            Operator::IsNotNull => "is not null",
            Operator::Like => "like",
        }
    }
}

/// One predicate: `field <op> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Column name; dotted paths address nested object values.
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

impl Filter {
    /// Unary operators get a `null` operand whatever was passed.
    pub fn new(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: if op.is_unary() { Value::Null } else { value.into() },
        }
    }

    fn check(&self) -> RepositoryResult<()> {
        if self.field.trim().is_empty() {
            return Err(RepositoryError::InvalidSpecification(
                "filter field must not be empty".into(),
            ));
        }
        match self.op {
            Operator::In | Operator::NotIn if !self.value.is_array() => {
                Err(RepositoryError::InvalidSpecification(format!(
                    "operator '{}' on '{}' needs an array operand, got {}",
                    self.op.symbol(),
                    self.field,
                    self.value
                )))
            }
            Operator::Like if !self.value.is_string() => {
                Err(RepositoryError::InvalidSpecification(format!(
                    "operator 'like' on '{}' needs a string pattern, got {}",
                    self.field, self.value
                )))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op.is_unary() {
            write!(f, "{} {}", self.field, self.op.symbol())
        } else {
            write!(f, "{} {} {}", self.field, self.op.symbol(), self.value)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

/// Which slice of the ordered result to return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    /// Skip `offset` rows, then return at most `limit`.
    Offset { offset: u64, limit: u64 },
    /// Rows following the row whose identity equals `cursor`, at most `limit`.
    After { cursor: Value, limit: u64 },
}

impl Page {
    pub fn limit(&self) -> u64 {
        match self {
            Page::Offset { limit, .. } | Page::After { limit, .. } => *limit,
        }
    }
}

/// Filter, sort and pagination criteria for a read, plus the relations to load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySpec {
    filters: Vec<Filter>,
    order: Vec<SortKey>,
    page: Option<Page>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    load: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    relation_filters: BTreeMap<String, Vec<Filter>>,
}

impl QuerySpec {
    /// An empty specification: every row, store order.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        let filter = Filter::new(field, op, value);
        if !self.filters.contains(&filter) {
            self.filters.push(filter);
        }
        self
    }

    /// Appends a sort key. A field already sorted on keeps its first direction.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        let field = field.into();
        if !self.order.iter().any(|k| k.field == field) {
            self.order.push(SortKey { field, direction });
        }
        self
    }

    /// Offset/limit pagination. `limit` must be positive, `offset` non-negative.
    pub fn paginate(mut self, offset: i64, limit: i64) -> RepositoryResult<Self> {
        if limit <= 0 {
            return Err(RepositoryError::InvalidSpecification(format!(
                "limit must be > 0, got {limit}"
            )));
        }
        if offset < 0 {
            return Err(RepositoryError::InvalidSpecification(format!(
                "offset must be >= 0, got {offset}"
            )));
        }
        self.page = Some(Page::Offset {
            offset: offset as u64,
            limit: limit as u64,
        });
        Ok(self)
    }

    /// Cursor pagination: continue after the row identified by `cursor`.
    pub fn after(mut self, cursor: impl Into<Value>, limit: i64) -> RepositoryResult<Self> {
        if limit <= 0 {
            return Err(RepositoryError::InvalidSpecification(format!(
                "limit must be > 0, got {limit}"
            )));
        }
        self.page = Some(Page::After {
            cursor: cursor.into(),
            limit: limit as u64,
        });
        Ok(self)
    }

    /// Replaces the pagination. The limit is checked by [`validate`](Self::validate).
    pub fn with_page(mut self, page: Page) -> Self {
        self.page = Some(page);
        self
    }

    pub fn without_page(mut self) -> Self {
        self.page = None;
        self
    }

    /// Loads the relation at `path` (dot-separated) into every result.
    pub fn load(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if !self.load.contains(&path) {
            self.load.push(path);
        }
        self
    }

    /// Loads the relation at `path`, keeping only related rows that pass
    /// `field <op> value`.
    pub fn relation_filter(
        mut self,
        path: impl Into<String>,
        field: impl Into<String>,
        op: Operator,
        value: impl Into<Value>,
    ) -> Self {
        let filter = Filter::new(field, op, value);
        let filters = self.relation_filters.entry(path.into()).or_default();
        if !filters.contains(&filter) {
            filters.push(filter);
        }
        self
    }

    /// Keeps the filters, drops sort keys, pagination and relations.
    pub fn filters_only(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            ..Self::default()
        }
    }

    /// The same query without load paths or relation filters.
    pub fn without_relations(&self) -> Self {
        Self {
            load: Vec::new(),
            relation_filters: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Logical AND of both filter sets, left-first sort keys, right-first page.
    pub fn combine(&self, other: &QuerySpec) -> QuerySpec {
        let mut combined = self.clone();
        for filter in &other.filters {
            if !combined.filters.contains(filter) {
                combined.filters.push(filter.clone());
            }
        }
        for key in &other.order {
            if !combined.order.iter().any(|k| k.field == key.field) {
                combined.order.push(key.clone());
            }
        }
        if other.page.is_some() {
            combined.page = other.page.clone();
        }
        for path in &other.load {
            if !combined.load.contains(path) {
                combined.load.push(path.clone());
            }
        }
        for (path, filters) in &other.relation_filters {
            let merged = combined.relation_filters.entry(path.clone()).or_default();
            for filter in filters {
                if !merged.contains(filter) {
                    merged.push(filter.clone());
                }
            }
        }
        combined
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn order(&self) -> &[SortKey] {
        &self.order
    }

    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    pub fn loads(&self) -> &[String] {
        &self.load
    }

    pub fn relation_filters(&self) -> &BTreeMap<String, Vec<Filter>> {
        &self.relation_filters
    }

    pub fn is_unfiltered(&self) -> bool {
        self.filters.is_empty()
    }

    /// Same filters, regardless of the order they were added in.
    pub fn same_filters(&self, other: &QuerySpec) -> bool {
        self.filters.len() == other.filters.len()
            && self.filters.iter().all(|f| other.filters.contains(f))
    }

    /// Rejects operands that no adapter could execute.
    pub fn validate(&self) -> RepositoryResult<()> {
        for filter in &self.filters {
            filter.check()?;
        }
        let paths = self.load.iter().chain(self.relation_filters.keys());
        for path in paths {
            if path.split('.').any(|segment| segment.trim().is_empty()) {
                return Err(RepositoryError::InvalidSpecification(format!(
                    "relation path '{path}' has an empty segment"
                )));
            }
        }
        for filter in self.relation_filters.values().flatten() {
            filter.check()?;
        }
        if let Some(page) = &self.page {
            if page.limit() == 0 {
                return Err(RepositoryError::InvalidSpecification(
                    "limit must be > 0, got 0".into(),
                ));
            }
        }
        if let Some(key) = self.order.iter().find(|k| k.field.trim().is_empty()) {
            return Err(RepositoryError::InvalidSpecification(format!(
                "sort field must not be empty ({:?})",
                key.direction
            )));
        }
        Ok(())
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filters: Vec<String> = self.filters.iter().map(|x| x.to_string()).collect();
        write!(f, "filters=[{}]", filters.join(", "))?;
        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|k| match k.direction {
                    Direction::Asc => format!("{} asc", k.field),
                    Direction::Desc => format!("{} desc", k.field),
                })
                .collect();
            write!(f, " order=[{}]", order.join(", "))?;
        }
        match &self.page {
            Some(Page::Offset { offset, limit }) => {
                write!(f, " page=[offset {offset} limit {limit}]")?
            }
            Some(Page::After { cursor, limit }) => {
                write!(f, " page=[after {cursor} limit {limit}]")?
            }
            None => {}
        }
        if !self.load.is_empty() {
            write!(f, " load=[{}]", self.load.join(", "))?;
        }
        if !self.relation_filters.is_empty() {
            let related: Vec<String> = self
                .relation_filters
                .iter()
                .flat_map(|(path, filters)| filters.iter().map(move |x| format!("{path}: {x}")))
                .collect();
            write!(f, " related=[{}]", related.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_paginate_rejects_non_positive_limit() {
        for limit in [0, -1] {
            let err = QuerySpec::new().paginate(0, limit).unwrap_err();
            assert!(matches!(err, RepositoryError::InvalidSpecification(_)));
        }
        assert!(QuerySpec::new().paginate(-1, 10).is_err());
        assert!(QuerySpec::new().after(3, 0).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limit_however_set() {
        let spec = QuerySpec::new().with_page(Page::Offset { offset: 0, limit: 0 });
        assert!(matches!(spec.validate(), Err(RepositoryError::InvalidSpecification(_))));

        let spec = QuerySpec::new().with_page(Page::After { cursor: json!(1), limit: 0 });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_combine_rules() {
        let left = QuerySpec::new()
            .filter("age", Operator::Ge, 18)
            .order_by("name", Direction::Asc)
            .paginate(0, 10)
            .unwrap();
        let right = QuerySpec::new()
            .filter("active", Operator::Eq, true)
            .order_by("name", Direction::Desc)
            .order_by("age", Direction::Desc)
            .paginate(20, 5)
            .unwrap();

        let combined = left.combine(&right);
        assert_eq!(combined.filters().len(), 2);
        assert_eq!(
            combined.order(),
            &[
                SortKey { field: "name".into(), direction: Direction::Asc },
                SortKey { field: "age".into(), direction: Direction::Desc },
            ]
        );
        assert_eq!(combined.page(), Some(&Page::Offset { offset: 20, limit: 5 }));

        // Left pagination survives when the right side sets none.
        let kept = left.combine(&QuerySpec::new().filter("x", Operator::IsNull, Value::Null));
        assert_eq!(kept.page(), Some(&Page::Offset { offset: 0, limit: 10 }));
    }

    #[test]
    fn test_combine_is_associative() {
        let a = QuerySpec::new().filter("a", Operator::Eq, 1).order_by("a", Direction::Asc);
        let b = QuerySpec::new()
            .filter("b", Operator::In, json!([1, 2]))
            .filter("a", Operator::Eq, 1)
            .order_by("b", Direction::Desc);
        let c = QuerySpec::new()
            .filter("c", Operator::IsNotNull, Value::Null)
            .order_by("a", Direction::Desc)
            .paginate(1, 2)
            .unwrap();

        let left = a.combine(&b).combine(&c);
        let right = a.combine(&b.combine(&c));
        assert_eq!(left, right);
        assert!(a.combine(&b).same_filters(&b.combine(&a)));
    }

    #[test]
    fn test_validate_operands() {
        assert!(QuerySpec::new().filter("id", Operator::In, 3).validate().is_err());
        assert!(QuerySpec::new().filter("name", Operator::Like, 3).validate().is_err());
        assert!(QuerySpec::new().filter("", Operator::Eq, 3).validate().is_err());
        assert!(QuerySpec::new()
            .filter("id", Operator::In, json!([1, 2]))
            .filter("name", Operator::Like, "A%")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_relations_union_under_combine() {
        let a = QuerySpec::new()
            .load("lines")
            .relation_filter("lines", "qty", Operator::Gt, 0);
        let b = QuerySpec::new()
            .load("lines")
            .load("lines.gift")
            .relation_filter("lines", "qty", Operator::Gt, 0)
            .relation_filter("lines", "sku", Operator::Like, "A%");

        let combined = a.combine(&b);
        assert_eq!(combined.loads(), &["lines".to_string(), "lines.gift".to_string()]);
        assert_eq!(combined.relation_filters()["lines"].len(), 2);
        assert_eq!(
            combined.to_string(),
            "filters=[] load=[lines, lines.gift] related=[lines: qty > 0, lines: sku like \"A%\"]"
        );

        let bare = combined.without_relations();
        assert!(bare.loads().is_empty());
        assert!(bare.relation_filters().is_empty());
        assert!(combined.filters_only().loads().is_empty());
    }

    #[test]
    fn test_validate_relation_paths_and_operands() {
        assert!(QuerySpec::new().load("lines..gift").validate().is_err());
        assert!(QuerySpec::new().load("").validate().is_err());
        assert!(QuerySpec::new()
            .relation_filter("lines", "qty", Operator::In, 3)
            .validate()
            .is_err());
        assert!(QuerySpec::new().load("lines.gift").validate().is_ok());
    }

    #[test]
    fn test_unary_operators_drop_operand() {
        let spec = QuerySpec::new().filter("email", Operator::IsNull, 42);
        assert_eq!(spec.filters()[0].value, Value::Null);
        assert_eq!(spec.to_string(), "filters=[email is null]");
    }
}
