//! Evaluation of query specifications over field maps.
//!
//! Comparison follows SQL: anything compared with null is false, integers and
//! floats compare numerically, and ascending sorts put nulls last.

use crate::entity::Fields;
use crate::error::{RepositoryError, RepositoryResult};
use crate::query::{Direction, Filter, Operator, Page, SortKey};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// Value at a dotted path (`"address.city"`), if present.
pub(crate) fn lookup<'a>(row: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = row.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Ordering of two non-null values of comparable types.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Some(x.cmp(&y));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn sql_eq(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    match compare(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

fn like_regex(pattern: &str) -> RepositoryResult<Regex> {
    let mut expr = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| {
        RepositoryError::InvalidSpecification(format!("bad like pattern {pattern:?}: {e}"))
    })
}

/// Filters prepared once per query.
pub(crate) struct Matcher<'a> {
    filters: Vec<(&'a Filter, Option<Regex>)>,
}

impl<'a> Matcher<'a> {
    pub(crate) fn new(filters: &'a [Filter]) -> RepositoryResult<Self> {
        let filters = filters
            .iter()
            .map(|f| {
                let regex = match (&f.op, &f.value) {
                    (Operator::Like, Value::String(pattern)) => Some(like_regex(pattern)?),
                    _ => None,
                };
                Ok((f, regex))
            })
            .collect::<RepositoryResult<Vec<_>>>()?;
        Ok(Self { filters })
    }

    /// True when every filter holds. No filters match everything.
    pub(crate) fn matches(&self, row: &Fields) -> bool {
        self.filters
            .iter()
            .all(|(filter, regex)| holds(filter, regex.as_ref(), row))
    }
}

fn holds(filter: &Filter, regex: Option<&Regex>, row: &Fields) -> bool {
    let value = lookup(row, &filter.field).unwrap_or(&Value::Null);
    let operand = &filter.value;
    let ordered = |accept: fn(Ordering) -> bool| {
        !value.is_null() && !operand.is_null() && compare(value, operand).is_some_and(accept)
    };
    match filter.op {
        Operator::Eq => sql_eq(value, operand),
        Operator::Ne => !value.is_null() && !operand.is_null() && !sql_eq(value, operand),
        Operator::Gt => ordered(|o| o == Ordering::Greater),
        Operator::Ge => ordered(|o| o != Ordering::Less),
        Operator::Lt => ordered(|o| o == Ordering::Less),
        Operator::Le => ordered(|o| o != Ordering::Greater),
        Operator::In => operand
            .as_array()
            .is_some_and(|set| set.iter().any(|v| sql_eq(value, v))),
        Operator::NotIn => {
            !value.is_null()
                && operand
                    .as_array()
                    .is_some_and(|set| set.iter().all(|v| !v.is_null() && !sql_eq(value, v)))
        }
        Operator::IsNull => value.is_null(),
        Operator::IsNotNull => !value.is_null(),
        Operator::Like => match (value.as_str(), regex) {
            (Some(s), Some(re)) => re.is_match(s),
            _ => false,
        },
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}

/// Total order used for sorting: nulls after everything, mixed types by kind.
fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match compare(a, b) {
        Some(ordering) => ordering,
        None => type_rank(a)
            .cmp(&type_rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

/// Sorts rows by the given keys, breaking ties by primary key ascending.
pub(crate) fn sort(rows: &mut [Fields], order: &[SortKey], primary_key: &[&str]) {
    rows.sort_by(|a, b| {
        for key in order {
            let ordering = sort_cmp(lookup(a, &key.field), lookup(b, &key.field));
            let ordering = match key.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        primary_key
            .iter()
            .map(|column| sort_cmp(a.get(*column), b.get(*column)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

/// Identity of a row as a single value: the key column itself, or an array of
/// the key columns for composite keys.
pub(crate) fn identity(row: &Fields, primary_key: &[&str]) -> Value {
    match primary_key {
        [single] => row.get(*single).cloned().unwrap_or(Value::Null),
        columns => Value::Array(
            columns
                .iter()
                .map(|c| row.get(*c).cloned().unwrap_or(Value::Null))
                .collect(),
        ),
    }
}

/// Applies pagination to rows that are already sorted.
///
/// A cursor that identifies no row yields no rows.
pub(crate) fn paginate(rows: Vec<Fields>, page: Option<&Page>, primary_key: &[&str]) -> Vec<Fields> {
    match page {
        None => rows,
        Some(Page::Offset { offset, limit }) => rows
            .into_iter()
            .skip(*offset as usize)
            .take(*limit as usize)
            .collect(),
        Some(Page::After { cursor, limit }) => {
            match rows.iter().position(|row| identity(row, primary_key) == *cursor) {
                Some(index) => rows
                    .into_iter()
                    .skip(index + 1)
                    .take(*limit as usize)
                    .collect(),
                None => Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn filter(field: &str, op: Operator, value: Value) -> Filter {
        Filter {
            field: field.into(),
            op,
            value,
        }
    }

    #[test]
    fn test_null_never_compares() {
        let r = row(json!({ "age": null }));
        for op in [Operator::Eq, Operator::Ne, Operator::Gt, Operator::Le] {
            let f = [filter("age", op, json!(3))];
            assert!(!Matcher::new(&f).unwrap().matches(&r), "{op:?}");
        }
        let f = [filter("age", Operator::IsNull, Value::Null)];
        assert!(Matcher::new(&f).unwrap().matches(&r));
        let f = [filter("missing", Operator::IsNull, Value::Null)];
        assert!(Matcher::new(&f).unwrap().matches(&r));
    }

    #[test]
    fn test_numeric_comparison_crosses_int_and_float() {
        let r = row(json!({ "score": 2 }));
        let f = [filter("score", Operator::Eq, json!(2.0))];
        assert!(Matcher::new(&f).unwrap().matches(&r));
        let f = [filter("score", Operator::Lt, json!(2.5))];
        assert!(Matcher::new(&f).unwrap().matches(&r));
    }

    #[test]
    fn test_like_and_sets() {
        let r = row(json!({ "name": "Annabel", "tag": "b" }));
        let f = [
            filter("name", Operator::Like, json!("Ann%")),
            filter("name", Operator::Like, json!("_nnabe_")),
            filter("tag", Operator::In, json!(["a", "b"])),
            filter("tag", Operator::NotIn, json!(["c"])),
        ];
        assert!(Matcher::new(&f).unwrap().matches(&r));

        let f = [filter("name", Operator::Like, json!("ann%"))];
        assert!(!Matcher::new(&f).unwrap().matches(&r));
        let f = [filter("name", Operator::Like, json!("A.n%"))];
        assert!(!Matcher::new(&f).unwrap().matches(&r));
    }

    #[test]
    fn test_dotted_paths() {
        let r = row(json!({ "address": { "city": "Oslo" } }));
        assert_eq!(lookup(&r, "address.city"), Some(&json!("Oslo")));
        assert_eq!(lookup(&r, "address.zip"), None);
        let f = [filter("address.city", Operator::Eq, json!("Oslo"))];
        assert!(Matcher::new(&f).unwrap().matches(&r));
    }

    #[test]
    fn test_sort_nulls_last_and_tie_break() {
        let mut rows = vec![
            row(json!({ "id": 3, "age": 30 })),
            row(json!({ "id": 1, "age": null })),
            row(json!({ "id": 2, "age": 30 })),
            row(json!({ "id": 4, "age": 20 })),
        ];
        let order = [SortKey { field: "age".into(), direction: Direction::Asc }];
        sort(&mut rows, &order, &["id"]);
        let ids: Vec<Value> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(4), json!(2), json!(3), json!(1)]);

        let order = [SortKey { field: "age".into(), direction: Direction::Desc }];
        sort(&mut rows, &order, &["id"]);
        let ids: Vec<Value> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn test_cursor_pagination() {
        let rows: Vec<Fields> = (1..=5).map(|i| row(json!({ "id": i }))).collect();
        let page = Page::After { cursor: json!(2), limit: 2 };
        let ids: Vec<Value> = paginate(rows.clone(), Some(&page), &["id"])
            .iter()
            .map(|r| r["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(3), json!(4)]);

        let missing = Page::After { cursor: json!(42), limit: 2 };
        assert!(paginate(rows, Some(&missing), &["id"]).is_empty());
    }
}
