use ormrepo::{Direction, Operator, Page, QuerySpec, RepositoryError};
use serde_json::json;

fn adults() -> QuerySpec {
    QuerySpec::new().filter("age", Operator::Ge, 18)
}

fn active() -> QuerySpec {
    QuerySpec::new()
        .filter("active", Operator::Eq, true)
        .order_by("name", Direction::Asc)
}

fn paged() -> QuerySpec {
    QuerySpec::new()
        .order_by("name", Direction::Desc)
        .order_by("age", Direction::Asc)
        .paginate(10, 5)
        .expect("Failed to paginate")
}

/// Combining is associative.
#[test]
fn test_combine_is_associative() {
    let left = adults().combine(&active()).combine(&paged());
    let right = adults().combine(&active().combine(&paged()));
    assert_eq!(left, right);
}

/// The filter set does not depend on operand order; sort keys and page do.
#[test]
fn test_combine_filter_set_is_commutative() {
    let ab = adults().combine(&active());
    let ba = active().combine(&adults());
    assert!(ab.same_filters(&ba));

    let sorted = active().combine(&paged());
    assert_eq!(sorted.order()[0].direction, Direction::Asc, "left sort key wins");
    assert_eq!(sorted.order().len(), 2);
    assert_eq!(sorted.page(), Some(&Page::Offset { offset: 10, limit: 5 }));

    let kept = paged().combine(&active());
    assert_eq!(kept.page(), paged().page(), "right side without a page keeps the left one");
}

/// Combining with the empty specification changes nothing.
#[test]
fn test_empty_spec_is_identity() {
    let spec = adults().combine(&paged());
    assert_eq!(QuerySpec::new().combine(&spec), spec);
    assert_eq!(spec.combine(&QuerySpec::new()), spec);
}

/// Specifications survive a trip through JSON, e.g. from a request body.
#[test]
fn test_spec_deserializes() {
    let spec: QuerySpec = serde_json::from_value(json!({
        "filters": [
            { "field": "email", "op": "is_null", "value": null },
            { "field": "role", "op": "in", "value": ["admin", "owner"] }
        ],
        "order": [{ "field": "id", "direction": "desc" }],
        "page": { "after": { "cursor": 40, "limit": 10 } }
    }))
    .expect("Failed to deserialize spec");

    assert!(spec.validate().is_ok());
    assert_eq!(
        spec.to_string(),
        r#"filters=[email is null, role in ["admin","owner"]] order=[id desc] page=[after 40 limit 10]"#
    );
    assert_eq!(spec.page().map(Page::limit), Some(10));
}

/// Unary operators ignore whatever operand they were given.
#[test]
fn test_unary_operands_are_normalized() {
    let spec = QuerySpec::new()
        .filter("email", Operator::IsNotNull, "ignored")
        .filter("email", Operator::IsNotNull, 42);
    assert_eq!(spec.filters().len(), 1);
    assert_eq!(spec.filters()[0].value, json!(null));
}

/// A zero limit is rejected whether it came from the builder or from JSON.
#[test]
fn test_zero_limit_from_json_is_invalid() {
    let spec: QuerySpec = serde_json::from_value(json!({
        "page": { "offset": { "offset": 0, "limit": 0 } }
    }))
    .expect("Failed to deserialize spec");

    assert!(spec.filters().is_empty());
    assert!(matches!(spec.validate(), Err(RepositoryError::InvalidSpecification(_))));
}
