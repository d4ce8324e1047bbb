//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use ormrepo::memory::{MemoryAdapter, MemoryDatabase, MemorySession};
use ormrepo::{
    DtoSchema, Entity, FieldSpec, FieldType, RelatedAdapter, Relation, Repository,
    RepositoryConfig, Rule, SchemaMapper, UnitOfWork,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
    pub age: i64,
    pub email: Option<String>,
    pub address: Option<Value>,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Entity for User {
    type Id = i64;
    const TABLE: &'static str = "users";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const COLUMNS: &'static [&'static str] = &["id", "name", "age", "email", "address", "active"];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

/// What callers see: everything but the `active` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDto {
    pub id: Option<i64>,
    pub name: String,
    pub age: i64,
    pub email: Option<String>,
    pub address: Option<Value>,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            age: user.age,
            email: user.email.clone(),
            address: user.address.clone(),
        }
    }
}

pub fn user_schema() -> DtoSchema {
    DtoSchema::new("user")
        .field(FieldSpec::new("id", FieldType::Integer).read_only())
        .field(
            FieldSpec::new("name", FieldType::String)
                .rule(Rule::MinLength(1))
                .rule(Rule::MaxLength(50)),
        )
        .field(
            FieldSpec::new("age", FieldType::Integer)
                .rule(Rule::Min(0.0))
                .rule(Rule::Max(150.0)),
        )
        .field(
            FieldSpec::new("email", FieldType::String)
                .nullable()
                .rule(Rule::pattern(r"[^@\s]+@[^@\s]+\.[^@\s]+").unwrap()),
        )
        .field(FieldSpec::new("address", FieldType::Object).nullable())
}

pub type UserRepo = Repository<User, UserDto, MemoryAdapter<User>, SchemaMapper<User, UserDto>>;

pub fn user_repo(db: &MemoryDatabase) -> UserRepo {
    Repository::new(
        MemoryAdapter::new(db.clone())
            .with_sequence(|n| n as i64)
            .with_unique(&["email"]),
        SchemaMapper::new(user_schema()),
        UnitOfWork::new(db.clone()),
    )
}

pub fn user_repo_with(db: &MemoryDatabase, config: RepositoryConfig) -> UserRepo {
    user_repo(db).with_config(config).unwrap()
}

pub fn new_user(name: &str, age: i64) -> UserDto {
    UserDto {
        id: None,
        name: name.to_string(),
        age,
        email: None,
        address: None,
    }
}

pub fn uow(db: &MemoryDatabase) -> UnitOfWork<MemorySession> {
    UnitOfWork::new(db.clone())
}

/// Composite-key entity: a user's membership in a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: i64,
    pub group_id: i64,
    pub role: String,
}

impl Entity for Membership {
    type Id = (i64, i64);
    const TABLE: &'static str = "memberships";
    const PRIMARY_KEY: &'static [&'static str] = &["user_id", "group_id"];
    const COLUMNS: &'static [&'static str] = &["user_id", "group_id", "role"];

    fn id(&self) -> Option<(i64, i64)> {
        Some((self.user_id, self.group_id))
    }

    fn assign_id(&mut self, id: (i64, i64)) {
        (self.user_id, self.group_id) = id;
    }
}

impl From<&Membership> for Membership {
    fn from(m: &Membership) -> Self {
        m.clone()
    }
}

pub type MembershipRepo =
    Repository<Membership, Membership, MemoryAdapter<Membership>, SchemaMapper<Membership, Membership>>;

pub fn membership_repo(db: &MemoryDatabase) -> MembershipRepo {
    Repository::new(
        MemoryAdapter::new(db.clone()),
        SchemaMapper::new(
            DtoSchema::new("membership")
                .field(FieldSpec::new("user_id", FieldType::Integer))
                .field(FieldSpec::new("group_id", FieldType::Integer))
                .field(
                    FieldSpec::new("role", FieldType::String)
                        .rule(Rule::OneOf(vec!["owner".into(), "member".into()])),
                ),
        ),
        UnitOfWork::new(db.clone()),
    )
}

/// An order owns its lines (each with an optional gift wrap) and at most one
/// shipment. A shipped order cannot be deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Option<i64>,
    pub customer: String,
}

impl Entity for Order {
    type Id = i64;
    const TABLE: &'static str = "orders";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const COLUMNS: &'static [&'static str] = &["id", "customer"];
    const RELATIONS: &'static [Relation] = &[
        Relation::many("lines", &[("id", "order_id")]),
        Relation::one("shipment", &[("id", "order_id")]).restrict(),
    ];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub id: Option<i64>,
    pub order_id: i64,
    pub sku: String,
    pub qty: i64,
}

impl Entity for Line {
    type Id = i64;
    const TABLE: &'static str = "order_lines";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const COLUMNS: &'static [&'static str] = &["id", "order_id", "sku", "qty"];
    const RELATIONS: &'static [Relation] = &[Relation::one("gift", &[("id", "line_id")])];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gift {
    pub id: Option<i64>,
    pub line_id: i64,
    pub note: String,
}

impl Entity for Gift {
    type Id = i64;
    const TABLE: &'static str = "gifts";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const COLUMNS: &'static [&'static str] = &["id", "line_id", "note"];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: Option<i64>,
    pub order_id: i64,
    pub carrier: String,
}

impl Entity for Shipment {
    type Id = i64;
    const TABLE: &'static str = "shipments";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const COLUMNS: &'static [&'static str] = &["id", "order_id", "carrier"];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GiftDto {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub line_id: Option<i64>,
    pub note: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineDto {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub order_id: Option<i64>,
    pub sku: String,
    pub qty: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gift: Option<GiftDto>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentDto {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub order_id: Option<i64>,
    pub carrier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDto {
    pub id: Option<i64>,
    pub customer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<LineDto>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment: Option<ShipmentDto>,
}

impl From<&Order> for OrderDto {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            customer: order.customer.clone(),
            lines: None,
            shipment: None,
        }
    }
}

pub fn line(sku: &str, qty: i64) -> LineDto {
    LineDto {
        sku: sku.to_string(),
        qty,
        ..LineDto::default()
    }
}

pub fn gift(note: &str) -> GiftDto {
    GiftDto {
        note: note.to_string(),
        ..GiftDto::default()
    }
}

pub fn order_schema() -> DtoSchema {
    DtoSchema::new("order")
        .field(FieldSpec::new("id", FieldType::Integer).read_only())
        .field(FieldSpec::new("customer", FieldType::String).rule(Rule::MinLength(1)))
}

pub type OrderRepo = Repository<Order, OrderDto, MemoryAdapter<Order>, SchemaMapper<Order, OrderDto>>;

/// Orders with every relation registered; line quantities must be positive.
pub fn order_repo(db: &MemoryDatabase) -> OrderRepo {
    let gifts = RelatedAdapter::new(MemoryAdapter::<Gift>::new(db.clone()).with_sequence(|n| n as i64));
    let lines = RelatedAdapter::new(MemoryAdapter::<Line>::new(db.clone()).with_sequence(|n| n as i64))
        .with_schema(
            DtoSchema::new("line")
                .field(FieldSpec::new("id", FieldType::Integer).read_only())
                .field(FieldSpec::new("order_id", FieldType::Integer))
                .field(FieldSpec::new("sku", FieldType::String).rule(Rule::MinLength(1)))
                .field(FieldSpec::new("qty", FieldType::Integer).rule(Rule::Min(1.0))),
        )
        .with_relation("gift", gifts)
        .expect("Failed to register gifts");
    let shipments =
        RelatedAdapter::new(MemoryAdapter::<Shipment>::new(db.clone()).with_sequence(|n| n as i64));

    Repository::new(
        MemoryAdapter::new(db.clone()).with_sequence(|n| n as i64),
        SchemaMapper::new(order_schema()),
        UnitOfWork::new(db.clone()),
    )
    .with_relation("lines", lines)
    .expect("Failed to register lines")
    .with_relation("shipment", shipments)
    .expect("Failed to register shipments")
}

pub fn new_order(customer: &str, lines: Vec<LineDto>) -> OrderDto {
    OrderDto {
        id: None,
        customer: customer.to_string(),
        lines: Some(lines),
        shipment: None,
    }
}

/// Keyed by a struct whose fields are the key columns, declared in a
/// different order than the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnrollmentKey {
    pub course: String,
    pub student: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub student: String,
    pub course: String,
    pub grade: Option<String>,
}

impl Entity for Enrollment {
    type Id = EnrollmentKey;
    const TABLE: &'static str = "enrollments";
    const PRIMARY_KEY: &'static [&'static str] = &["student", "course"];
    const COLUMNS: &'static [&'static str] = &["student", "course", "grade"];

    fn id(&self) -> Option<EnrollmentKey> {
        Some(EnrollmentKey {
            course: self.course.clone(),
            student: self.student.clone(),
        })
    }

    fn assign_id(&mut self, id: EnrollmentKey) {
        (self.course, self.student) = (id.course, id.student);
    }
}

impl From<&Enrollment> for Enrollment {
    fn from(e: &Enrollment) -> Self {
        e.clone()
    }
}

pub type EnrollmentRepo =
    Repository<Enrollment, Enrollment, MemoryAdapter<Enrollment>, SchemaMapper<Enrollment, Enrollment>>;

pub fn enrollment_repo(db: &MemoryDatabase) -> EnrollmentRepo {
    Repository::new(
        MemoryAdapter::new(db.clone()),
        SchemaMapper::new(
            DtoSchema::new("enrollment")
                .field(FieldSpec::new("student", FieldType::String))
                .field(FieldSpec::new("course", FieldType::String))
                .field(FieldSpec::new("grade", FieldType::String).nullable()),
        ),
        UnitOfWork::new(db.clone()),
    )
}
