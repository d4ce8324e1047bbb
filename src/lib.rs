//! # ormrepo
//!
//! > **A generic, async repository layer between application code and a store.**
//!
//! This crate implements the Repository, Unit of Work and Specification patterns once,
//! generically, so that every entity type gets the same create / read / update / delete /
//! list / count operations without rewriting them.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Write the orchestration once
//!
//! A [`Repository<E, D, A, M>`](Repository) is parameterized by:
//! - `E`: the persisted [`Entity`]
//! - `D`: the [`Dto`](dto::Dto) callers exchange with it
//! - `A`: the [`EntityAdapter`] that talks to the store
//! - `M`: the [`DtoMapper`] that converts and validates
//!
//! The repository only ever talks to those traits. Swapping the store means writing
//! one adapter and one session factory; nothing above them changes.
//!
//! ### Every operation is a unit of work
//!
//! Each repository call runs inside exactly one [`Scope`]: committed when the call
//! succeeds, rolled back when anything fails, including validation. Scopes nest
//! through savepoints, so a service can compose several repository calls into one
//! atomic operation with the `*_in` methods.
//!
//! ### Queries are values
//!
//! A [`QuerySpec`] is an immutable description of filters, sort keys and
//! pagination. Specifications combine associatively, and only the adapter decides
//! how to execute them.
//!
//! ### Relations travel with their parent
//!
//! An entity declares its [`Relation`]s; nested children in a DTO are written
//! through their own adapter in the parent's scope, and reads attach the
//! relation paths a [`QuerySpec`] asks to load.
//!
//! ## 🗺️ Module Tour
//!
//! | Module | Role |
//! |--------|------|
//! | [`entity`] | [`Entity`] contract and the store-facing [`EntityAdapter`] |
//! | [`dto`] | Schemas, validation rules, [`DtoMapper`], partial updates ([`Patch`]) |
//! | [`session`] | [`UnitOfWork`], [`Scope`], [`ScopeHandle`], the [`Session`] contract |
//! | [`query`] | [`QuerySpec`] builder and composition |
//! | [`relation`] | Declared [`Relation`]s, nested writes, [`LoadPlan`] for reads |
//! | [`repository`] | The generic [`Repository`] |
//! | [`client`] | [`RepositoryClient`], for domain services wrapping a repository |
//! | [`config`] | [`RepositoryConfig`]: default limit, global filters, null policy |
//! | [`memory`] | A transactional in-memory backend |
//! | [`mock`] | Recording session factory and scripted adapter for tests |
//! | [`logging`] | Subscriber setup and log helpers |
//!
//! ## 🚀 Quick Start
//!
//! ```rust
//! use ormrepo::memory::{MemoryAdapter, MemoryDatabase};
//! use ormrepo::{
//!     DtoSchema, Entity, FieldSpec, FieldType, Operator, Patch, QuerySpec, Repository, Rule,
//!     SchemaMapper, UnitOfWork,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct User { id: Option<i64>, name: String, age: i64 }
//!
//! impl Entity for User {
//!     type Id = i64;
//!     const TABLE: &'static str = "users";
//!     const PRIMARY_KEY: &'static [&'static str] = &["id"];
//!     const COLUMNS: &'static [&'static str] = &["id", "name", "age"];
//!     fn id(&self) -> Option<i64> { self.id }
//!     fn assign_id(&mut self, id: i64) { self.id = Some(id); }
//! }
//! impl From<&User> for User { fn from(u: &User) -> Self { u.clone() } }
//!
//! #[tokio::main]
//! async fn main() -> ormrepo::RepositoryResult<()> {
//!     let db = MemoryDatabase::new();
//!     let schema = DtoSchema::new("user")
//!         .field(FieldSpec::new("id", FieldType::Integer).read_only())
//!         .field(FieldSpec::new("name", FieldType::String).rule(Rule::MinLength(1)))
//!         .field(FieldSpec::new("age", FieldType::Integer).rule(Rule::Min(0.0)));
//!
//!     let users = Repository::new(
//!         MemoryAdapter::<User>::new(db.clone()).with_sequence(|n| n as i64),
//!         SchemaMapper::<User, User>::new(schema),
//!         UnitOfWork::new(db),
//!     );
//!
//!     let ann = users.create(User { id: None, name: "Ann".into(), age: 30 }).await?;
//!     assert_eq!(ann.id, Some(1));
//!
//!     users.update(&1, Patch::new().set("age", 31)).await?;
//!     let older = users.list(&QuerySpec::new().filter("age", Operator::Ge, 31)).await?;
//!     assert_eq!(older.len(), 1);
//!
//!     assert!(users.delete(&1).await?);
//!     assert_eq!(users.get_by_id(&1).await?, None);
//!     assert!(!users.delete(&1).await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Errors
//!
//! Everything returns [`RepositoryResult`]. Validation failures list every failing
//! field ([`ValidationErrors`]); absence is `None` / `false` for `get_by_id` and
//! `delete`, and [`RepositoryError::NotFound`] for `update` and `require_by_id`.
//!
//! ## Observability
//!
//! All components log through `tracing` with an `entity_type` field. Call
//! [`logging::setup_tracing`] once at startup and control verbosity with `RUST_LOG`.

pub mod client;
pub mod config;
pub mod dto;
pub mod entity;
pub mod error;
pub mod logging;
pub mod memory;
pub mod mock;
pub mod query;
pub mod relation;
pub mod repository;
pub mod session;

// Re-export core types for convenience
pub use client::RepositoryClient;
pub use config::{NullPolicy, RepositoryConfig, DEFAULT_LIMIT};
pub use dto::{DtoMapper, DtoSchema, FieldSpec, FieldType, Patch, Rule, SchemaMapper};
pub use entity::{key_values, Entity, EntityAdapter, Fields};
pub use error::{FieldError, RepositoryError, RepositoryResult, ValidationErrors};
pub use query::{Direction, Filter, Operator, Page, QuerySpec, SortKey};
pub use relation::{
    Cardinality, LoadPlan, OnDelete, RelatedAdapter, RelatedStore, Relation, RelationSet,
};
pub use repository::Repository;
pub use session::{Scope, ScopeHandle, Session, SessionFactory, UnitOfWork};
