//! # User Repository
//!
//! Wires the generic [`Repository`] for [`User`]: the DTO schema, a sequence for
//! identities and a unique constraint on `email`.
//!
//! ## Structure
//!
//! - [`schema()`] - field rules for [`UserDto`]
//! - [`error`] - [`UserError`], the service-level error type
//! - [`new()`] - factory building the repository over a [`MemoryDatabase`]
//!
//! ## Usage
//!
//! ```rust
//! use ormrepo::memory::MemoryDatabase;
//! use ormrepo::RepositoryConfig;
//! use ormrepo_sample::model::UserDto;
//! use ormrepo_sample::user_repo;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let users = user_repo::new(MemoryDatabase::new(), RepositoryConfig::default())?;
//!     let alice = users.create(UserDto::new("Alice", "alice@example.com", 34)).await?;
//!     assert_eq!(alice.id, Some(1));
//!     Ok(())
//! }
//! ```

pub mod error;

pub use error::*;

use crate::model::{User, UserDto};
use ormrepo::memory::{MemoryAdapter, MemoryDatabase};
use ormrepo::{
    DtoSchema, FieldSpec, FieldType, Repository, RepositoryConfig, RepositoryResult, Rule,
    SchemaMapper, UnitOfWork,
};

pub type UserRepository =
    Repository<User, UserDto, MemoryAdapter<User>, SchemaMapper<User, UserDto>>;

pub fn schema() -> RepositoryResult<DtoSchema> {
    Ok(DtoSchema::new("user")
        .field(FieldSpec::new("id", FieldType::Integer).read_only())
        .field(
            FieldSpec::new("name", FieldType::String)
                .rule(Rule::MinLength(2))
                .rule(Rule::MaxLength(64)),
        )
        .field(
            FieldSpec::new("email", FieldType::String)
                .rule(Rule::pattern(r"[^@\s]+@[^@\s]+\.[a-z]{2,}")?),
        )
        .field(
            FieldSpec::new("age", FieldType::Integer)
                .rule(Rule::Min(13.0))
                .rule(Rule::Max(150.0)),
        ))
}

/// Creates the user repository.
pub fn new(db: MemoryDatabase, config: RepositoryConfig) -> RepositoryResult<UserRepository> {
    let adapter = MemoryAdapter::new(db.clone())
        .with_sequence(|n| n as i64)
        .with_unique(&["email"]);
    Repository::new(adapter, SchemaMapper::new(schema()?), UnitOfWork::new(db)).with_config(config)
}
