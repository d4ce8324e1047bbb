//! # Post Repository
//!
//! Archived posts are hidden by a global filter on `archived`; the flag is not
//! part of [`PostDto`], so only [`PostService::archive`](crate::services::PostService::archive)
//! ever sets it.
//!
//! Comments live in their own table and are written through the `comments`
//! relation; their bodies are checked against [`comment_schema`].

pub mod error;

pub use error::*;

use crate::model::{Comment, Post, PostDto};
use ormrepo::memory::{MemoryAdapter, MemoryDatabase};
use ormrepo::{
    DtoSchema, FieldSpec, FieldType, RelatedAdapter, Repository, RepositoryConfig,
    RepositoryResult, Rule, SchemaMapper, UnitOfWork,
};

pub type PostRepository =
    Repository<Post, PostDto, MemoryAdapter<Post>, SchemaMapper<Post, PostDto>>;

pub fn schema() -> DtoSchema {
    DtoSchema::new("post")
        .field(FieldSpec::new("id", FieldType::Integer).read_only())
        .field(FieldSpec::new("author_id", FieldType::Integer).rule(Rule::Min(1.0)))
        .field(
            FieldSpec::new("title", FieldType::String)
                .rule(Rule::MinLength(1))
                .rule(Rule::MaxLength(120)),
        )
        .field(FieldSpec::new("body", FieldType::String))
        .field(FieldSpec::new("published", FieldType::Boolean).optional())
        .field(
            FieldSpec::new("tags", FieldType::Array)
                .optional()
                .rule(Rule::MaxLength(5)),
        )
}

pub fn comment_schema() -> DtoSchema {
    DtoSchema::new("comment")
        .field(FieldSpec::new("id", FieldType::Integer).read_only())
        .field(FieldSpec::new("post_id", FieldType::Integer))
        .field(
            FieldSpec::new("author", FieldType::String)
                .rule(Rule::MinLength(1))
                .rule(Rule::MaxLength(50)),
        )
        .field(
            FieldSpec::new("body", FieldType::String)
                .rule(Rule::MinLength(1))
                .rule(Rule::MaxLength(500)),
        )
        .field(FieldSpec::new("hidden", FieldType::Boolean).optional())
}

/// Creates the post repository. `config` gains the `archived = false` filter.
pub fn new(db: MemoryDatabase, config: RepositoryConfig) -> RepositoryResult<PostRepository> {
    let adapter = MemoryAdapter::new(db.clone()).with_sequence(|n| n as i64);
    let comments = RelatedAdapter::new(
        MemoryAdapter::<Comment>::new(db.clone()).with_sequence(|n| n as i64),
    )
    .with_schema(comment_schema());
    Repository::new(adapter, SchemaMapper::new(schema()), UnitOfWork::new(db))
        .with_relation("comments", comments)?
        .with_config(config.with_global_filter("archived", false))
}
