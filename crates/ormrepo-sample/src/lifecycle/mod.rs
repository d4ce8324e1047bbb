//! # System Wiring
//!
//! [`BlogSystem`] builds every repository over one shared [`MemoryDatabase`] and
//! hands out the services. Sharing the database is what lets a single unit of
//! work span users and posts.
//!
//! ```rust
//! use ormrepo::RepositoryClient;
//! use ormrepo_sample::lifecycle::BlogSystem;
//! use ormrepo_sample::model::UserDto;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let system = BlogSystem::new()?;
//!     let (user, post) = system
//!         .user_service
//!         .register_with_first_post(UserDto::new("Alice", "alice@example.com", 34), "Hello", "First!")
//!         .await?;
//!     assert_eq!(post.author_id, user.id.unwrap());
//!     assert!(system.user_service.get(1).await?.is_some());
//!     Ok(())
//! }
//! ```

use crate::post_repo;
use crate::services::{PostService, UserService};
use crate::user_repo;
use ormrepo::memory::MemoryDatabase;
use ormrepo::{RepositoryConfig, RepositoryResult};
use tracing::info;

pub struct BlogSystem {
    pub user_service: UserService,
    pub post_service: PostService,
    db: MemoryDatabase,
}

impl BlogSystem {
    /// A system with default repository settings.
    pub fn new() -> RepositoryResult<Self> {
        Self::with_config(RepositoryConfig::default())
    }

    pub fn with_config(config: RepositoryConfig) -> RepositoryResult<Self> {
        let db = MemoryDatabase::new();
        let users = user_repo::new(db.clone(), config.clone())?;
        let posts = post_repo::new(db.clone(), config)?;

        info!(default_limit = users.config().default_limit, "Blog system ready");
        Ok(Self {
            user_service: UserService::new(users, posts.clone()),
            post_service: PostService::new(posts),
            db,
        })
    }

    /// The shared store, for inspection.
    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }
}
