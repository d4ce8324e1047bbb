//! # User Service
//!
//! High-level API over the user repository. Standard reads and deletes come from
//! [`RepositoryClient`]; registration flows are defined here.
use crate::model::{PostDto, User, UserDto};
use crate::post_repo::PostRepository;
use crate::user_repo::{UserError, UserRepository};
use async_trait::async_trait;
use ormrepo::memory::MemoryAdapter;
use ormrepo::{Operator, Patch, QuerySpec, Repository, RepositoryClient, RepositoryError, SchemaMapper};
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct UserService {
    users: UserRepository,
    posts: PostRepository,
}

impl UserService {
    pub fn new(users: UserRepository, posts: PostRepository) -> Self {
        Self { users, posts }
    }
}

#[async_trait]
impl RepositoryClient<User, UserDto> for UserService {
    type Adapter = MemoryAdapter<User>;
    type Mapper = SchemaMapper<User, UserDto>;
    type Error = UserError;

    fn inner(&self) -> &Repository<User, UserDto, Self::Adapter, Self::Mapper> {
        &self.users
    }

    fn map_error(e: RepositoryError) -> Self::Error {
        UserError::from(e)
    }
}

impl UserService {
    #[instrument(skip(self))]
    pub async fn register(&self, user: UserDto) -> Result<UserDto, UserError> {
        debug!("Registering user");
        Ok(self.users.create(user).await?)
    }

    #[instrument(skip(self))]
    pub async fn change_email(&self, id: i64, email: &str) -> Result<UserDto, UserError> {
        debug!("Changing email");
        Ok(self.users.update(&id, Patch::new().set("email", email)).await?)
    }

    #[instrument(skip(self))]
    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserDto>, UserError> {
        let spec = QuerySpec::new()
            .filter("email", Operator::Eq, email)
            .paginate(0, 1)?;
        Ok(self.users.list(&spec).await?.into_iter().next())
    }

    /// Registers a user together with their first post. Either both exist
    /// afterwards or neither does.
    #[instrument(skip(self, body))]
    pub async fn register_with_first_post(
        &self,
        user: UserDto,
        title: &str,
        body: &str,
    ) -> Result<(UserDto, PostDto), UserError> {
        let (users, posts) = (&self.users, &self.posts);
        let (user, post) = users
            .unit_of_work()
            .run(|scope| async move {
                let user = users.create_in(&scope, user).await?;
                let author_id = user.id.ok_or_else(|| {
                    RepositoryError::Backend("store returned a user without identity".into())
                })?;
                let post = posts
                    .create_in(&scope, PostDto::draft(author_id, title, body))
                    .await?;
                Ok((user, post))
            })
            .await?;

        info!(user_id = ?user.id, post_id = ?post.id, "User registered with first post");
        Ok((user, post))
    }
}
