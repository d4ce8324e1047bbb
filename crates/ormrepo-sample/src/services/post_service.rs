//! # Post Service
//!
//! Publishing, tagging, commenting and archiving posts.
use crate::model::{CommentDto, Post, PostDto};
use crate::post_repo::{PostError, PostRepository};
use async_trait::async_trait;
use ormrepo::memory::MemoryAdapter;
use ormrepo::{
    Direction, EntityAdapter, Fields, Operator, Patch, QuerySpec, Repository, RepositoryClient,
    RepositoryError, SchemaMapper,
};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct PostService {
    posts: PostRepository,
}

impl PostService {
    pub fn new(posts: PostRepository) -> Self {
        Self { posts }
    }
}

#[async_trait]
impl RepositoryClient<Post, PostDto> for PostService {
    type Adapter = MemoryAdapter<Post>;
    type Mapper = SchemaMapper<Post, PostDto>;
    type Error = PostError;

    fn inner(&self) -> &Repository<Post, PostDto, Self::Adapter, Self::Mapper> {
        &self.posts
    }

    fn map_error(e: RepositoryError) -> Self::Error {
        PostError::from(e)
    }
}

impl PostService {
    #[instrument(skip(self))]
    pub async fn write(&self, post: PostDto) -> Result<PostDto, PostError> {
        debug!("Writing post");
        Ok(self.posts.create(post).await?)
    }

    /// Publishes a draft. Publishing twice is an invalid state.
    #[instrument(skip(self))]
    pub async fn publish(&self, id: i64) -> Result<PostDto, PostError> {
        let posts = &self.posts;
        let published = posts
            .unit_of_work()
            .run(|scope| async move {
                let current = posts.require_by_id_in(&scope, &id).await?;
                if current.published {
                    return Err(RepositoryError::Conflict {
                        entity: "posts",
                        detail: format!("post {id} is already published"),
                    });
                }
                posts
                    .update_in(&scope, &id, Patch::new().set("published", true))
                    .await
            })
            .await?;
        info!(post_id = id, "Post published");
        Ok(published)
    }

    #[instrument(skip(self))]
    pub async fn tag(&self, id: i64, tags: Vec<String>) -> Result<PostDto, PostError> {
        debug!(count = tags.len(), "Tagging post");
        Ok(self.posts.update(&id, Patch::new().set("tags", json!(tags))).await?)
    }

    /// A post with its visible comments.
    #[instrument(skip(self))]
    pub async fn thread(&self, id: i64) -> Result<PostDto, PostError> {
        let spec = QuerySpec::new().relation_filter("comments", "hidden", Operator::Eq, false);
        self.posts
            .get_by_id_with(&id, &spec)
            .await?
            .ok_or_else(|| PostError::NotFound(id.to_string()))
    }

    /// Appends a comment. The current comments, hidden ones included, are
    /// written back unchanged in the same unit of work.
    #[instrument(skip(self, comment))]
    pub async fn comment(&self, id: i64, comment: CommentDto) -> Result<PostDto, PostError> {
        debug!(author = %comment.author, "Adding comment");
        let posts = &self.posts;
        let updated = posts
            .unit_of_work()
            .run(|scope| async move {
                let current = posts
                    .get_by_id_with_in(&scope, &id, &QuerySpec::new().load("comments"))
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound {
                        entity: "posts",
                        id: id.to_string(),
                    })?;
                let mut comments = current.comments.unwrap_or_default();
                comments.push(comment);
                posts
                    .update_in(&scope, &id, Patch::new().set("comments", json!(comments)))
                    .await
            })
            .await?;
        let count = updated.comments.as_ref().map_or(0, Vec::len);
        info!(post_id = id, comments = count, "Comment added");
        Ok(updated)
    }

    /// Visible posts of one author, oldest first.
    #[instrument(skip(self))]
    pub async fn by_author(
        &self,
        author_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<PostDto>, PostError> {
        let spec = QuerySpec::new()
            .filter("author_id", Operator::Eq, author_id)
            .order_by("id", Direction::Asc)
            .paginate(offset, limit)?;
        Ok(self.posts.list(&spec).await?)
    }

    /// Hides a post from every read. Returns `false` if there was no visible
    /// post to archive.
    #[instrument(skip(self))]
    pub async fn archive(&self, id: i64) -> Result<bool, PostError> {
        let adapter = self.posts.adapter();
        let archived = self
            .posts
            .unit_of_work()
            .run(|scope| async move {
                let Some(mut post) = adapter.get(&scope, &id).await? else {
                    return Ok(false);
                };
                if post.archived {
                    return Ok(false);
                }
                post.archived = true;
                let mut changed = Fields::new();
                changed.insert("archived".into(), Value::Bool(true));
                adapter.apply_patch(&scope, post, &changed).await?;
                Ok(true)
            })
            .await?;
        if archived {
            info!(post_id = id, "Post archived");
        }
        Ok(archived)
    }

    /// Archived posts, which the service's own reads never return.
    #[instrument(skip(self))]
    pub async fn count_archived(&self) -> Result<u64, PostError> {
        let spec = QuerySpec::new().filter("archived", Operator::Eq, true);
        Ok(self.posts.clone().use_global_filters(false).count(&spec).await?)
    }
}
