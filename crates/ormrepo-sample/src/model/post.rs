use super::CommentDto;
use ormrepo::{Entity, Relation};
use serde::{Deserialize, Serialize};

/// A blog post. Archived posts stay in the table with `archived` set; deleting
/// a post deletes its comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Option<i64>,
    pub author_id: i64,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub archived: bool,
}

impl Entity for Post {
    type Id = i64;
    const TABLE: &'static str = "posts";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const COLUMNS: &'static [&'static str] =
        &["id", "author_id", "title", "body", "published", "tags", "archived"];
    const RELATIONS: &'static [Relation] = &[Relation::many("comments", &[("id", "post_id")])];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDto {
    pub id: Option<i64>,
    pub author_id: i64,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Present when written with the post or loaded on request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<CommentDto>>,
}

impl PostDto {
    pub fn draft(author_id: i64, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: None,
            author_id,
            title: title.into(),
            body: body.into(),
            published: false,
            tags: Vec::new(),
            comments: None,
        }
    }
}

impl From<&Post> for PostDto {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id,
            author_id: post.author_id,
            title: post.title.clone(),
            body: post.body.clone(),
            published: post.published,
            tags: post.tags.clone(),
            comments: None,
        }
    }
}
