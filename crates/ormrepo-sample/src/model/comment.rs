use ormrepo::Entity;
use serde::{Deserialize, Serialize};

/// A reader's comment on a post. Hidden comments stay stored but are left out
/// of [`PostService::thread`](crate::services::PostService::thread).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Option<i64>,
    pub post_id: i64,
    pub author: String,
    pub body: String,
    #[serde(default)]
    pub hidden: bool,
}

impl Entity for Comment {
    type Id = i64;
    const TABLE: &'static str = "comments";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const COLUMNS: &'static [&'static str] = &["id", "post_id", "author", "body", "hidden"];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentDto {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub post_id: Option<i64>,
    pub author: String,
    pub body: String,
    #[serde(default)]
    pub hidden: bool,
}

impl CommentDto {
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: None,
            post_id: None,
            author: author.into(),
            body: body.into(),
            hidden: false,
        }
    }
}
