use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub user_id: i64,
    pub status: String,
    pub content_type: String,
    pub tags: String,
    pub pubdate: Option<String>,
    pub created_at: String,
}

/// Fields needed to create a post. Status and content type are registry
/// names; the store resolves them to ids.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub user_id: i64,
    pub status: String,
    pub content_type: String,
    pub tags: String,
}

impl NewPost {
    pub fn slug(&self) -> String {
        slug::slugify(&self.title)
    }
}
