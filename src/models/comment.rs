use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::pagination::{Order, SortBy, Sorting};

/// Represents the 'comments' table, joined with the viewer's vote state.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub author_id: String,
    pub post_id: i64,
    /// `None` for a direct reply to the post.
    pub parent_comment_id: Option<i64>,
    pub content: String,
    /// 0 for top-level comments, parent depth + 1 otherwise.
    pub depth: i32,
    pub points: i32,
    /// Count of direct and transitive replies.
    pub comment_count: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,

    #[serde(default)]
    pub is_upvoted: bool,

    /// First page of replies, only populated when a listing asks for it.
    #[sqlx(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_comments: Option<Vec<Comment>>,
}

impl Comment {
    /// Placeholders carry negative ids; the store only hands out ids >= 1.
    pub fn is_placeholder(&self) -> bool {
        self.id < 0
    }

    pub fn container(&self) -> Container {
        match self.parent_comment_id {
            Some(parent) => Container::Comment(parent),
            None => Container::Post(self.post_id),
        }
    }
}

/// The parent scope of a page of direct-child comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Container {
    Post(i64),
    Comment(i64),
}

impl Container {
    pub fn id(&self) -> i64 {
        match self {
            Container::Post(id) | Container::Comment(id) => *id,
        }
    }
}

/// Insert payload. `depth` and `post_id` are resolved from the container
/// before the insert.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub author_id: String,
    pub post_id: i64,
    pub parent_comment_id: Option<i64>,
    pub content: String,
    pub depth: i32,
}

/// DTO for creating a comment or a reply.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateCommentRequest {
    #[validate(length(
        min = 3,
        max = 1000,
        message = "Comment must be between 3 and 1000 characters"
    ))]
    pub content: String,
}

/// A comment listing independent of page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentListing {
    pub container: Container,
    pub sorting: Sorting,
}

/// Query parameters for comment and reply listings.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CommentListParams {
    #[validate(range(min = 1, message = "Page must be at least 1"))]
    pub page: Option<i64>,

    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,

    pub sort_by: Option<SortBy>,
    pub order: Option<Order>,

    /// Attach the first reply page to each returned comment.
    pub include_children: Option<bool>,
}

impl CommentListParams {
    pub fn sorting(&self) -> Sorting {
        Sorting {
            sort_by: self.sort_by.unwrap_or_default(),
            order: self.order.unwrap_or_default(),
        }
    }
}
