use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::{Validate, ValidationError};

use super::pagination::{Order, SortBy, Sorting};

/// Represents the 'posts' table, joined with the viewer's vote state.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub author_id: String,
    pub title: String,
    pub url: Option<String>,
    pub content: Option<String>,

    /// Denormalized upvote count.
    pub points: i32,
    /// Denormalized count of comments at every depth.
    pub comment_count: i32,

    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Whether the requesting viewer has upvoted this post.
    /// Always false for anonymous requests.
    #[serde(default)]
    pub is_upvoted: bool,
}

/// Insert payload handed to the store once validation has passed.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: String,
    pub title: String,
    pub url: Option<String>,
    pub content: Option<String>,
}

/// DTO for creating a new post.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_has_body"))]
pub struct CreatePostRequest {
    #[validate(length(
        min = 3,
        max = 100,
        message = "Title must be between 3 and 100 characters"
    ))]
    pub title: String,

    #[validate(url(message = "URL must be a valid URL"))]
    pub url: Option<String>,

    #[validate(length(max = 10000, message = "Content must be at most 10000 characters"))]
    pub content: Option<String>,
}

impl CreatePostRequest {
    /// Blank optional fields count as absent.
    pub fn normalized(mut self) -> Self {
        self.title = self.title.trim().to_string();
        self.url = self.url.filter(|u| !u.trim().is_empty());
        self.content = self.content.filter(|c| !c.trim().is_empty());
        self
    }
}

fn validate_has_body(req: &CreatePostRequest) -> Result<(), ValidationError> {
    if req.url.is_none() && req.content.is_none() {
        let mut err = ValidationError::new("missing_body");
        err.message = Some("Either URL or content must be provided".into());
        return Err(err);
    }
    if let Some(url) = &req.url {
        let scheme_ok = url::Url::parse(url)
            .map(|u| u.scheme() == "http" || u.scheme() == "https")
            .unwrap_or(false);
        if !scheme_ok {
            let mut err = ValidationError::new("url_scheme");
            err.message = Some("URL must use http or https".into());
            return Err(err);
        }
    }
    Ok(())
}

/// Listing filter shared by the REST surface and the client cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostFilter {
    /// Exact author id.
    pub author: Option<String>,
    /// Case-insensitive substring of the post URL.
    pub site: Option<String>,
}

impl PostFilter {
    pub fn matches(&self, post: &Post) -> bool {
        if let Some(author) = &self.author {
            if &post.author_id != author {
                return false;
            }
        }
        if let Some(site) = &self.site {
            let site = site.to_lowercase();
            match &post.url {
                Some(url) if url.to_lowercase().contains(&site) => {}
                _ => return false,
            }
        }
        true
    }
}

/// A post listing independent of page number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostListing {
    pub filter: PostFilter,
    pub sorting: Sorting,
}

/// Query parameters for `GET /posts`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PostListParams {
    #[validate(range(min = 1, message = "Page must be at least 1"))]
    pub page: Option<i64>,

    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,

    pub sort_by: Option<SortBy>,
    pub order: Option<Order>,
    pub author: Option<String>,
    pub site: Option<String>,
}

impl PostListParams {
    pub fn listing(&self) -> PostListing {
        PostListing {
            filter: PostFilter {
                author: self.author.clone().filter(|a| !a.is_empty()),
                site: self.site.clone().filter(|s| !s.is_empty()),
            },
            sorting: Sorting {
                sort_by: self.sort_by.unwrap_or_default(),
                order: self.order.unwrap_or_default(),
            },
        }
    }
}

/// Response body of a successful post creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPost {
    pub post_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: Option<&str>, content: Option<&str>) -> CreatePostRequest {
        CreatePostRequest {
            title: "A useful title".to_string(),
            url: url.map(str::to_string),
            content: content.map(str::to_string),
        }
        .normalized()
    }

    #[test]
    fn post_needs_url_or_content() {
        assert!(request(None, None).validate().is_err());
        assert!(request(Some(""), Some("  ")).validate().is_err());
        assert!(request(None, Some("body")).validate().is_ok());
        assert!(request(Some("https://example.com/a"), None).validate().is_ok());
    }

    #[test]
    fn post_url_must_be_http() {
        assert!(request(Some("ftp://example.com"), None).validate().is_err());
        assert!(request(Some("not a url"), None).validate().is_err());
    }

    #[test]
    fn filter_matches_site_case_insensitively() {
        let post = Post {
            id: 1,
            author_id: "alice".to_string(),
            title: "t".to_string(),
            url: Some("https://Example.com/story".to_string()),
            content: None,
            points: 0,
            comment_count: 0,
            created_at: chrono::Utc::now(),
            is_upvoted: false,
        };
        let by_site = PostFilter {
            author: None,
            site: Some("example.COM".to_string()),
        };
        assert!(by_site.matches(&post));

        let by_author = PostFilter {
            author: Some("bob".to_string()),
            site: None,
        };
        assert!(!by_author.matches(&post));
    }
}
