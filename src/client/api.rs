//! Transport between the client cache and the REST surface.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, header};
use serde::de::DeserializeOwned;

use crate::{
    models::{
        comment::{Comment, CommentListing, Container, CreateCommentRequest},
        envelope::{ErrorResponse, SuccessResponse},
        pagination::Paginated,
        post::{CreatePostRequest, CreatedPost, Post, PostListing},
        vote::{TargetKind, VoteOutcome, VoteTarget},
    },
    utils::session::SESSION_COOKIE,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The server answered with the failure envelope.
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        /// The message belongs to the submitted form.
        form: bool,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    /// A vote on the same item is still awaiting the server.
    #[error("a vote on this item is already pending")]
    MutationInFlight,

    #[error("mutation already resolved")]
    AlreadyResolved,
}

impl ClientError {
    /// Failures worth retrying for idempotent reads.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Api { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Api { status: 404, .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

/// Server operations the cache and coordinator depend on.
#[async_trait]
pub trait ForumApi: Send + Sync {
    async fn list_posts(
        &self,
        listing: &PostListing,
        page: i64,
    ) -> Result<Paginated<Post>, ClientError>;

    async fn get_post(&self, id: i64) -> Result<Post, ClientError>;

    async fn list_comments(
        &self,
        listing: &CommentListing,
        page: i64,
    ) -> Result<Paginated<Comment>, ClientError>;

    async fn toggle_vote(&self, target: VoteTarget) -> Result<VoteOutcome, ClientError>;

    async fn create_comment(
        &self,
        container: Container,
        content: &str,
    ) -> Result<Comment, ClientError>;

    async fn create_post(&self, request: &CreatePostRequest) -> Result<i64, ClientError>;
}

/// `ForumApi` over HTTP. Reads retry transient failures; writes never retry.
#[derive(Debug, Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
    session: Option<String>,
    read_attempts: u32,
    retry_delay: Duration,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: None,
            read_attempts: 3,
            retry_delay: Duration::from_millis(200),
        }
    }

    /// Sends `token` as the session cookie on every request.
    pub fn with_session(mut self, token: impl Into<String>) -> Self {
        self.session = Some(token.into());
        self
    }

    pub fn with_read_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.read_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}/api{}", self.base_url, path));
        match &self.session {
            Some(token) => builder.header(header::COOKIE, format!("{SESSION_COOKIE}={token}")),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<SuccessResponse<T>, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()));
        }

        Err(match serde_json::from_slice::<ErrorResponse>(&body) {
            Ok(envelope) => ClientError::Api {
                status: status.as_u16(),
                message: envelope.error,
                form: envelope.is_form_error,
            },
            Err(_) => ClientError::Api {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
                form: false,
            },
        })
    }

    /// GET with transparent retries on transient failures.
    async fn read<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<SuccessResponse<T>, ClientError> {
        let mut attempt = 1;
        loop {
            let request = self.request(Method::GET, path).query(query);
            match self.send(request).await {
                Err(err) if err.is_transient() && attempt < self.read_attempts => {
                    tracing::warn!(path, attempt, error = %err, "read failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                result => return result,
            }
        }
    }

    async fn read_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Paginated<T>, ClientError> {
        self.read::<Vec<T>>(path, query)
            .await?
            .into_page()
            .ok_or_else(|| ClientError::Decode("missing pagination".to_string()))
    }
}

#[async_trait]
impl ForumApi for HttpApi {
    async fn list_posts(
        &self,
        listing: &PostListing,
        page: i64,
    ) -> Result<Paginated<Post>, ClientError> {
        let mut query = vec![
            ("page", page.to_string()),
            ("sortBy", listing.sorting.sort_by.as_str().to_string()),
            ("order", listing.sorting.order.as_str().to_string()),
        ];
        if let Some(author) = &listing.filter.author {
            query.push(("author", author.clone()));
        }
        if let Some(site) = &listing.filter.site {
            query.push(("site", site.clone()));
        }
        self.read_page("/posts", &query).await
    }

    async fn get_post(&self, id: i64) -> Result<Post, ClientError> {
        Ok(self.read(&format!("/posts/{id}"), &[]).await?.data)
    }

    async fn list_comments(
        &self,
        listing: &CommentListing,
        page: i64,
    ) -> Result<Paginated<Comment>, ClientError> {
        let path = match listing.container {
            Container::Post(id) => format!("/posts/{id}/comments"),
            Container::Comment(id) => format!("/comments/{id}/comments"),
        };
        let query = [
            ("page", page.to_string()),
            ("sortBy", listing.sorting.sort_by.as_str().to_string()),
            ("order", listing.sorting.order.as_str().to_string()),
        ];
        self.read_page(&path, &query).await
    }

    async fn toggle_vote(&self, target: VoteTarget) -> Result<VoteOutcome, ClientError> {
        let path = match target.kind {
            TargetKind::Post => format!("/posts/{}/upvote", target.id),
            TargetKind::Comment => format!("/comments/{}/upvote", target.id),
        };
        Ok(self.send(self.request(Method::POST, &path)).await?.data)
    }

    async fn create_comment(
        &self,
        container: Container,
        content: &str,
    ) -> Result<Comment, ClientError> {
        let path = match container {
            Container::Post(id) => format!("/posts/{id}/comment"),
            Container::Comment(id) => format!("/comments/{id}"),
        };
        let body = CreateCommentRequest {
            content: content.to_string(),
        };
        let request = self.request(Method::POST, &path).json(&body);
        Ok(self.send(request).await?.data)
    }

    async fn create_post(&self, request: &CreatePostRequest) -> Result<i64, ClientError> {
        let request = self.request(Method::POST, "/posts").json(request);
        let created: SuccessResponse<CreatedPost> = self.send(request).await?;
        Ok(created.data.post_id)
    }
}
