use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use validator::Validate;

use super::extract::{ApiJson, ApiPath, ApiQuery};
use crate::{
    engine::{
        counters,
        tree::{self, ChildrenQuery},
    },
    error::AppError,
    models::{
        comment::{Comment, CommentListParams, Container, CreateCommentRequest},
        envelope::SuccessResponse,
        pagination::{POST_PAGE_SIZE, PageRequest, REPLY_PAGE_SIZE},
    },
    store::Store,
    utils::{html::clean_html, session::Viewer},
};

/// List top-level comments of a post.
pub async fn list_post_comments(
    State(store): State<Arc<dyn Store>>,
    Extension(viewer): Extension<Viewer>,
    ApiPath(post_id): ApiPath<i64>,
    ApiQuery(params): ApiQuery<CommentListParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;

    let query = ChildrenQuery {
        container: Container::Post(post_id),
        page: PageRequest::new(params.page, params.limit, POST_PAGE_SIZE),
        sorting: params.sorting(),
        include_children: params.include_children.unwrap_or(false),
    };
    let comments = tree::list_children(store.as_ref(), query, viewer.user_id()).await?;

    Ok(Json(SuccessResponse::page("Comments fetched", comments)))
}

/// List direct replies to a comment.
pub async fn list_comment_replies(
    State(store): State<Arc<dyn Store>>,
    Extension(viewer): Extension<Viewer>,
    ApiPath(comment_id): ApiPath<i64>,
    ApiQuery(params): ApiQuery<CommentListParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;

    let query = ChildrenQuery {
        container: Container::Comment(comment_id),
        page: PageRequest::new(params.page, params.limit, REPLY_PAGE_SIZE),
        sorting: params.sorting(),
        include_children: false,
    };
    let replies = tree::list_children(store.as_ref(), query, viewer.user_id()).await?;

    Ok(Json(SuccessResponse::page("Comments fetched", replies)))
}

/// Create a top-level comment on a post.
/// Requires: a session.
pub async fn create_post_comment(
    State(store): State<Arc<dyn Store>>,
    Extension(viewer): Extension<Viewer>,
    ApiPath(post_id): ApiPath<i64>,
    ApiJson(payload): ApiJson<CreateCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    create_in(store.as_ref(), &viewer, Container::Post(post_id), payload).await
}

/// Reply to a comment.
/// Requires: a session.
pub async fn create_reply(
    State(store): State<Arc<dyn Store>>,
    Extension(viewer): Extension<Viewer>,
    ApiPath(comment_id): ApiPath<i64>,
    ApiJson(payload): ApiJson<CreateCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    create_in(store.as_ref(), &viewer, Container::Comment(comment_id), payload).await
}

async fn create_in(
    store: &dyn Store,
    viewer: &Viewer,
    container: Container,
    payload: CreateCommentRequest,
) -> Result<(StatusCode, Json<SuccessResponse<Comment>>), AppError> {
    let author_id = viewer.require()?;

    // Validate what will actually be stored.
    let payload = CreateCommentRequest {
        content: clean_html(payload.content.trim()),
    };
    payload.validate()?;

    let comment = counters::create_comment(store, author_id, container, &payload.content).await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::new("Comment created", comment)),
    ))
}
