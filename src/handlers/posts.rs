use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use validator::Validate;

use super::extract::{ApiJson, ApiPath, ApiQuery};
use crate::{
    engine::tree,
    error::AppError,
    models::{
        envelope::SuccessResponse,
        pagination::{POST_PAGE_SIZE, PageRequest},
        post::{CreatePostRequest, CreatedPost, NewPost, PostListParams},
    },
    store::Store,
    utils::{
        html::{clean_html, clean_optional},
        session::Viewer,
    },
};

/// Create a new post.
/// Requires: a session.
pub async fn create_post(
    State(store): State<Arc<dyn Store>>,
    Extension(viewer): Extension<Viewer>,
    ApiJson(payload): ApiJson<CreatePostRequest>,
) -> Result<impl IntoResponse, AppError> {
    let author_id = viewer.require()?;

    let payload = CreatePostRequest {
        title: clean_html(payload.title.trim()),
        url: payload.url,
        content: clean_optional(payload.content.as_deref()),
    }
    .normalized();
    payload.validate()?;

    let mut tx = store.begin().await?;
    let post = tx
        .insert_post(&NewPost {
            author_id: author_id.to_string(),
            title: payload.title,
            url: payload.url,
            content: payload.content,
        })
        .await?;
    tx.commit().await?;

    tracing::info!(post_id = post.id, author_id, "post created");

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::new(
            "Post created",
            CreatedPost { post_id: post.id },
        )),
    ))
}

/// List posts, paged, sorted and optionally filtered by author or site.
pub async fn list_posts(
    State(store): State<Arc<dyn Store>>,
    Extension(viewer): Extension<Viewer>,
    ApiQuery(params): ApiQuery<PostListParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;

    let listing = params.listing();
    let page = PageRequest::new(params.page, params.limit, POST_PAGE_SIZE);
    let posts = tree::list_posts(
        store.as_ref(),
        &listing.filter,
        listing.sorting,
        page,
        viewer.user_id(),
    )
    .await?;

    Ok(Json(SuccessResponse::page("Posts fetched", posts)))
}

/// Get a single post by ID.
pub async fn get_post(
    State(store): State<Arc<dyn Store>>,
    Extension(viewer): Extension<Viewer>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let post = tree::get_post(store.as_ref(), id, viewer.user_id()).await?;
    Ok(Json(SuccessResponse::new("Post fetched", post)))
}
