use std::sync::Arc;

use axum::{Extension, Json, extract::State, response::IntoResponse};

use super::extract::ApiPath;
use crate::{
    engine::ledger,
    error::AppError,
    models::{envelope::SuccessResponse, vote::VoteTarget},
    store::Store,
    utils::session::Viewer,
};

/// Toggle the viewer's upvote on a post.
pub async fn upvote_post(
    State(store): State<Arc<dyn Store>>,
    Extension(viewer): Extension<Viewer>,
    ApiPath(post_id): ApiPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = viewer.require()?;
    let outcome = ledger::toggle(store.as_ref(), user_id, VoteTarget::post(post_id)).await?;
    Ok(Json(SuccessResponse::new("Post updated", outcome)))
}

/// Toggle the viewer's upvote on a comment.
pub async fn upvote_comment(
    State(store): State<Arc<dyn Store>>,
    Extension(viewer): Extension<Viewer>,
    ApiPath(comment_id): ApiPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = viewer.require()?;
    let outcome = ledger::toggle(store.as_ref(), user_id, VoteTarget::comment(comment_id)).await?;
    Ok(Json(SuccessResponse::new("Comment updated", outcome)))
}
