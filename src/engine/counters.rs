//! Denormalized `points` and `comment_count` maintenance.
//!
//! Both aggregations run inside the caller's transaction, so a failure at
//! any step discards the row change together with every counter already
//! touched.

use crate::{
    error::AppError,
    models::{
        comment::{Comment, Container, NewComment},
        vote::VoteTarget,
    },
    store::{Store, StoreTx},
};

/// Bumps the owning post and every ancestor comment of a new comment.
///
/// The ancestor walk follows parent ids and is bounded by the stored depth:
/// a comment at depth `d` has exactly `d` ancestor comments, so a longer
/// chain means the tree is corrupt.
pub async fn on_comment_created(tx: &mut dyn StoreTx, comment: &Comment) -> Result<(), AppError> {
    tx.add_post_comment_count(comment.post_id, 1).await?;

    let mut next = comment.parent_comment_id;
    let mut steps = 0;
    while let Some(ancestor) = next {
        if steps >= comment.depth {
            return Err(AppError::InternalServerError(format!(
                "comment {} has an ancestor chain deeper than its depth {}",
                comment.id, comment.depth
            )));
        }
        next = tx.add_comment_comment_count(ancestor, 1).await?;
        steps += 1;
    }

    tracing::debug!(
        comment_id = comment.id,
        post_id = comment.post_id,
        ancestors = steps,
        "comment counters applied"
    );
    Ok(())
}

/// Applies a vote delta to the target's points and returns the new total.
pub async fn on_vote_toggled(
    tx: &mut dyn StoreTx,
    target: VoteTarget,
    delta: i32,
) -> Result<i32, AppError> {
    debug_assert!(delta == 1 || delta == -1);
    tx.add_points(target, delta).await
}

/// Inserts a comment under `container` and aggregates its counters in one
/// transaction.
///
/// `content` must already be validated and sanitized.
pub async fn create_comment(
    store: &dyn Store,
    author_id: &str,
    container: Container,
    content: &str,
) -> Result<Comment, AppError> {
    let mut tx = store.begin().await?;

    let (post_id, parent_comment_id, depth) = match container {
        Container::Post(post_id) => {
            tx.find_post(post_id, None)
                .await?
                .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;
            (post_id, None, 0)
        }
        Container::Comment(parent_id) => {
            let parent = tx
                .find_comment(parent_id, None)
                .await?
                .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;
            (parent.post_id, Some(parent.id), parent.depth + 1)
        }
    };

    let comment = tx
        .insert_comment(&NewComment {
            author_id: author_id.to_string(),
            post_id,
            parent_comment_id,
            content: content.to_string(),
            depth,
        })
        .await?;

    on_comment_created(tx.as_mut(), &comment).await?;
    tx.commit().await?;

    tracing::info!(comment_id = comment.id, post_id, depth, "comment created");
    Ok(comment)
}
