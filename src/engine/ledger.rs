//! One-vote-per-user-per-item ledger.

use crate::{
    error::AppError,
    models::vote::{TargetKind, VoteOutcome, VoteTarget},
    store::Store,
};

use super::counters;

/// Toggles `user_id`'s upvote on `target`.
///
/// The target row is locked first, so concurrent toggles on the same target
/// serialize and each one observes the previous one's committed vote row.
pub async fn toggle(
    store: &dyn Store,
    user_id: &str,
    target: VoteTarget,
) -> Result<VoteOutcome, AppError> {
    let mut tx = store.begin().await?;

    if !tx.lock_target(target).await? {
        return Err(match target.kind {
            TargetKind::Post => AppError::NotFound("Post not found".to_string()),
            TargetKind::Comment => AppError::NotFound("Comment not found".to_string()),
        });
    }

    let (delta, is_upvoted) = if tx.has_vote(user_id, target).await? {
        tx.delete_vote(user_id, target).await?;
        (-1, false)
    } else {
        tx.insert_vote(user_id, target).await?;
        (1, true)
    };

    let count = counters::on_vote_toggled(tx.as_mut(), target, delta).await?;
    tx.commit().await?;

    tracing::debug!(?target, user_id, count, is_upvoted, "vote toggled");
    Ok(VoteOutcome { count, is_upvoted })
}
