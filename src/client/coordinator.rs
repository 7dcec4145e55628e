//! Optimistic writes against the query cache.
//!
//! A write is predicted into the cache before the request leaves, then
//! either confirmed with the server's values or rolled back to the deep
//! copies taken at prediction time. Votes on one item are serialized: only
//! one prediction per item may be outstanding.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicI64, Ordering},
    },
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::{
    comment::{Comment, CommentListing, Container},
    post::CreatePostRequest,
    vote::{VoteOutcome, VoteTarget},
};

use super::{
    api::{ClientError, ForumApi},
    cache::{CachedValue, PreImage, QueryCache, QueryKey},
    invalidation::{self, Refresh},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// Nothing applied to the cache.
    Idle,
    /// Applied to the cache, awaiting the server.
    Predicted,
    /// Server values written over the prediction.
    Confirmed,
    /// Cache restored to the pre-image.
    RolledBack,
}

type VoteSlots = Mutex<HashMap<VoteTarget, Arc<AsyncMutex<()>>>>;

/// Forgets the slot of `target` once nobody holds or waits on it.
fn prune_slot(slots: &VoteSlots, target: VoteTarget) {
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    if slots
        .get(&target)
        .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
        slots.remove(&target);
    }
}

/// An outstanding vote prediction. Holds the item's vote slot until
/// resolved; dropping it unresolved rolls the prediction back.
pub struct PendingVote {
    cache: Arc<QueryCache>,
    target: VoteTarget,
    pre_image: PreImage,
    state: MutationState,
    slot: Option<OwnedMutexGuard<()>>,
    slots: Arc<VoteSlots>,
}

impl PendingVote {
    pub fn target(&self) -> VoteTarget {
        self.target
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    pub fn confirm(&mut self, outcome: VoteOutcome) -> Result<Refresh, ClientError> {
        self.ensure_predicted()?;
        let refresh = self
            .cache
            .write(|t| invalidation::after_vote_confirmed(t, self.target, outcome));
        self.finish(MutationState::Confirmed);
        Ok(refresh)
    }

    pub fn roll_back(&mut self) -> Result<(), ClientError> {
        self.ensure_predicted()?;
        self.cache
            .write(|t| t.restore_votes(&self.pre_image, self.target));
        self.finish(MutationState::RolledBack);
        Ok(())
    }

    fn ensure_predicted(&self) -> Result<(), ClientError> {
        if self.state == MutationState::Predicted {
            Ok(())
        } else {
            Err(ClientError::AlreadyResolved)
        }
    }

    // The slot is released only after the cache reflects the resolution.
    fn finish(&mut self, state: MutationState) {
        self.state = state;
        self.slot = None;
        prune_slot(&self.slots, self.target);
    }
}

impl Drop for PendingVote {
    fn drop(&mut self) {
        if self.state == MutationState::Predicted {
            tracing::debug!(target_id = self.target.id, "unresolved vote dropped, rolling back");
            let _ = self.roll_back();
        }
    }
}

/// An outstanding comment prediction: a placeholder at the head of the
/// first page of its listing.
pub struct PendingComment {
    cache: Arc<QueryCache>,
    key: QueryKey,
    placeholder_id: i64,
    pre_image: PreImage,
    state: MutationState,
}

impl PendingComment {
    pub fn placeholder_id(&self) -> i64 {
        self.placeholder_id
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    pub fn confirm(&mut self, comment: &Comment) -> Result<Refresh, ClientError> {
        self.ensure_predicted()?;
        let refresh = self.cache.write(|t| {
            invalidation::after_comment_confirmed(t, &self.key, self.placeholder_id, comment)
        });
        self.state = MutationState::Confirmed;
        Ok(refresh)
    }

    pub fn roll_back(&mut self) -> Result<(), ClientError> {
        self.ensure_predicted()?;
        let snapshot = self.pre_image.get(&self.key).and_then(Option::as_ref);
        self.cache
            .write(|t| t.restore_listing(&self.key, snapshot, self.placeholder_id));
        self.state = MutationState::RolledBack;
        Ok(())
    }

    fn ensure_predicted(&self) -> Result<(), ClientError> {
        if self.state == MutationState::Predicted {
            Ok(())
        } else {
            Err(ClientError::AlreadyResolved)
        }
    }
}

impl Drop for PendingComment {
    fn drop(&mut self) {
        if self.state == MutationState::Predicted {
            let _ = self.roll_back();
        }
    }
}

/// Reads through the cache and runs optimistic writes over `api`.
pub struct Coordinator<A> {
    api: A,
    cache: Arc<QueryCache>,
    vote_slots: Arc<VoteSlots>,
    next_placeholder: AtomicI64,
    author_id: String,
}

impl<A: ForumApi> Coordinator<A> {
    pub fn new(api: A, cache: Arc<QueryCache>) -> Self {
        Self {
            api,
            cache,
            vote_slots: Arc::default(),
            next_placeholder: AtomicI64::new(-1),
            author_id: String::new(),
        }
    }

    /// Author shown on placeholders until the server's record arrives.
    pub fn with_author(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = author_id.into();
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Fetches `key` and stores the result unless a newer fetch or a
    /// prediction superseded it. Returns whether the result was stored.
    pub async fn fetch(&self, key: &QueryKey) -> Result<bool, ClientError> {
        let ticket = self.cache.begin_fetch(key);
        match self.load(key).await {
            Ok(value) => Ok(self.cache.complete_fetch(&ticket, value)),
            Err(err) => {
                self.cache.fail_fetch(&ticket);
                Err(err)
            }
        }
    }

    async fn load(&self, key: &QueryKey) -> Result<CachedValue, ClientError> {
        match key {
            QueryKey::Posts { listing, page } => self
                .api
                .list_posts(listing, *page)
                .await
                .map(CachedValue::Posts),
            QueryKey::Post(id) => self.api.get_post(*id).await.map(CachedValue::Post),
            QueryKey::Comments { listing, page } => self
                .api
                .list_comments(listing, *page)
                .await
                .map(CachedValue::Comments),
        }
    }

    /// Starts observing `key`, fetching it if missing or stale. Pair with
    /// [`Coordinator::release`].
    pub async fn view(&self, key: &QueryKey) -> Result<Option<CachedValue>, ClientError> {
        if self.cache.activate(key) {
            self.fetch(key).await?;
        }
        Ok(self.cache.get(key))
    }

    pub fn release(&self, key: &QueryKey) {
        self.cache.deactivate(key);
    }

    async fn refresh(&self, refresh: Refresh) {
        for key in refresh.refetch {
            if let Err(err) = self.fetch(&key).await {
                tracing::warn!(?key, error = %err, "refetch after write failed");
                self.cache.write(|t| t.mark_stale(std::slice::from_ref(&key)));
            }
        }
    }

    fn vote_slot(&self, target: VoteTarget) -> Arc<AsyncMutex<()>> {
        let mut slots = self
            .vote_slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slots.entry(target).or_default().clone()
    }

    pub fn vote_state(&self, target: VoteTarget) -> MutationState {
        let slots = self
            .vote_slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match slots.get(&target) {
            Some(slot) if slot.try_lock().is_err() => MutationState::Predicted,
            _ => MutationState::Idle,
        }
    }

    #[cfg(test)]
    fn tracked_slots(&self) -> usize {
        self.vote_slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Flips the vote on every cached view of `target` right away. Refused
    /// while another vote on the same item is unresolved.
    pub fn predict_vote(&self, target: VoteTarget) -> Result<PendingVote, ClientError> {
        let slot = self
            .vote_slot(target)
            .try_lock_owned()
            .map_err(|_| ClientError::MutationInFlight)?;
        Ok(self.apply_vote(target, slot))
    }

    fn apply_vote(&self, target: VoteTarget, slot: OwnedMutexGuard<()>) -> PendingVote {
        let pre_image = self.cache.write(|t| {
            // A read issued before the prediction would land without it.
            let in_flight = t.fetching_for(target);
            let cancelled = t.cancel_fetches(&in_flight);

            let keys = t.keys_containing(target);
            let pre_image = t.capture(&keys);
            t.patch(target, |c| {
                if *c.is_upvoted {
                    *c.points -= 1;
                } else {
                    *c.points += 1;
                }
                *c.is_upvoted = !*c.is_upvoted;
            });

            let dropped: Vec<QueryKey> = cancelled
                .into_iter()
                .filter(|k| !keys.contains(k))
                .collect();
            t.mark_stale(&dropped);
            pre_image
        });

        PendingVote {
            cache: self.cache.clone(),
            target,
            pre_image,
            state: MutationState::Predicted,
            slot: Some(slot),
            slots: self.vote_slots.clone(),
        }
    }

    /// Predicts, sends, then confirms or rolls back. Waits for any
    /// outstanding vote on the same item first.
    pub async fn toggle_vote(&self, target: VoteTarget) -> Result<VoteOutcome, ClientError> {
        let slot = self.vote_slot(target).lock_owned().await;
        let mut pending = self.apply_vote(target, slot);

        match self.api.toggle_vote(target).await {
            Ok(outcome) => {
                let refresh = pending.confirm(outcome)?;
                self.refresh(refresh).await;
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(?target, error = %err, "vote rejected, rolling back");
                pending.roll_back()?;
                Err(err)
            }
        }
    }

    /// Puts a placeholder for a new comment at the head of page 1 of
    /// `listing`.
    pub fn predict_comment(&self, listing: CommentListing, content: &str) -> PendingComment {
        let placeholder_id = self.next_placeholder.fetch_sub(1, Ordering::Relaxed);
        let key = QueryKey::first_comments(listing);

        let pre_image = self.cache.write(|t| {
            let (post_id, parent_comment_id, depth) = match listing.container {
                Container::Post(id) => (id, None, 0),
                Container::Comment(id) => {
                    let parent = t.find_comment(id);
                    (
                        parent.map_or(0, |p| p.post_id),
                        Some(id),
                        parent.map_or(0, |p| p.depth + 1),
                    )
                }
            };
            let placeholder = Comment {
                id: placeholder_id,
                author_id: self.author_id.clone(),
                post_id,
                parent_comment_id,
                content: content.to_string(),
                depth,
                points: 0,
                comment_count: 0,
                created_at: chrono::Utc::now(),
                is_upvoted: false,
                child_comments: None,
            };

            t.cancel_fetches([&key]);
            let pre_image = t.capture(std::slice::from_ref(&key));
            t.prepend_comment(&key, placeholder);
            pre_image
        });

        PendingComment {
            cache: self.cache.clone(),
            key,
            placeholder_id,
            pre_image,
            state: MutationState::Predicted,
        }
    }

    pub async fn create_comment(
        &self,
        listing: CommentListing,
        content: &str,
    ) -> Result<Comment, ClientError> {
        let mut pending = self.predict_comment(listing, content);

        match self.api.create_comment(listing.container, content).await {
            Ok(comment) => {
                let refresh = pending.confirm(&comment)?;
                self.refresh(refresh).await;
                Ok(comment)
            }
            Err(err) => {
                tracing::warn!(
                    container = ?listing.container,
                    error = %err,
                    "comment rejected, rolling back"
                );
                pending.roll_back()?;
                Err(err)
            }
        }
    }

    /// Posts are not predicted; post listings are invalidated on success.
    pub async fn create_post(&self, request: &CreatePostRequest) -> Result<i64, ClientError> {
        let id = self.api.create_post(request).await?;
        let refresh = self.cache.write(invalidation::after_post_created);
        self.refresh(refresh).await;
        Ok(id)
    }
}
