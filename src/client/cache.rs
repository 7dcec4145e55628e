//! Client-side query cache.
//!
//! One entry per query key. The same post or comment may sit in many
//! entries at once; every mutation of an entity is applied to all of them
//! under a single lock so no reader sees a half-patched view.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::models::{
    comment::{Comment, CommentListing},
    pagination::{Paginated, Pagination},
    post::{Post, PostListing},
    vote::{TargetKind, VoteTarget},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Posts { listing: PostListing, page: i64 },
    Post(i64),
    Comments { listing: CommentListing, page: i64 },
}

impl QueryKey {
    /// First page of a comment listing, where new comments are predicted.
    pub fn first_comments(listing: CommentListing) -> Self {
        QueryKey::Comments { listing, page: 1 }
    }

    /// Keys whose response may include `target`.
    pub fn may_contain(&self, target: VoteTarget) -> bool {
        match (self, target.kind) {
            (QueryKey::Post(id), TargetKind::Post) => *id == target.id,
            (QueryKey::Posts { .. }, TargetKind::Post) => true,
            (QueryKey::Comments { .. }, TargetKind::Comment) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Posts(Paginated<Post>),
    Post(Post),
    Comments(Paginated<Comment>),
}

/// Mutable view of the counters every votable entity carries.
pub struct Counters<'a> {
    pub points: &'a mut i32,
    pub is_upvoted: &'a mut bool,
    pub comment_count: &'a mut i32,
}

impl CachedValue {
    pub fn pagination(&self) -> Option<Pagination> {
        match self {
            CachedValue::Posts(page) => Some(page.pagination),
            CachedValue::Comments(page) => Some(page.pagination),
            CachedValue::Post(_) => None,
        }
    }

    pub fn contains(&self, target: VoteTarget) -> bool {
        self.counters_of(target).is_some()
    }

    /// `(points, is_upvoted, comment_count)` of the first view of `target`.
    pub fn counters_of(&self, target: VoteTarget) -> Option<(i32, bool, i32)> {
        match (self, target.kind) {
            (CachedValue::Post(post), TargetKind::Post) if post.id == target.id => {
                Some((post.points, post.is_upvoted, post.comment_count))
            }
            (CachedValue::Posts(page), TargetKind::Post) => page
                .data
                .iter()
                .find(|p| p.id == target.id)
                .map(|p| (p.points, p.is_upvoted, p.comment_count)),
            (CachedValue::Comments(page), TargetKind::Comment) => {
                find_comment(&page.data, target.id)
                    .map(|c| (c.points, c.is_upvoted, c.comment_count))
            }
            _ => None,
        }
    }

    pub fn find_comment(&self, id: i64) -> Option<&Comment> {
        match self {
            CachedValue::Comments(page) => find_comment(&page.data, id),
            _ => None,
        }
    }

    /// Applies `patch` to every view of `target`. Returns whether any matched.
    pub fn patch(&mut self, target: VoteTarget, patch: &mut dyn FnMut(Counters<'_>)) -> bool {
        let mut matched = false;
        match (self, target.kind) {
            (CachedValue::Post(post), TargetKind::Post) => {
                if post.id == target.id {
                    patch(post_counters(post));
                    matched = true;
                }
            }
            (CachedValue::Posts(page), TargetKind::Post) => {
                for post in page.data.iter_mut().filter(|p| p.id == target.id) {
                    patch(post_counters(post));
                    matched = true;
                }
            }
            (CachedValue::Comments(page), TargetKind::Comment) => {
                visit_comments(&mut page.data, target.id, &mut |comment: &mut Comment| {
                    patch(Counters {
                        points: &mut comment.points,
                        is_upvoted: &mut comment.is_upvoted,
                        comment_count: &mut comment.comment_count,
                    });
                    matched = true;
                });
            }
            _ => {}
        }
        matched
    }
}

fn post_counters(post: &mut Post) -> Counters<'_> {
    Counters {
        points: &mut post.points,
        is_upvoted: &mut post.is_upvoted,
        comment_count: &mut post.comment_count,
    }
}

fn find_comment(comments: &[Comment], id: i64) -> Option<&Comment> {
    for comment in comments {
        if comment.id == id {
            return Some(comment);
        }
        if let Some(found) = comment
            .child_comments
            .as_deref()
            .and_then(|children| find_comment(children, id))
        {
            return Some(found);
        }
    }
    None
}

fn visit_comments(comments: &mut [Comment], id: i64, f: &mut dyn FnMut(&mut Comment)) {
    for comment in comments {
        if comment.id == id {
            f(&mut *comment);
        }
        if let Some(children) = comment.child_comments.as_mut() {
            visit_comments(children, id, f);
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: CachedValue,
    stale: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct FetchState {
    generation: u64,
    in_flight: bool,
}

/// Handle for one read request. Stored only if still current on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: QueryKey,
    generation: u64,
}

/// Deep copies of entries taken before a prediction. `None` records that the
/// entry did not exist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreImage {
    entries: Vec<(QueryKey, Option<CachedValue>)>,
}

impl PreImage {
    pub fn get(&self, key: &QueryKey) -> Option<&Option<CachedValue>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// The cache contents. Only reachable through [`QueryCache::write`] or the
/// locking helpers on [`QueryCache`].
#[derive(Debug, Default)]
pub struct CacheTables {
    entries: HashMap<QueryKey, Entry>,
    fetches: HashMap<QueryKey, FetchState>,
    observers: HashMap<QueryKey, usize>,
}

impl CacheTables {
    pub fn get(&self, key: &QueryKey) -> Option<&CachedValue> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn contains_key(&self, key: &QueryKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.entries.keys().cloned().collect()
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.entries.get(key).is_some_and(|e| e.stale)
    }

    pub fn is_active(&self, key: &QueryKey) -> bool {
        self.observers.get(key).is_some_and(|n| *n > 0)
    }

    pub fn set(&mut self, key: QueryKey, value: CachedValue) {
        self.entries.insert(key, Entry { value, stale: false });
    }

    pub fn remove(&mut self, key: &QueryKey) {
        self.entries.remove(key);
    }

    pub fn mark_stale(&mut self, keys: &[QueryKey]) {
        for key in keys {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.stale = true;
            }
        }
    }

    /// Entries currently holding a view of `target`.
    pub fn keys_containing(&self, target: VoteTarget) -> Vec<QueryKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.value.contains(target))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Comment listings holding any comment of post `post_id`.
    pub fn comment_listings_of_post(&self, post_id: i64) -> Vec<QueryKey> {
        self.entries
            .iter()
            .filter(|(k, _)| matches!(k, QueryKey::Comments { .. }))
            .filter(|(_, e)| match &e.value {
                CachedValue::Comments(page) => page.data.iter().any(|c| c.post_id == post_id),
                _ => false,
            })
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Any cached view of comment `id`.
    pub fn find_comment(&self, id: i64) -> Option<&Comment> {
        self.entries.values().find_map(|e| e.value.find_comment(id))
    }

    pub fn begin_fetch(&mut self, key: &QueryKey) -> FetchTicket {
        let state = self.fetches.entry(key.clone()).or_default();
        state.generation += 1;
        state.in_flight = true;
        FetchTicket {
            key: key.clone(),
            generation: state.generation,
        }
    }

    /// Stores `value` if `ticket` is still the latest fetch for its key.
    pub fn complete_fetch(&mut self, ticket: &FetchTicket, value: CachedValue) -> bool {
        let Some(state) = self
            .fetches
            .get_mut(&ticket.key)
            .filter(|s| s.generation == ticket.generation)
        else {
            return false;
        };
        state.in_flight = false;
        self.set(ticket.key.clone(), value);
        true
    }

    /// Forgets a failed fetch so the key can be fetched again.
    pub fn fail_fetch(&mut self, ticket: &FetchTicket) {
        if let Some(state) = self.fetches.get_mut(&ticket.key) {
            if state.generation == ticket.generation {
                state.in_flight = false;
            }
        }
    }

    /// Cancels in-flight reads for `keys`; their responses will be dropped.
    /// Returns the keys that had a read in flight.
    pub fn cancel_fetches<'a>(
        &mut self,
        keys: impl IntoIterator<Item = &'a QueryKey>,
    ) -> Vec<QueryKey> {
        let mut cancelled = Vec::new();
        for key in keys {
            if let Some(state) = self.fetches.get_mut(key) {
                if state.in_flight {
                    state.generation += 1;
                    state.in_flight = false;
                    cancelled.push(key.clone());
                }
            }
        }
        cancelled
    }

    /// Keys with a read in flight that may return a view of `target`.
    pub fn fetching_for(&self, target: VoteTarget) -> Vec<QueryKey> {
        self.fetches
            .iter()
            .filter(|(k, f)| f.in_flight && k.may_contain(target))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn capture(&self, keys: &[QueryKey]) -> PreImage {
        PreImage {
            entries: keys
                .iter()
                .map(|k| (k.clone(), self.get(k).cloned()))
                .collect(),
        }
    }

    /// Applies `patch` to every view of `target` in every entry.
    /// Returns the keys that were touched.
    pub fn patch(
        &mut self,
        target: VoteTarget,
        mut patch: impl FnMut(Counters<'_>),
    ) -> Vec<QueryKey> {
        let mut touched = Vec::new();
        for (key, entry) in self.entries.iter_mut() {
            if entry.value.patch(target, &mut patch) {
                touched.push(key.clone());
            }
        }
        touched
    }

    /// Writes the vote counters recorded in `pre_image` back into each
    /// captured entry. Other fields, and entries not captured, are untouched.
    pub fn restore_votes(&mut self, pre_image: &PreImage, target: VoteTarget) {
        for (key, snapshot) in &pre_image.entries {
            let Some((points, is_upvoted, _)) =
                snapshot.as_ref().and_then(|s| s.counters_of(target))
            else {
                continue;
            };
            if let Some(entry) = self.entries.get_mut(key) {
                entry.value.patch(target, &mut |c: Counters<'_>| {
                    *c.points = points;
                    *c.is_upvoted = is_upvoted;
                });
            }
        }
    }

    /// Puts `comment` at the head of a comment page, creating the page if it
    /// is not cached yet.
    pub fn prepend_comment(&mut self, key: &QueryKey, comment: Comment) {
        if !self.entries.contains_key(key) {
            let mut page = Paginated::empty(1);
            page.data.push(comment);
            page.pagination.total_pages = 1;
            self.set(key.clone(), CachedValue::Comments(page));
            return;
        }
        if let Some(Entry {
            value: CachedValue::Comments(page),
            ..
        }) = self.entries.get_mut(key)
        {
            page.data.insert(0, comment);
            page.pagination.total_pages = page.pagination.total_pages.max(1);
        }
    }

    /// Swaps the placeholder for the server's record at the same index.
    pub fn replace_comment(
        &mut self,
        key: &QueryKey,
        placeholder_id: i64,
        comment: Comment,
    ) -> bool {
        if let Some(Entry {
            value: CachedValue::Comments(page),
            ..
        }) = self.entries.get_mut(key)
        {
            if let Some(slot) = page.data.iter_mut().find(|c| c.id == placeholder_id) {
                *slot = comment;
                return true;
            }
        }
        false
    }

    /// Removes the placeholder and restores the page to `snapshot`'s
    /// pagination, or drops the entry when there was no snapshot.
    pub fn restore_listing(
        &mut self,
        key: &QueryKey,
        snapshot: Option<&CachedValue>,
        placeholder_id: i64,
    ) {
        let Some(snapshot) = snapshot else {
            self.entries.remove(key);
            return;
        };
        if let Some(Entry {
            value: CachedValue::Comments(page),
            ..
        }) = self.entries.get_mut(key)
        {
            page.data.retain(|c| c.id != placeholder_id);
            if let Some(pagination) = snapshot.pagination() {
                page.pagination = pagination;
            }
        }
    }
}

/// Thread-safe handle around [`CacheTables`].
#[derive(Debug, Default)]
pub struct QueryCache {
    tables: Mutex<CacheTables>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access. Everything `f` does is observed by
    /// readers as a single step.
    pub fn write<R>(&self, f: impl FnOnce(&mut CacheTables) -> R) -> R {
        f(&mut self.lock())
    }

    /// Deep copy of the entry at `key`.
    pub fn get(&self, key: &QueryKey) -> Option<CachedValue> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: QueryKey, value: CachedValue) {
        self.lock().set(key, value);
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.lock().is_stale(key)
    }

    pub fn is_active(&self, key: &QueryKey) -> bool {
        self.lock().is_active(key)
    }

    /// Registers an observer. Returns true when the entry must be fetched:
    /// it is missing or stale.
    pub fn activate(&self, key: &QueryKey) -> bool {
        let mut tables = self.lock();
        *tables.observers.entry(key.clone()).or_default() += 1;
        !tables.contains_key(key) || tables.is_stale(key)
    }

    pub fn deactivate(&self, key: &QueryKey) {
        let mut tables = self.lock();
        if let Some(count) = tables.observers.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                tables.observers.remove(key);
            }
        }
    }

    pub fn begin_fetch(&self, key: &QueryKey) -> FetchTicket {
        self.lock().begin_fetch(key)
    }

    pub fn complete_fetch(&self, ticket: &FetchTicket, value: CachedValue) -> bool {
        self.lock().complete_fetch(ticket, value)
    }

    pub fn fail_fetch(&self, ticket: &FetchTicket) {
        self.lock().fail_fetch(ticket);
    }
}
