//! In-process store used when no `DATABASE_URL` is configured, and by tests.
//!
//! Comments live in an arena keyed by id with a per-container child index;
//! parents are reached by id lookup. A transaction holds the table lock for
//! its whole lifetime and writes in place, logging the inverse of each write.
//! Dropping it without a commit replays the log newest first.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Store, StoreTx};
use crate::{
    error::AppError,
    models::{
        comment::{Comment, Container, NewComment},
        pagination::{PageRequest, SortBy, Sorting},
        post::{NewPost, Post, PostFilter},
        vote::{TargetKind, VoteTarget},
    },
};

#[derive(Debug, Default)]
struct Tables {
    posts: BTreeMap<i64, Post>,
    comments: BTreeMap<i64, Comment>,
    children: HashMap<Container, Vec<i64>>,
    post_votes: HashSet<(String, i64)>,
    comment_votes: HashSet<(String, i64)>,
    last_post_id: i64,
    last_comment_id: i64,
    last_created_at: Option<DateTime<Utc>>,
}

impl Tables {
    /// Strictly increasing creation timestamps.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_created_at {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(ts);
        ts
    }

    fn votes(&self, kind: TargetKind) -> &HashSet<(String, i64)> {
        match kind {
            TargetKind::Post => &self.post_votes,
            TargetKind::Comment => &self.comment_votes,
        }
    }

    fn votes_mut(&mut self, kind: TargetKind) -> &mut HashSet<(String, i64)> {
        match kind {
            TargetKind::Post => &mut self.post_votes,
            TargetKind::Comment => &mut self.comment_votes,
        }
    }

    fn has_vote(&self, viewer: Option<&str>, target: VoteTarget) -> bool {
        viewer.is_some_and(|user| {
            self.votes(target.kind)
                .contains(&(user.to_string(), target.id))
        })
    }

    fn post_view(&self, post: &Post, viewer: Option<&str>) -> Post {
        let mut post = post.clone();
        post.is_upvoted = self.has_vote(viewer, VoteTarget::post(post.id));
        post
    }

    fn comment_view(&self, comment: &Comment, viewer: Option<&str>) -> Comment {
        let mut comment = comment.clone();
        comment.is_upvoted = self.has_vote(viewer, VoteTarget::comment(comment.id));
        comment
    }
}

/// Inverse of one write.
#[derive(Debug)]
enum Undo {
    InsertPost {
        id: i64,
        last_created_at: Option<DateTime<Utc>>,
    },
    InsertComment {
        id: i64,
        container: Container,
        last_created_at: Option<DateTime<Utc>>,
    },
    PostCommentCount(i64, i32),
    CommentCommentCount(i64, i32),
    Points(VoteTarget, i32),
    VoteInserted(TargetKind, (String, i64)),
    VoteDeleted(TargetKind, (String, i64)),
}

impl Undo {
    fn revert(self, tables: &mut Tables) {
        match self {
            Undo::InsertPost { id, last_created_at } => {
                tables.posts.remove(&id);
                tables.last_post_id = id - 1;
                tables.last_created_at = last_created_at;
            }
            Undo::InsertComment {
                id,
                container,
                last_created_at,
            } => {
                tables.comments.remove(&id);
                if let Some(children) = tables.children.get_mut(&container) {
                    children.retain(|child| *child != id);
                    if children.is_empty() {
                        tables.children.remove(&container);
                    }
                }
                tables.last_comment_id = id - 1;
                tables.last_created_at = last_created_at;
            }
            Undo::PostCommentCount(id, delta) => {
                if let Some(post) = tables.posts.get_mut(&id) {
                    post.comment_count -= delta;
                }
            }
            Undo::CommentCommentCount(id, delta) => {
                if let Some(comment) = tables.comments.get_mut(&id) {
                    comment.comment_count -= delta;
                }
            }
            Undo::Points(target, delta) => {
                let points = match target.kind {
                    TargetKind::Post => tables.posts.get_mut(&target.id).map(|p| &mut p.points),
                    TargetKind::Comment => {
                        tables.comments.get_mut(&target.id).map(|c| &mut c.points)
                    }
                };
                if let Some(points) = points {
                    *points -= delta;
                }
            }
            Undo::VoteInserted(kind, vote) => {
                tables.votes_mut(kind).remove(&vote);
            }
            Undo::VoteDeleted(kind, vote) => {
                tables.votes_mut(kind).insert(vote);
            }
        }
    }
}

/// Ascending comparison for a sort key; `id` breaks remaining ties so the
/// order is total.
fn compare(
    sorting: Sorting,
    a: (i32, DateTime<Utc>, i64),
    b: (i32, DateTime<Utc>, i64),
) -> Ordering {
    let ascending = match sorting.sort_by {
        SortBy::Points => a.0.cmp(&b.0).then(a.1.cmp(&b.1)),
        SortBy::Recent => a.1.cmp(&b.1),
    }
    .then(a.2.cmp(&b.2));
    sorting.order.apply(ascending)
}

fn page_bounds(page: PageRequest) -> (usize, usize) {
    let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
    let size = usize::try_from(page.size).unwrap_or(0);
    (offset, size)
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open(&self) -> MemoryTx {
        MemoryTx {
            guard: self.tables.clone().lock_owned().await,
            undo: Vec::new(),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        Ok(Box::new(self.open().await))
    }

    async fn snapshot(&self) -> Result<Box<dyn StoreTx>, AppError> {
        Ok(Box::new(self.open().await))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    /// Inverses of the writes made so far, oldest first.
    undo: Vec<Undo>,
}

impl MemoryTx {
    fn tables(&self) -> &Tables {
        &self.guard
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            tracing::debug!(writes = self.undo.len(), "rolling back uncommitted transaction");
        }
        while let Some(undo) = self.undo.pop() {
            undo.revert(&mut self.guard);
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_post(
        &mut self,
        id: i64,
        viewer: Option<&str>,
    ) -> Result<Option<Post>, AppError> {
        let tables = self.tables();
        Ok(tables.posts.get(&id).map(|p| tables.post_view(p, viewer)))
    }

    async fn insert_post(&mut self, post: &NewPost) -> Result<Post, AppError> {
        let tables = &mut *self.guard;
        let last_created_at = tables.last_created_at;
        tables.last_post_id += 1;
        let row = Post {
            id: tables.last_post_id,
            author_id: post.author_id.clone(),
            title: post.title.clone(),
            url: post.url.clone(),
            content: post.content.clone(),
            points: 0,
            comment_count: 0,
            created_at: tables.next_timestamp(),
            is_upvoted: false,
        };
        tables.posts.insert(row.id, row.clone());
        self.undo.push(Undo::InsertPost {
            id: row.id,
            last_created_at,
        });
        Ok(row)
    }

    async fn count_posts(&mut self, filter: &PostFilter) -> Result<i64, AppError> {
        let count = self
            .tables()
            .posts
            .values()
            .filter(|p| filter.matches(p))
            .count();
        Ok(count as i64)
    }

    async fn fetch_posts(
        &mut self,
        filter: &PostFilter,
        sorting: Sorting,
        page: PageRequest,
        viewer: Option<&str>,
    ) -> Result<Vec<Post>, AppError> {
        let tables = self.tables();
        let mut rows: Vec<&Post> = tables.posts.values().filter(|p| filter.matches(p)).collect();
        rows.sort_by(|a, b| {
            compare(
                sorting,
                (a.points, a.created_at, a.id),
                (b.points, b.created_at, b.id),
            )
        });
        let (offset, size) = page_bounds(page);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(size)
            .map(|p| tables.post_view(p, viewer))
            .collect())
    }

    async fn find_comment(
        &mut self,
        id: i64,
        viewer: Option<&str>,
    ) -> Result<Option<Comment>, AppError> {
        let tables = self.tables();
        Ok(tables.comments.get(&id).map(|c| tables.comment_view(c, viewer)))
    }

    async fn insert_comment(&mut self, comment: &NewComment) -> Result<Comment, AppError> {
        let tables = &mut *self.guard;
        if !tables.posts.contains_key(&comment.post_id) {
            return Err(AppError::NotFound("Post not found".to_string()));
        }
        if let Some(parent) = comment.parent_comment_id {
            if !tables.comments.contains_key(&parent) {
                return Err(AppError::NotFound("Comment not found".to_string()));
            }
        }

        let last_created_at = tables.last_created_at;
        tables.last_comment_id += 1;
        let row = Comment {
            id: tables.last_comment_id,
            author_id: comment.author_id.clone(),
            post_id: comment.post_id,
            parent_comment_id: comment.parent_comment_id,
            content: comment.content.clone(),
            depth: comment.depth,
            points: 0,
            comment_count: 0,
            created_at: tables.next_timestamp(),
            is_upvoted: false,
            child_comments: None,
        };
        tables
            .children
            .entry(row.container())
            .or_default()
            .push(row.id);
        tables.comments.insert(row.id, row.clone());
        self.undo.push(Undo::InsertComment {
            id: row.id,
            container: row.container(),
            last_created_at,
        });
        Ok(row)
    }

    async fn count_children(&mut self, container: Container) -> Result<i64, AppError> {
        let count = self
            .tables()
            .children
            .get(&container)
            .map_or(0, Vec::len);
        Ok(count as i64)
    }

    async fn fetch_children(
        &mut self,
        container: Container,
        sorting: Sorting,
        page: PageRequest,
        viewer: Option<&str>,
    ) -> Result<Vec<Comment>, AppError> {
        let tables = self.tables();
        let mut rows: Vec<&Comment> = tables
            .children
            .get(&container)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.comments.get(id))
            .collect();
        rows.sort_by(|a, b| {
            compare(
                sorting,
                (a.points, a.created_at, a.id),
                (b.points, b.created_at, b.id),
            )
        });
        let (offset, size) = page_bounds(page);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(size)
            .map(|c| tables.comment_view(c, viewer))
            .collect())
    }

    async fn add_post_comment_count(&mut self, post_id: i64, delta: i32) -> Result<(), AppError> {
        let post = self
            .guard
            .posts
            .get_mut(&post_id)
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;
        post.comment_count += delta;
        self.undo.push(Undo::PostCommentCount(post_id, delta));
        Ok(())
    }

    async fn add_comment_comment_count(
        &mut self,
        comment_id: i64,
        delta: i32,
    ) -> Result<Option<i64>, AppError> {
        let comment = self
            .guard
            .comments
            .get_mut(&comment_id)
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;
        comment.comment_count += delta;
        let parent = comment.parent_comment_id;
        self.undo.push(Undo::CommentCommentCount(comment_id, delta));
        Ok(parent)
    }

    async fn lock_target(&mut self, target: VoteTarget) -> Result<bool, AppError> {
        // The whole table set is already locked by this transaction.
        let tables = self.tables();
        Ok(match target.kind {
            TargetKind::Post => tables.posts.contains_key(&target.id),
            TargetKind::Comment => tables.comments.contains_key(&target.id),
        })
    }

    async fn add_points(&mut self, target: VoteTarget, delta: i32) -> Result<i32, AppError> {
        let tables = &mut *self.guard;
        let points = match target.kind {
            TargetKind::Post => tables.posts.get_mut(&target.id).map(|p| &mut p.points),
            TargetKind::Comment => tables.comments.get_mut(&target.id).map(|c| &mut c.points),
        }
        .ok_or_else(|| AppError::NotFound("Vote target not found".to_string()))?;
        *points += delta;
        let points = *points;
        self.undo.push(Undo::Points(target, delta));
        Ok(points)
    }

    async fn has_vote(&mut self, user_id: &str, target: VoteTarget) -> Result<bool, AppError> {
        Ok(self.tables().has_vote(Some(user_id), target))
    }

    async fn insert_vote(&mut self, user_id: &str, target: VoteTarget) -> Result<(), AppError> {
        let vote = (user_id.to_string(), target.id);
        if !self.guard.votes_mut(target.kind).insert(vote.clone()) {
            return Err(AppError::Conflict("Already upvoted".to_string()));
        }
        self.undo.push(Undo::VoteInserted(target.kind, vote));
        Ok(())
    }

    async fn delete_vote(&mut self, user_id: &str, target: VoteTarget) -> Result<bool, AppError> {
        let vote = (user_id.to_string(), target.id);
        let removed = self.guard.votes_mut(target.kind).remove(&vote);
        if removed {
            self.undo.push(Undo::VoteDeleted(target.kind, vote));
        }
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let mut tx = self;
        tx.undo.clear();
        Ok(())
    }
}
