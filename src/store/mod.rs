//! Boundary to the relational store.
//!
//! Every operation runs inside a [`StoreTx`]. Write paths open one with
//! [`Store::begin`] and commit once all rows and counters are in place;
//! dropping a transaction without committing discards its writes. Read
//! paths use [`Store::snapshot`] so that a count and the page it describes
//! observe the same state.

use async_trait::async_trait;

use crate::{
    error::AppError,
    models::{
        comment::{Comment, Container, NewComment},
        pagination::{PageRequest, Sorting},
        post::{NewPost, Post, PostFilter},
        vote::VoteTarget,
    },
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a read-write transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;

    /// Opens a read-only transaction over one consistent snapshot.
    async fn snapshot(&self) -> Result<Box<dyn StoreTx>, AppError>;
}

/// Typed primitives available inside a transaction.
///
/// Counter mutations are in-store increments (`x = x + delta`), never a
/// read followed by a write.
#[async_trait]
pub trait StoreTx: Send {
    async fn find_post(
        &mut self,
        id: i64,
        viewer: Option<&str>,
    ) -> Result<Option<Post>, AppError>;

    async fn insert_post(&mut self, post: &NewPost) -> Result<Post, AppError>;

    async fn count_posts(&mut self, filter: &PostFilter) -> Result<i64, AppError>;

    async fn fetch_posts(
        &mut self,
        filter: &PostFilter,
        sorting: Sorting,
        page: PageRequest,
        viewer: Option<&str>,
    ) -> Result<Vec<Post>, AppError>;

    async fn find_comment(
        &mut self,
        id: i64,
        viewer: Option<&str>,
    ) -> Result<Option<Comment>, AppError>;

    async fn insert_comment(&mut self, comment: &NewComment) -> Result<Comment, AppError>;

    /// Number of direct children of the container.
    async fn count_children(&mut self, container: Container) -> Result<i64, AppError>;

    /// One page of direct children of the container.
    async fn fetch_children(
        &mut self,
        container: Container,
        sorting: Sorting,
        page: PageRequest,
        viewer: Option<&str>,
    ) -> Result<Vec<Comment>, AppError>;

    /// Applies `delta` to a post's comment counter.
    async fn add_post_comment_count(&mut self, post_id: i64, delta: i32) -> Result<(), AppError>;

    /// Applies `delta` to a comment's descendant counter and returns that
    /// comment's parent id.
    async fn add_comment_comment_count(
        &mut self,
        comment_id: i64,
        delta: i32,
    ) -> Result<Option<i64>, AppError>;

    /// Locks the target row for the rest of the transaction.
    /// Returns false when the target does not exist.
    async fn lock_target(&mut self, target: VoteTarget) -> Result<bool, AppError>;

    /// Applies `delta` to the target's points and returns the new value.
    async fn add_points(&mut self, target: VoteTarget, delta: i32) -> Result<i32, AppError>;

    async fn has_vote(&mut self, user_id: &str, target: VoteTarget) -> Result<bool, AppError>;

    async fn insert_vote(&mut self, user_id: &str, target: VoteTarget) -> Result<(), AppError>;

    /// Returns whether a row was removed.
    async fn delete_vote(&mut self, user_id: &str, target: VoteTarget) -> Result<bool, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}
