//! Postgres implementation of the store boundary.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction, postgres::PgPoolOptions};

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

const POST_COLUMNS: &str = r#"
    p.id, p.author_id, p.title, p.url, p.content,
    p.points, p.comment_count, p.created_at,
    EXISTS (
        SELECT 1 FROM post_upvotes v WHERE v.post_id = p.id AND v.user_id = $1
    ) AS is_upvoted
"#;

const COMMENT_COLUMNS: &str = r#"
    c.id, c.author_id, c.post_id, c.parent_comment_id, c.content,
    c.depth, c.points, c.comment_count, c.created_at,
    EXISTS (
        SELECT 1 FROM comment_upvotes v WHERE v.comment_id = c.id AND v.user_id = $1
    ) AS is_upvoted
"#;

/// Statements for one vote relation.
struct VoteSql {
    lock: &'static str,
    add_points: &'static str,
    exists: &'static str,
    insert: &'static str,
    delete: &'static str,
}

const POST_VOTES: VoteSql = VoteSql {
    lock: "SELECT id FROM posts WHERE id = $1 FOR UPDATE",
    add_points: "UPDATE posts SET points = points + $2 WHERE id = $1 RETURNING points",
    exists: "SELECT EXISTS (SELECT 1 FROM post_upvotes WHERE user_id = $1 AND post_id = $2)",
    insert: "INSERT INTO post_upvotes (user_id, post_id) VALUES ($1, $2)",
    delete: "DELETE FROM post_upvotes WHERE user_id = $1 AND post_id = $2",
};

const COMMENT_VOTES: VoteSql = VoteSql {
    lock: "SELECT id FROM comments WHERE id = $1 FOR UPDATE",
    add_points: "UPDATE comments SET points = points + $2 WHERE id = $1 RETURNING points",
    exists: "SELECT EXISTS (SELECT 1 FROM comment_upvotes WHERE user_id = $1 AND comment_id = $2)",
    insert: "INSERT INTO comment_upvotes (user_id, comment_id) VALUES ($1, $2)",
    delete: "DELETE FROM comment_upvotes WHERE user_id = $1 AND comment_id = $2",
};

fn vote_sql(kind: TargetKind) -> &'static VoteSql {
    match kind {
        TargetKind::Post => &POST_VOTES,
        TargetKind::Comment => &COMMENT_VOTES,
    }
}

/// `ORDER BY` body. The direction applies to every key, `id` included.
fn order_clause(alias: &str, sorting: Sorting) -> String {
    let dir = sorting.order.as_sql();
    match sorting.sort_by {
        SortBy::Points => format!(
            "{alias}.points {dir}, {alias}.created_at {dir}, {alias}.id {dir}"
        ),
        SortBy::Recent => format!("{alias}.created_at {dir}, {alias}.id {dir}"),
    }
}

/// Escapes LIKE metacharacters so user text matches literally.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects with a bounded number of retries while the database boots.
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let mut retry_count = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(3))
                .connect(database_url)
                .await
            {
                Ok(pool) => return Ok(Self::new(pool)),
                Err(e) => {
                    retry_count += 1;
                    if retry_count > 5 {
                        return Err(AppError::Unavailable(format!(
                            "failed to connect to database after 5 retries: {}",
                            e
                        )));
                    }
                    tracing::warn!(
                        "Database not ready, retrying in 2s... (Attempt {})",
                        retry_count
                    );
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::InternalServerError(e.to_string()))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn snapshot(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_post(
        &mut self,
        id: i64,
        viewer: Option<&str>,
    ) -> Result<Option<Post>, AppError> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.id = $2");
        let post = sqlx::query_as::<_, Post>(&sql)
            .bind(viewer)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(post)
    }

    async fn insert_post(&mut self, post: &NewPost) -> Result<Post, AppError> {
        let row = sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (author_id, title, url, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id, author_id, title, url, content,
                      points, comment_count, created_at, FALSE AS is_upvoted
            "#,
        )
        .bind(&post.author_id)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.content)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create post: {:?}", e);
            AppError::from(e)
        })?;
        Ok(row)
    }

    async fn count_posts(&mut self, filter: &PostFilter) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM posts p
            WHERE ($1::TEXT IS NULL OR p.author_id = $1)
              AND ($2::TEXT IS NULL OR p.url ILIKE '%' || $2 || '%')
            "#,
        )
        .bind(filter.author.as_deref())
        .bind(filter.site.as_deref().map(escape_like))
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn fetch_posts(
        &mut self,
        filter: &PostFilter,
        sorting: Sorting,
        page: PageRequest,
        viewer: Option<&str>,
    ) -> Result<Vec<Post>, AppError> {
        let sql = format!(
            r#"
            SELECT {POST_COLUMNS} FROM posts p
            WHERE ($2::TEXT IS NULL OR p.author_id = $2)
              AND ($3::TEXT IS NULL OR p.url ILIKE '%' || $3 || '%')
            ORDER BY {}
            LIMIT $4 OFFSET $5
            "#,
            order_clause("p", sorting)
        );
        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(viewer)
            .bind(filter.author.as_deref())
            .bind(filter.site.as_deref().map(escape_like))
            .bind(page.size)
            .bind(page.offset())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| {
                tracing::error!("Failed to list posts: {:?}", e);
                AppError::from(e)
            })?;
        Ok(posts)
    }

    async fn find_comment(
        &mut self,
        id: i64,
        viewer: Option<&str>,
    ) -> Result<Option<Comment>, AppError> {
        let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments c WHERE c.id = $2");
        let comment = sqlx::query_as::<_, Comment>(&sql)
            .bind(viewer)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(comment)
    }

    async fn insert_comment(&mut self, comment: &NewComment) -> Result<Comment, AppError> {
        let row = sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO comments (author_id, post_id, parent_comment_id, content, depth)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, author_id, post_id, parent_comment_id, content,
                      depth, points, comment_count, created_at, FALSE AS is_upvoted
            "#,
        )
        .bind(&comment.author_id)
        .bind(comment.post_id)
        .bind(comment.parent_comment_id)
        .bind(&comment.content)
        .bind(comment.depth)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create comment: {:?}", e);
            AppError::from(e)
        })?;
        Ok(row)
    }

    async fn count_children(&mut self, container: Container) -> Result<i64, AppError> {
        let sql = match container {
            Container::Post(_) => {
                "SELECT COUNT(*) FROM comments WHERE post_id = $1 AND parent_comment_id IS NULL"
            }
            Container::Comment(_) => "SELECT COUNT(*) FROM comments WHERE parent_comment_id = $1",
        };
        let count = sqlx::query_scalar::<_, i64>(sql)
            .bind(container.id())
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn fetch_children(
        &mut self,
        container: Container,
        sorting: Sorting,
        page: PageRequest,
        viewer: Option<&str>,
    ) -> Result<Vec<Comment>, AppError> {
        let scope = match container {
            Container::Post(_) => "c.post_id = $2 AND c.parent_comment_id IS NULL",
            Container::Comment(_) => "c.parent_comment_id = $2",
        };
        let sql = format!(
            r#"
            SELECT {COMMENT_COLUMNS} FROM comments c
            WHERE {scope}
            ORDER BY {}
            LIMIT $3 OFFSET $4
            "#,
            order_clause("c", sorting)
        );
        let comments = sqlx::query_as::<_, Comment>(&sql)
            .bind(viewer)
            .bind(container.id())
            .bind(page.size)
            .bind(page.offset())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| {
                tracing::error!("Failed to list comments: {:?}", e);
                AppError::from(e)
            })?;
        Ok(comments)
    }

    async fn add_post_comment_count(&mut self, post_id: i64, delta: i32) -> Result<(), AppError> {
        let updated =
            sqlx::query("UPDATE posts SET comment_count = comment_count + $2 WHERE id = $1")
                .bind(post_id)
                .bind(delta)
                .execute(&mut *self.tx)
                .await?
                .rows_affected();
        if updated == 0 {
            return Err(AppError::NotFound("Post not found".to_string()));
        }
        Ok(())
    }

    async fn add_comment_comment_count(
        &mut self,
        comment_id: i64,
        delta: i32,
    ) -> Result<Option<i64>, AppError> {
        sqlx::query_scalar::<_, Option<i64>>(
            r#"
            UPDATE comments SET comment_count = comment_count + $2
            WHERE id = $1
            RETURNING parent_comment_id
            "#,
        )
        .bind(comment_id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))
    }

    async fn lock_target(&mut self, target: VoteTarget) -> Result<bool, AppError> {
        let row = sqlx::query_scalar::<_, i64>(vote_sql(target.kind).lock)
            .bind(target.id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.is_some())
    }

    async fn add_points(&mut self, target: VoteTarget, delta: i32) -> Result<i32, AppError> {
        sqlx::query_scalar::<_, i32>(vote_sql(target.kind).add_points)
            .bind(target.id)
            .bind(delta)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| AppError::NotFound("Vote target not found".to_string()))
    }

    async fn has_vote(&mut self, user_id: &str, target: VoteTarget) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(vote_sql(target.kind).exists)
            .bind(user_id)
            .bind(target.id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn insert_vote(&mut self, user_id: &str, target: VoteTarget) -> Result<(), AppError> {
        sqlx::query(vote_sql(target.kind).insert)
            .bind(user_id)
            .bind(target.id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::Conflict(_) => AppError::Conflict("Already upvoted".to_string()),
                other => other,
            })?;
        Ok(())
    }

    async fn delete_vote(&mut self, user_id: &str, target: VoteTarget) -> Result<bool, AppError> {
        let removed = sqlx::query(vote_sql(target.kind).delete)
            .bind(user_id)
            .bind(target.id)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }
}
