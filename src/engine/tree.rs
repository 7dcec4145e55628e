//! Paged listings over the comment tree and the post index.
//!
//! Only direct children of a container are paged; descendants are fetched
//! by a separate call per subtree. The total and the page are read from the
//! same snapshot.

use crate::{
    error::AppError,
    models::{
        comment::{Comment, Container},
        pagination::{PageRequest, Paginated, Pagination, REPLY_PAGE_SIZE, Sorting},
        post::{Post, PostFilter},
    },
    store::{Store, StoreTx},
};

/// A request for one page of a container's direct children.
#[derive(Debug, Clone, Copy)]
pub struct ChildrenQuery {
    pub container: Container,
    pub page: PageRequest,
    pub sorting: Sorting,
    /// Attach the first reply page to each returned comment.
    pub include_children: bool,
}

/// Lists one page of direct children of `query.container`.
///
/// The container itself must exist; a missing post or comment is reported
/// as `NotFound` rather than as an empty listing.
pub async fn list_children(
    store: &dyn Store,
    query: ChildrenQuery,
    viewer: Option<&str>,
) -> Result<Paginated<Comment>, AppError> {
    let mut tx = store.snapshot().await?;

    let exists = match query.container {
        Container::Post(id) => tx.find_post(id, None).await?.is_some(),
        Container::Comment(id) => tx.find_comment(id, None).await?.is_some(),
    };
    if !exists {
        return Err(match query.container {
            Container::Post(_) => AppError::NotFound("Post not found".to_string()),
            Container::Comment(_) => AppError::NotFound("Comment not found".to_string()),
        });
    }

    let mut page = page_of_children(tx.as_mut(), query.container, query.page, query.sorting, viewer)
        .await?;

    if query.include_children {
        let first_replies = PageRequest::new(Some(1), None, REPLY_PAGE_SIZE);
        for comment in page.data.iter_mut() {
            // Leaves need no extra round trip.
            let replies = if comment.comment_count == 0 {
                Vec::new()
            } else {
                tx.fetch_children(
                    Container::Comment(comment.id),
                    query.sorting,
                    first_replies,
                    viewer,
                )
                .await?
            };
            comment.child_comments = Some(replies);
        }
    }

    Ok(page)
}

/// Count plus page inside an already open transaction.
async fn page_of_children(
    tx: &mut dyn StoreTx,
    container: Container,
    page: PageRequest,
    sorting: Sorting,
    viewer: Option<&str>,
) -> Result<Paginated<Comment>, AppError> {
    let total = tx.count_children(container).await?;
    let total_pages = page.total_pages(total);

    let data = if page.page > total_pages {
        Vec::new()
    } else {
        tx.fetch_children(container, sorting, page, viewer).await?
    };

    Ok(Paginated {
        data,
        pagination: Pagination {
            page: page.page,
            total_pages,
        },
    })
}

/// Lists one page of posts matching `filter`.
pub async fn list_posts(
    store: &dyn Store,
    filter: &PostFilter,
    sorting: Sorting,
    page: PageRequest,
    viewer: Option<&str>,
) -> Result<Paginated<Post>, AppError> {
    let mut tx = store.snapshot().await?;

    let total = tx.count_posts(filter).await?;
    let total_pages = page.total_pages(total);

    let data = if page.page > total_pages {
        Vec::new()
    } else {
        tx.fetch_posts(filter, sorting, page, viewer).await?
    };

    Ok(Paginated {
        data,
        pagination: Pagination {
            page: page.page,
            total_pages,
        },
    })
}

/// Fetches a single post as seen by `viewer`.
pub async fn get_post(store: &dyn Store, id: i64, viewer: Option<&str>) -> Result<Post, AppError> {
    let mut tx = store.snapshot().await?;
    tx.find_post(id, viewer)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))
}
