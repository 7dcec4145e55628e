use serde::{Deserialize, Serialize};

/// Upper bound for any caller-supplied page size.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Default page size for post listings and top-level comments.
pub const POST_PAGE_SIZE: i64 = 10;

/// Default page size for reply listings. Kept small so a thread opens with
/// a narrow fan-out and replies are pulled in on demand.
pub const REPLY_PAGE_SIZE: i64 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Points,
    Recent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Points => "points",
            SortBy::Recent => "recent",
        }
    }
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }

    /// Applies the direction to an ascending comparison.
    pub fn apply(&self, ordering: std::cmp::Ordering) -> std::cmp::Ordering {
        match self {
            Order::Asc => ordering,
            Order::Desc => ordering.reverse(),
        }
    }
}

/// Sort key plus direction for a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sorting {
    pub sort_by: SortBy,
    pub order: Order,
}

/// A resolved page request: 1-based page number and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub size: i64,
}

impl PageRequest {
    /// Builds a request from optional query values, clamping the size to
    /// `1..=MAX_PAGE_SIZE` and the page to at least 1.
    pub fn new(page: Option<i64>, size: Option<i64>, default_size: i64) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            size: size.unwrap_or(default_size).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.size)
    }

    /// `ceil(total / size)`; zero rows means zero pages.
    pub fn total_pages(&self, total: i64) -> i64 {
        if total <= 0 {
            0
        } else {
            (total + self.size - 1) / self.size
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub total_pages: i64,
}

/// One page of an ordered listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    pub fn empty(page: i64) -> Self {
        Self {
            data: Vec::new(),
            pagination: Pagination {
                page,
                total_pages: 0,
            },
        }
    }
}
