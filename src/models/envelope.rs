use serde::{Deserialize, Serialize};

use super::pagination::{Paginated, Pagination};

/// Success wrapper returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T> SuccessResponse<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            pagination: None,
        }
    }
}

impl<T> SuccessResponse<Vec<T>> {
    pub fn page(message: impl Into<String>, page: Paginated<T>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: page.data,
            pagination: Some(page.pagination),
        }
    }

    /// Reassembles a page from a paginated response.
    pub fn into_page(self) -> Option<Paginated<T>> {
        let pagination = self.pagination?;
        Some(Paginated {
            data: self.data,
            pagination,
        })
    }
}

/// Failure wrapper. `is_form_error` tells clients to attach the message to
/// the submitted form instead of a banner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(default)]
    pub is_form_error: bool,
}
