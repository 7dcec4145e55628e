// src/error.rs

use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::models::envelope::ErrorResponse;

/// Whether internal error details may be rendered to clients.
/// Off unless the process is started outside production.
static EXPOSE_INTERNAL: AtomicBool = AtomicBool::new(false);

pub fn expose_internal_errors(enabled: bool) {
    EXPOSE_INTERNAL.store(enabled, Ordering::Relaxed);
}

/// Global Application Error Enum.
/// Centralizes error handling and mapping to the failure envelope.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // 500 Internal Server Error
    #[error("internal error: {0}")]
    InternalServerError(String),

    // 503, store unreachable or pool exhausted
    #[error("service unavailable: {0}")]
    Unavailable(String),

    // 400 Bad Request, field-level validation
    #[error("{0}")]
    BadRequest(String),

    // 401 Unauthorized
    #[error("{0}")]
    AuthError(String),

    // 404 Not Found
    #[error("{0}")]
    NotFound(String),

    // 409 Conflict (unique constraint)
    #[error("{0}")]
    Conflict(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    /// Validation and conflict errors belong to the submitted form.
    pub fn is_form_error(&self) -> bool {
        matches!(self, AppError::BadRequest(_) | AppError::Conflict(_))
    }
}

/// Converts the error into the failure envelope with the matching status.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let is_form_error = self.is_form_error();
        let error = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                if EXPOSE_INTERNAL.load(Ordering::Relaxed) {
                    msg
                } else {
                    "Internal Server Error".to_string()
                }
            }
            AppError::Unavailable(msg) => {
                tracing::warn!("Store unavailable: {}", msg);
                if EXPOSE_INTERNAL.load(Ordering::Relaxed) {
                    msg
                } else {
                    "Service temporarily unavailable".to_string()
                }
            }
            AppError::BadRequest(msg)
            | AppError::AuthError(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg) => msg,
        };

        let body = Json(ErrorResponse {
            success: false,
            error,
            is_form_error,
        });

        (status, body).into_response()
    }
}

/// Maps store failures onto the taxonomy so `?` works on queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound("Not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict("Already exists".to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::Unavailable(err.to_string())
            }
            _ => AppError::InternalServerError(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::BadRequest(first_validation_message(&errors))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Picks a single human-readable message, preferring the one attached to
/// the validation rule.
fn first_validation_message(errors: &validator::ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    fields
        .into_iter()
        .flat_map(|(field, errs)| errs.iter().map(move |e| (field, e)))
        .next()
        .map(|(field, e)| match &e.message {
            Some(msg) => msg.to_string(),
            None => format!("Invalid {}", field),
        })
        .unwrap_or_else(|| errors.to_string())
}
