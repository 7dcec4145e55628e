// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    error::AppError,
    handlers::{comments, interaction, posts},
    state::AppState,
    utils::session::{require_session, session_middleware},
};

/// Assembles the main application router.
///
/// * Public read routes and session-only write routes under `/api`.
/// * Every request passes the session layer, which resolves the optional
///   viewer; write routes additionally reject anonymous requests.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
        HeaderValue::from_static("http://localhost:5173"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    let public_routes = Router::new()
        .route("/api/posts", get(posts::list_posts))
        .route("/api/posts/{id}", get(posts::get_post))
        .route("/api/posts/{id}/comments", get(comments::list_post_comments))
        .route(
            "/api/comments/{id}/comments",
            get(comments::list_comment_replies),
        );

    let protected_routes = Router::new()
        .route("/api/posts", post(posts::create_post))
        .route("/api/posts/{id}/upvote", post(interaction::upvote_post))
        .route("/api/posts/{id}/comment", post(comments::create_post_comment))
        .route("/api/comments/{id}", post(comments::create_reply))
        .route("/api/comments/{id}/upvote", post(interaction::upvote_comment))
        .route_layer(middleware::from_fn(require_session));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(not_found)
        // Global Middleware (applied from outside in)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::NotFound("Not found".to_string())
}
