// src/utils/session.rs

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{config::Config, error::AppError};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

/// Session claims issued by the auth collaborator.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// Subject - the user id.
    pub sub: String,
    /// Expiration time as Unix timestamp.
    pub exp: usize,
}

/// The identity resolved for a request, if any.
#[derive(Debug, Clone, Default)]
pub struct Viewer(pub Option<Claims>);

impl Viewer {
    pub fn user_id(&self) -> Option<&str> {
        self.0.as_ref().map(|c| c.sub.as_str())
    }

    /// The user id, or an auth error for anonymous requests.
    pub fn require(&self) -> Result<&str, AppError> {
        self.user_id()
            .ok_or_else(|| AppError::AuthError("Unauthorized".to_string()))
    }
}

/// Signs a session token for `user_id`.
pub fn sign_session(
    user_id: &str,
    secret: &str,
    expiration_seconds: u64,
) -> Result<String, AppError> {
    let expiration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .as_secs() as usize
        + expiration_seconds as usize;

    let claims = Claims {
        sub: user_id.to_owned(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Signs a session with the configured secret and lifetime.
pub fn issue_session(config: &Config, user_id: &str) -> Result<String, AppError> {
    sign_session(user_id, &config.jwt_secret, config.jwt_expiration)
}

/// Verifies and decodes a session token.
pub fn verify_session(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthError("Invalid session".to_string()))?;

    Ok(token_data.claims)
}

/// Extracts the token from the session cookie, falling back to a bearer
/// header for non-browser clients.
fn session_token(headers: &HeaderMap) -> Option<&str> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value);

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
    })
}

/// Axum Middleware: Session resolution.
///
/// Resolves the optional viewer for every request and stores it in the
/// request extensions. Missing, invalid or expired tokens resolve to an
/// anonymous viewer.
pub async fn session_middleware(
    State(config): State<Config>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let claims = session_token(req.headers())
        .and_then(|token| verify_session(token, &config.jwt_secret).ok());
    req.extensions_mut().insert(Viewer(claims));
    next.run(req).await
}

/// Axum Middleware: Authentication.
///
/// Must be layered inside `session_middleware`. Rejects anonymous requests
/// with 401 before they reach a handler.
pub async fn require_session(req: Request<Body>, next: Next) -> Result<Response, AppError> {
    let signed_in = req
        .extensions()
        .get::<Viewer>()
        .is_some_and(|viewer| viewer.user_id().is_some());

    if !signed_in {
        return Err(AppError::AuthError("Unauthorized".to_string()));
    }

    Ok(next.run(req).await)
}
