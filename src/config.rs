// src/config.rs

use std::env;
use dotenvy::dotenv;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Without it the server runs on the
    /// in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    /// Lifetime of sessions signed by `sign_session`, in seconds.
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub app_env: String,
    pub port: u16,
    pub log_dir: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86_400);

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let app_env = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string());

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        let log_dir = env::var("LOG_DIR")
            .unwrap_or_else(|_| "logs".to_string());

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            app_env,
            port,
            log_dir,
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    /// Configuration for tests and embedded use: in-memory store, quiet logs.
    pub fn for_testing(jwt_secret: &str) -> Self {
        Self {
            database_url: None,
            jwt_secret: jwt_secret.to_string(),
            jwt_expiration: 600,
            rust_log: "error".to_string(),
            app_env: "test".to_string(),
            port: 0,
            log_dir: "logs".to_string(),
        }
    }
}
