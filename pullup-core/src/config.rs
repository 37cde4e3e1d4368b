use std::env;

/// Runtime configuration, read once at startup by the composition root.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string
    pub database_url: String,
    /// Redis connection string
    pub redis_url: String,
    /// Name of the HTTP-only cookie carrying the opaque session token
    pub token_cookie: String,
    /// Length of issued opaque session tokens
    pub token_length: usize,
    /// How long an issued session token stays valid, in days
    pub token_duration_in_days: i64,
    /// Where OAuth callbacks redirect the browser after login
    pub frontend_url: String,
    /// This server's public base URL, used to build OAuth redirect URIs
    pub backend_url: String,
    /// Where uploaded objects are served from
    pub storage_base_url: String,
    /// Production toggles behavior such as chat bootstrap and secure cookies
    pub deployment: Deployment,
    /// Comments a single user may post per UTC day
    pub comment_daily_limit: i64,
    /// Active comments a single user may hold on one marker
    pub comments_per_marker_limit: i64,
    /// Favorites a single user may hold
    pub max_favorites: i64,
    /// Seconds a chat connection may stay silent before the sweeper closes it
    pub chat_idle_seconds: i64,
    /// Seconds between click-buffer flushes to the rank store
    pub click_flush_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    Development,
    Production,
}

impl Config {
    /// Reads the configuration from the environment, falling back to
    /// development defaults where a variable is absent.
    pub fn from_env() -> Self {
        let deployment = match env::var("DEPLOYMENT").as_deref() {
            Ok("production") => Deployment::Production,
            _ => Deployment::Development,
        };

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/pullup".to_string()),
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1".to_string()),
            token_cookie: env::var("TOKEN_COOKIE").unwrap_or_else(|_| "pullup_token".to_string()),
            token_length: 32,
            token_duration_in_days: 7,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            backend_url: env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:9452".to_string()),
            storage_base_url: env::var("STORAGE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9000/pullup".to_string()),
            deployment,
            comment_daily_limit: 15,
            comments_per_marker_limit: 3,
            max_favorites: 10,
            chat_idle_seconds: 60 * 10,
            click_flush_seconds: 60 * 10,
        }
    }

    pub fn is_production(&self) -> bool {
        self.deployment == Deployment::Production
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
