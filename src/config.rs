//! Runtime configuration
//!
//! All settings come from environment variables (optionally loaded from a
//! `.env` file by `dotenvy` in `main`).
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `PORT` | 5000 | HTTP port |
//! | `DATABASE_URL` | data.db | redb file path |
//! | `ENVIRONMENT` / `NODE_ENV` | development | `production` tightens rate limits and caching |
//! | `FRONTEND_URL` | - | extra allowed CORS origin |
//! | `ADMIN_TOKEN` | - | bearer token required on admin routes when set |
//! | `RATE_LIMIT_MAX` | 100 prod / 1000 dev | requests per 15 minute window |
//! | `SESSION_BACKEND` | redb | `redb` or `memory` |
//! | `CATALOG_READ_ONLY` | false | reject catalog writes as zero-row writes |

use std::env;

/// Length of one rate limiting window
pub const RATE_LIMIT_WINDOW_SECS: u64 = 15 * 60;

/// Where cart, wishlist and order collections are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionBackend {
    #[default]
    Redb,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub production: bool,
    pub frontend_url: Option<String>,
    pub admin_token: Option<String>,
    pub rate_limit_max: u32,
    pub session_backend: SessionBackend,
    pub catalog_read_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            database_url: "data.db".to_string(),
            production: false,
            frontend_url: None,
            admin_token: None,
            rate_limit_max: 1000,
            session_backend: SessionBackend::Redb,
            catalog_read_only: false,
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        let production = env::var("ENVIRONMENT")
            .or_else(|_| env::var("NODE_ENV"))
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let rate_limit_max = env::var("RATE_LIMIT_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(if production { 100 } else { 1000 });

        let session_backend = match env::var("SESSION_BACKEND").as_deref() {
            Ok("memory") => SessionBackend::Memory,
            _ => SessionBackend::Redb,
        };

        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "data.db".to_string()),
            production,
            frontend_url: non_empty_var("FRONTEND_URL"),
            admin_token: non_empty_var("ADMIN_TOKEN"),
            rate_limit_max,
            session_backend,
            catalog_read_only: env::var("CATALOG_READ_ONLY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
