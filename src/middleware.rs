use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, warn};

use crate::config::{Config, RATE_LIMIT_WINDOW_SECS};
use crate::database::AppState;
use crate::error::AppError;

/// Fallback identity header for clients that do not send a bearer token
pub const USER_ID_HEADER: &str = "x-user-id";

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Identity of the caller on user-scoped routes
///
/// Taken from `Authorization: Bearer <token>`, falling back to the
/// `X-User-Id` header. Tokens are treated as opaque identities and are not
/// verified. A request with neither is rejected with 401; there is no shared
/// anonymous user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(token) = bearer_token(&parts.headers) {
            return Ok(CurrentUser(token.to_string()));
        }

        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CurrentUser(v.to_string()))
            .ok_or(AppError::NotAuthenticated)
    }
}

/// Middleware guarding catalog writes and order administration
///
/// When `ADMIN_TOKEN` is configured the request must carry
/// `Authorization: Bearer <ADMIN_TOKEN>`. Without it the check is skipped.
pub async fn admin_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(admin_token) = &state.config.admin_token {
        match bearer_token(request.headers()) {
            Some(token) if token == admin_token.as_str() => {}
            _ => {
                warn!(path = %request.uri().path(), "admin route rejected");
                return Err(AppError::Forbidden(
                    "Admin privileges required for this operation".to_string(),
                ));
            }
        }
    }

    Ok(next.run(request).await)
}

// ========== Rate limiting ==========

struct Window {
    count: u32,
    started: Instant,
}

/// Fixed-window request counter per client address
#[derive(Clone)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Arc<Mutex<HashMap<String, Window>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32) -> Self {
        Self::with_window(max_requests, Duration::from_secs(RATE_LIMIT_WINDOW_SECS))
    }

    pub fn with_window(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counts one request from `client`; `false` once the budget is spent
    pub fn check(&self, client: &str) -> bool {
        let mut clients = self.clients.lock();
        let now = Instant::now();

        let entry = clients.entry(client.to_owned()).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.count = 0;
            entry.started = now;
        }

        entry.count += 1;
        entry.count <= self.max_requests
    }

    /// Drops windows that have already expired
    pub fn cleanup(&self) {
        let now = Instant::now();
        let window = self.window;
        self.clients
            .lock()
            .retain(|_, entry| now.duration_since(entry.started) < window);
    }
}

/// Client address: first `X-Forwarded-For` hop, then the peer address
fn client_address(request: &Request) -> String {
    if let Some(first) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_owned();
    }

    request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_address(&request);
    if !state.rate_limiter.check(&client) {
        debug!(client = %client, "rate limit exceeded");
        return Err(AppError::RateLimited);
    }
    Ok(next.run(request).await)
}

/// Sets `Cache-Control` on product reads
pub async fn product_cache_control(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let is_get = request.method() == Method::GET;
    let mut response = next.run(request).await;

    if is_get {
        let value = if state.config.production {
            HeaderValue::from_static("public, max-age=300")
        } else {
            HeaderValue::from_static("no-store")
        };
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }

    response
}

// ========== CORS ==========

/// Whether a browser origin may call the API
///
/// Allowed: the configured frontend URL, the usual dev servers, any
/// `http://localhost:<port>` with a 4-5 digit port, and `*.onrender.com` over https.
pub fn is_allowed_origin(origin: &str, frontend_url: Option<&str>) -> bool {
    let explicit = ["http://localhost:3000", "http://localhost:5173"];
    if explicit.contains(&origin) || frontend_url == Some(origin) {
        return true;
    }

    if let Some(port) = origin.strip_prefix("http://localhost:") {
        if (4..=5).contains(&port.len()) && port.bytes().all(|b| b.is_ascii_digit()) {
            return true;
        }
    }

    origin
        .strip_prefix("https://")
        .and_then(|host| host.strip_suffix(".onrender.com"))
        .is_some_and(|sub| !sub.is_empty())
}

pub fn cors_layer(config: &Config) -> CorsLayer {
    let frontend_url = config.frontend_url.clone();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| is_allowed_origin(o, frontend_url.as_deref()))
                .unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(USER_ID_HEADER),
        ])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_allow_list() {
        assert!(is_allowed_origin("http://localhost:5173", None));
        assert!(is_allowed_origin("http://localhost:8080", None));
        assert!(is_allowed_origin("https://shop.onrender.com", None));
        assert!(is_allowed_origin("https://furniture.example", Some("https://furniture.example")));

        assert!(!is_allowed_origin("http://localhost:80", None));
        assert!(!is_allowed_origin("https://onrender.com", None));
        assert!(!is_allowed_origin("http://shop.onrender.com", None));
        assert!(!is_allowed_origin("https://evil.example", None));
    }

    #[test]
    fn limiter_resets_after_window() {
        let limiter = RateLimiter::with_window(2, Duration::from_millis(20));
        assert!(limiter.check("1.2.3.4"));
        assert!(limiter.check("1.2.3.4"));
        assert!(!limiter.check("1.2.3.4"));
        assert!(limiter.check("5.6.7.8"));

        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("1.2.3.4"));

        std::thread::sleep(Duration::from_millis(30));
        limiter.cleanup();
        assert!(limiter.clients.lock().is_empty());
    }
}
