use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::env;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tower::ServiceExt;

use storefront::config::{Config, SessionBackend};
use storefront::database::{init_db, AppState};
use storefront::route::create_app;

// Mutex to ensure tests that modify env vars don't run in parallel
static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn setup_test_app(config: Config) -> (axum::Router, NamedTempFile) {
    let temp_db = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = temp_db.path().to_str().unwrap();
    let db = init_db(db_path).expect("Failed to initialize test database");
    (create_app(AppState::new(Arc::new(db), config)), temp_db)
}

fn admin_config() -> Config {
    Config {
        admin_token: Some("secret_token".to_string()),
        ..Config::default()
    }
}

/// Helper function to parse response body as JSON
async fn response_json(body: Body) -> Value {
    let bytes = body
        .collect()
        .await
        .expect("Failed to read response body")
        .to_bytes();

    serde_json::from_slice(&bytes).expect("Failed to parse JSON")
}

fn create_product_request(authorization: Option<&str>) -> Request<Body> {
    let payload = json!({ "name": "Guarded Chair", "price": 99.0 });
    let mut request = Request::builder()
        .method("POST")
        .uri("/api/products")
        .header("content-type", "application/json");
    if let Some(value) = authorization {
        request = request.header("Authorization", value);
    }
    request.body(Body::from(payload.to_string())).unwrap()
}

#[tokio::test]
async fn test_admin_guard_valid_token() {
    let (app, _temp_db) = setup_test_app(admin_config());

    let response = app
        .oneshot(create_product_request(Some("Bearer secret_token")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_admin_guard_invalid_token() {
    let (app, _temp_db) = setup_test_app(admin_config());

    let response = app
        .oneshot(create_product_request(Some("Bearer wrong_token")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = response_json(response.into_body()).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Forbidden");
    assert_eq!(body["message"], "Admin privileges required for this operation");
}

#[tokio::test]
async fn test_admin_guard_no_token() {
    let (app, _temp_db) = setup_test_app(admin_config());

    let response = app.oneshot(create_product_request(None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_guard_leaves_reads_public() {
    let (app, _temp_db) = setup_test_app(admin_config());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/products/categories")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_guard_covers_order_administration() {
    let (app, _temp_db) = setup_test_app(admin_config());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/orders/all")
                .header("x-user-id", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/orders/all")
                .header("Authorization", "Bearer secret_token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_guard_disabled() {
    let (app, _temp_db) = setup_test_app(Config::default());

    let response = app.oneshot(create_product_request(None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_rate_limit_per_client() {
    let config = Config {
        rate_limit_max: 2,
        ..Config::default()
    };
    let (app, _temp_db) = setup_test_app(config);

    let request = |client: &str| {
        Request::builder()
            .uri("/health")
            .header("x-forwarded-for", client)
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let response = app.clone().oneshot(request("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.clone().oneshot(request("10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["message"], "Too many requests, please try again later");

    let response = app.oneshot(request("10.0.0.2, 172.16.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cors_allows_known_origins_only() {
    let (app, _temp_db) = setup_test_app(Config::default());

    let request = |origin: &str| {
        Request::builder()
            .uri("/api/products")
            .header("origin", origin)
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(request("http://localhost:5173")).await.unwrap();
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://localhost:5173"
    );

    let response = app.oneshot(request("https://evil.example")).await.unwrap();
    assert!(response.headers().get("access-control-allow-origin").is_none());
}

#[test]
fn test_config_from_env() {
    let _guard = ENV_MUTEX.lock().unwrap();
    env::set_var("NODE_ENV", "production");
    env::set_var("ADMIN_TOKEN", "secret_token");
    env::set_var("SESSION_BACKEND", "memory");
    env::remove_var("ENVIRONMENT");
    env::remove_var("RATE_LIMIT_MAX");

    let config = Config::from_env();
    assert!(config.production);
    assert_eq!(config.rate_limit_max, 100);
    assert_eq!(config.admin_token.as_deref(), Some("secret_token"));
    assert_eq!(config.session_backend, SessionBackend::Memory);

    env::set_var("RATE_LIMIT_MAX", "7");
    env::set_var("ADMIN_TOKEN", "  ");
    let config = Config::from_env();
    assert_eq!(config.rate_limit_max, 7);
    assert_eq!(config.admin_token, None);

    env::remove_var("NODE_ENV");
    env::remove_var("ADMIN_TOKEN");
    env::remove_var("SESSION_BACKEND");
    env::remove_var("RATE_LIMIT_MAX");

    let config = Config::from_env();
    assert!(!config.production);
    assert_eq!(config.rate_limit_max, 1000);
}
