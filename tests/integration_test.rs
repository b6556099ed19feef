//! Integration tests for the catalog API
//!
//! These tests verify the entire application stack including:
//! - HTTP routing
//! - Request/response handling
//! - Database operations
//! - Error handling

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tower::ServiceExt;

use storefront::config::Config;
use storefront::database::{init_db, AppState};
use storefront::route::create_app;

/// Helper function to create a test application with a temporary database
fn setup_test_app() -> (axum::Router, NamedTempFile) {
    let temp_db = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = temp_db.path().to_str().unwrap();

    let db = init_db(db_path).expect("Failed to initialize test database");
    let state = AppState::new(Arc::new(db), Config::default());

    (create_app(state), temp_db)
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

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    (status, response_json(response.into_body()).await)
}

async fn create_product(app: &axum::Router, payload: Value) -> Value {
    let (status, body) = send(app, "POST", "/api/products", Some(payload)).await;
    assert_eq!(status, StatusCode::CREATED, "unexpected body: {body}");
    body["data"].clone()
}

async fn seed_price_range(app: &axum::Router) {
    for (name, price) in [
        ("Footstool", 50.0),
        ("Side Table", 120.0),
        ("Armchair", 250.0),
        ("Bookcase", 400.0),
        ("Sofa", 600.0),
    ] {
        create_product(app, json!({ "name": name, "price": price, "stock": 3 })).await;
    }
}

#[tokio::test]
async fn test_health_check() {
    let (app, _temp_db) = setup_test_app();

    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_unknown_route_returns_envelope() {
    let (app, _temp_db) = setup_test_app();

    let (status, body) = send(&app, "GET", "/api/nothing-here", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Route not found");
}

#[tokio::test]
async fn test_create_product_derives_slug_and_projection() {
    let (app, _temp_db) = setup_test_app();

    let product = create_product(
        &app,
        json!({ "name": "Oak Dining Table", "price": 899.0, "stock": 4, "tags": ["oak"] }),
    )
    .await;

    assert_eq!(product["slug"], "oak-dining-table");
    assert_eq!(product["inStock"], true);
    assert_eq!(product["category"], "uncategorized");
    assert!(product["id"].as_u64().is_some());
}

#[tokio::test]
async fn test_create_product_missing_fields() {
    let (app, _temp_db) = setup_test_app();

    let (status, body) = send(&app, "POST", "/api/products", Some(json!({ "stock": 1 }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    let fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, ["name", "price"]);
}

#[tokio::test]
async fn test_duplicate_slug_conflict() {
    let (app, _temp_db) = setup_test_app();

    create_product(&app, json!({ "name": "Walnut Desk", "price": 300.0 })).await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/products",
        Some(json!({ "name": "Walnut Desk", "price": 320.0 })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Conflict");
}

#[tokio::test]
async fn test_in_stock_flag_conflicts_with_stock() {
    let (app, _temp_db) = setup_test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/products",
        Some(json!({ "name": "Lamp", "price": 49.99, "stock": 5, "inStock": true })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"][0]["field"], "inStock");

    let product = create_product(
        &app,
        json!({ "name": "Lamp", "price": 49.99, "inStock": true }),
    )
    .await;
    assert_eq!(product["stock"], 1);
    assert_eq!(product["inStock"], true);
}

#[tokio::test]
async fn test_list_filters_sort_and_paginate() {
    let (app, _temp_db) = setup_test_app();
    seed_price_range(&app).await;

    let (status, body) = send(
        &app,
        "GET",
        "/api/products?minPrice=100&maxPrice=500&sort=price&order=desc&limit=2",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let prices: Vec<f64> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["price"].as_f64().unwrap())
        .collect();
    assert_eq!(prices, [400.0, 250.0]);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["limit"], 2);
    assert_eq!(body["pagination"]["hasMore"], true);

    let (_, page_two) = send(
        &app,
        "GET",
        "/api/products?minPrice=100&maxPrice=500&sort=price&order=desc&limit=2&offset=2",
        None,
    )
    .await;
    assert_eq!(page_two["data"].as_array().unwrap().len(), 1);
    assert_eq!(page_two["data"][0]["price"], 120.0);
    assert_eq!(page_two["pagination"]["hasMore"], false);
}

#[tokio::test]
async fn test_list_clamps_limit_and_rejects_bad_sort() {
    let (app, _temp_db) = setup_test_app();
    seed_price_range(&app).await;

    let (status, body) = send(&app, "GET", "/api/products?limit=500", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["limit"], 100);

    let (status, body) = send(&app, "GET", "/api/products?sort=color", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = send(&app, "GET", "/api/products?minPrice=cheap", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_category_filter_by_slug() {
    let (app, _temp_db) = setup_test_app();

    let (status, category) = send(
        &app,
        "POST",
        "/api/products/categories",
        Some(json!({ "name": "Living Room" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(category["data"]["slug"], "living-room");

    create_product(
        &app,
        json!({ "name": "Sofa", "price": 600.0, "category": "living-room" }),
    )
    .await;
    create_product(&app, json!({ "name": "Stool", "price": 40.0 })).await;

    let (_, body) = send(&app, "GET", "/api/products?category=living-room", None).await;
    let products = body["data"].as_array().unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0]["name"], "Sofa");
    assert_eq!(products[0]["category"], "living-room");

    let (status, body) = send(&app, "GET", "/api/products?category=garden", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_featured_and_search() {
    let (app, _temp_db) = setup_test_app();

    create_product(
        &app,
        json!({ "name": "Rattan Chair", "price": 150.0, "featured": true, "tags": ["outdoor"] }),
    )
    .await;
    create_product(
        &app,
        json!({ "name": "Teak Bench", "price": 220.0, "description": "Weatherproof outdoor seating" }),
    )
    .await;
    create_product(&app, json!({ "name": "Desk Lamp", "price": 49.99 })).await;

    let (_, featured) = send(&app, "GET", "/api/products/featured", None).await;
    let featured = featured["data"].as_array().unwrap();
    assert_eq!(featured.len(), 1);
    assert_eq!(featured[0]["name"], "Rattan Chair");

    let (status, found) = send(&app, "GET", "/api/products/search?q=outdoor", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["query"], "outdoor");
    assert_eq!(found["pagination"]["total"], 2);

    let (status, _) = send(&app, "GET", "/api/products/search?q=", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_update_delete_product() {
    let (app, _temp_db) = setup_test_app();
    let product = create_product(&app, json!({ "name": "Mirror", "price": 80.0 })).await;
    let id = product["id"].as_u64().unwrap();

    let (status, body) = send(&app, "GET", &format!("/api/products/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Mirror");

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/products/{id}"),
        Some(json!({ "price": 95.5, "featured": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["price"], 95.5);
    assert_eq!(body["data"]["featured"], true);
    assert_eq!(body["data"]["slug"], "mirror");

    let (status, _) = send(&app, "DELETE", &format!("/api/products/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", &format!("/api/products/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_update_slug_conflict() {
    let (app, _temp_db) = setup_test_app();
    create_product(&app, json!({ "name": "Chair", "price": 60.0 })).await;
    let table = create_product(&app, json!({ "name": "Table", "price": 160.0 })).await;

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/products/{}", table["id"]),
        Some(json!({ "slug": "chair" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_stock_operations() {
    let (app, _temp_db) = setup_test_app();
    let product = create_product(&app, json!({ "name": "Shelf", "price": 70.0, "stock": 2 })).await;
    let uri = format!("/api/products/{}/stock", product["id"]);

    let (_, body) = send(&app, "PUT", &uri, Some(json!({ "quantity": 3, "operation": "add" }))).await;
    assert_eq!(body["data"]["stock"], 5);

    let (_, body) = send(
        &app,
        "PUT",
        &uri,
        Some(json!({ "quantity": 9, "operation": "subtract" })),
    )
    .await;
    assert_eq!(body["data"]["stock"], 0);
    assert_eq!(body["data"]["inStock"], false);

    let (status, _) = send(
        &app,
        "PUT",
        &uri,
        Some(json!({ "quantity": 1, "operation": "multiply" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_product_is_404() {
    let (app, _temp_db) = setup_test_app();

    let (status, body) = send(&app, "GET", "/api/products/4242", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Product not found");

    let (status, _) = send(
        &app,
        "PUT",
        "/api/products/4242",
        Some(json!({ "price": 1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/products/not-a-number", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_read_only_catalog_rejects_writes() {
    let temp_db = NamedTempFile::new().unwrap();
    let db = init_db(temp_db.path().to_str().unwrap()).unwrap();
    let config = Config {
        catalog_read_only: true,
        ..Config::default()
    };
    let app = create_app(AppState::new(Arc::new(db), config));

    let (status, body) = send(
        &app,
        "POST",
        "/api/products",
        Some(json!({ "name": "Ghost", "price": 1.0 })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Write rejected");
}

#[tokio::test]
async fn test_product_reads_set_cache_control() {
    let (app, _temp_db) = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/products")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["cache-control"], "no-store");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
}
