//! Route definitions for the storefront API
//!
//! This module maps every HTTP route to its handler and stacks the shared
//! middleware (rate limiting, CORS, compression, security headers).

use axum::http::{header, HeaderValue};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::database::AppState;
use crate::handler::{self, cart, orders, products, wishlist};
use crate::middleware::{admin_guard, cors_layer, product_cache_control, rate_limit};

/// Creates and configures the application router
///
/// # Route Definitions
///
/// - `GET /health` - liveness probe
/// - `/api/products` - catalog reads (public) and writes (admin)
/// - `/api/cart` - the caller's cart
/// - `/api/wishlist` - the caller's wishlist
/// - `/api/orders` - the caller's orders, plus admin listing and status updates
///
/// # Example Usage
///
/// ```no_run
/// # use std::sync::Arc;
/// # use storefront::config::Config;
/// # use storefront::database::{init_db, AppState};
/// # use storefront::route::create_app;
/// # let db = init_db("data.db").unwrap();
/// let state = AppState::new(Arc::new(db), Config::default());
/// let app = create_app(state);
/// // axum::serve(listener, app).await.unwrap();
/// ```
pub fn create_app(state: AppState) -> Router {
    let admin = from_fn_with_state(state.clone(), admin_guard);

    let product_routes = Router::new()
        .route(
            "/",
            get(products::list_products)
                .merge(post(products::create_product).route_layer(admin.clone())),
        )
        .route(
            "/categories",
            get(products::list_categories)
                .merge(post(products::create_category).route_layer(admin.clone())),
        )
        .route("/featured", get(products::featured_products))
        .route("/search", get(products::search_products))
        .route(
            "/{id}",
            get(products::get_product).merge(
                put(products::update_product)
                    .delete(products::delete_product)
                    .route_layer(admin.clone()),
            ),
        )
        .route(
            "/{id}/stock",
            put(products::update_stock).route_layer(admin.clone()),
        )
        .layer(from_fn_with_state(state.clone(), product_cache_control));

    let cart_routes = Router::new()
        .route(
            "/",
            get(cart::get_cart)
                .post(cart::add_to_cart)
                .delete(cart::clear_cart),
        )
        .route("/summary", get(cart::cart_summary))
        .route(
            "/{product_id}",
            put(cart::update_cart_item).delete(cart::remove_from_cart),
        );

    let wishlist_routes = Router::new()
        .route(
            "/",
            get(wishlist::get_wishlist)
                .post(wishlist::add_to_wishlist)
                .delete(wishlist::clear_wishlist),
        )
        .route("/toggle", post(wishlist::toggle_wishlist))
        .route("/move-to-cart", post(wishlist::move_to_cart))
        .route("/check/{product_id}", get(wishlist::check_wishlist))
        .route("/{product_id}", delete(wishlist::remove_from_wishlist));

    let order_routes = Router::new()
        .route("/", get(orders::list_orders).post(orders::create_order))
        .route("/all", get(orders::all_orders).route_layer(admin.clone()))
        .route("/{id}", get(orders::get_order))
        .route(
            "/{id}/status",
            put(orders::update_order_status).route_layer(admin),
        )
        .route("/{id}/cancel", post(orders::cancel_order));

    Router::new()
        .route("/health", get(handler::health))
        .nest("/api/products", product_routes)
        .nest("/api/cart", cart_routes)
        .nest("/api/wishlist", wishlist_routes)
        .nest("/api/orders", order_routes)
        .fallback(handler::not_found)
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(CompressionLayer::new())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(cors_layer(&state.config))
        .with_state(state)
}
