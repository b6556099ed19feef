//! Cart endpoints under `/api/cart`
//!
//! Every route is scoped to the caller's identity.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    Json,
};

use crate::database::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::model::{
    AddToCartRequest, ApiResponse, CartContents, CartLine, CartSummary, ProductId,
    UpdateQuantityRequest,
};

fn positive_quantity(quantity: i64) -> Option<u32> {
    u32::try_from(quantity).ok().filter(|q| *q >= 1)
}

/// Returns the cart with its total price and item count
///
/// ```json
/// { "success": true, "data": { "items": [...], "total": 149.97, "count": 3 } }
/// ```
pub async fn get_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<ApiResponse<CartContents>>> {
    Ok(Json(ApiResponse::ok(state.sessions.cart(&user_id)?)))
}

pub async fn cart_summary(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<ApiResponse<CartSummary>>> {
    let cart = state.sessions.cart(&user_id)?;
    Ok(Json(ApiResponse::ok(CartSummary {
        total: cart.total,
        items: cart.count,
        formatted: format!("${:.2}", cart.total),
    })))
}

/// Adds a product to the cart
///
/// # Request Body
///
/// ```json
/// { "productId": 7, "quantity": 2 }
/// ```
///
/// `quantity` defaults to 1. Adding a product already in the cart merges the
/// quantities into the existing line.
pub async fn add_to_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    payload: Result<Json<AddToCartRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<CartLine>>> {
    let Json(request) = payload?;

    let product_id = request
        .product_id
        .ok_or_else(|| AppError::Validation("Product ID is required".to_string()))?;
    let quantity = positive_quantity(request.quantity.unwrap_or(1))
        .ok_or_else(|| AppError::Validation("Quantity must be at least 1".to_string()))?;

    let product = state.products.product(product_id)?;
    let line = state.sessions.add_to_cart(&user_id, &product, quantity)?;

    Ok(Json(
        ApiResponse::ok(line).with_message("Item added to cart successfully"),
    ))
}

pub async fn update_cart_item(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    product_id: Result<Path<ProductId>, PathRejection>,
    payload: Result<Json<UpdateQuantityRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<CartLine>>> {
    let Path(product_id) = product_id?;
    let Json(request) = payload?;

    let quantity = request.quantity.and_then(positive_quantity).ok_or_else(|| {
        AppError::Validation("Product ID and valid quantity are required".to_string())
    })?;

    let line = state
        .sessions
        .update_cart_quantity(&user_id, product_id, quantity)?;

    Ok(Json(
        ApiResponse::ok(line).with_message("Cart item updated successfully"),
    ))
}

/// Removes a line; responds 404 when the product is not in the cart
pub async fn remove_from_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    product_id: Result<Path<ProductId>, PathRejection>,
) -> AppResult<Json<ApiResponse<()>>> {
    let Path(product_id) = product_id?;
    state.sessions.remove_from_cart(&user_id, product_id)?;
    Ok(Json(ApiResponse::message("Item removed from cart successfully")))
}

pub async fn clear_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<ApiResponse<()>>> {
    state.sessions.clear_cart(&user_id)?;
    Ok(Json(ApiResponse::message("Cart cleared successfully")))
}
