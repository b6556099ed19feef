//! Wishlist endpoints under `/api/wishlist`

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    Json,
};
use serde_json::{json, Value};

use crate::database::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::model::{ApiResponse, CartContents, ProductId, WishlistLine, WishlistRequest, WishlistToggle};

fn required_product(request: WishlistRequest) -> AppResult<ProductId> {
    request
        .product_id
        .ok_or_else(|| AppError::Validation("Product ID is required".to_string()))
}

pub async fn get_wishlist(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<ApiResponse<Vec<WishlistLine>>>> {
    Ok(Json(ApiResponse::ok(state.sessions.wishlist(&user_id)?)))
}

/// Adds a product; responds 409 if it is already wishlisted
pub async fn add_to_wishlist(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    payload: Result<Json<WishlistRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<WishlistLine>>> {
    let Json(request) = payload?;
    let product = state.products.product(required_product(request)?)?;
    let line = state.sessions.add_to_wishlist(&user_id, &product)?;
    Ok(Json(
        ApiResponse::ok(line).with_message("Item added to wishlist successfully"),
    ))
}

pub async fn toggle_wishlist(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    payload: Result<Json<WishlistRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<WishlistToggle>>> {
    let Json(request) = payload?;
    let product_id = required_product(request)?;

    let product = match state.products.product(product_id) {
        Ok(product) => Some(product),
        Err(AppError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };

    let item = state
        .sessions
        .toggle_wishlist(&user_id, product_id, product.as_ref())?;

    let message = if item.is_some() {
        "Item added to wishlist successfully"
    } else {
        "Item removed from wishlist successfully"
    };

    Ok(Json(
        ApiResponse::ok(WishlistToggle {
            in_wishlist: item.is_some(),
            item,
        })
        .with_message(message),
    ))
}

/// Removes a product from the wishlist
///
/// Removing a product that is not wishlisted still succeeds; only the
/// message differs. The cart's remove responds 404 in the same situation.
pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    product_id: Result<Path<ProductId>, PathRejection>,
) -> AppResult<Json<ApiResponse<()>>> {
    let Path(product_id) = product_id?;
    let removed = state.sessions.remove_from_wishlist(&user_id, product_id)?;

    let message = if removed {
        "Item removed from wishlist successfully"
    } else {
        "Item was not in wishlist"
    };
    Ok(Json(ApiResponse::message(message)))
}

pub async fn check_wishlist(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    product_id: Result<Path<ProductId>, PathRejection>,
) -> AppResult<Json<ApiResponse<Value>>> {
    let Path(product_id) = product_id?;
    let in_wishlist = state.sessions.in_wishlist(&user_id, product_id)?;
    Ok(Json(ApiResponse::ok(json!({ "inWishlist": in_wishlist }))))
}

pub async fn clear_wishlist(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<ApiResponse<()>>> {
    state.sessions.clear_wishlist(&user_id)?;
    Ok(Json(ApiResponse::message("Wishlist cleared successfully")))
}

/// Moves every wishlisted product into the cart and empties the wishlist
pub async fn move_to_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<ApiResponse<CartContents>>> {
    let cart = state.sessions.move_wishlist_to_cart(&user_id)?;
    Ok(Json(
        ApiResponse::ok(cart).with_message("Wishlist moved to cart successfully"),
    ))
}
