//! Order endpoints under `/api/orders`

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::info;

use crate::database::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::model::{ApiResponse, CreateOrderRequest, Order, OrderStatus, StatusUpdate};

pub async fn list_orders(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<ApiResponse<Vec<Order>>>> {
    Ok(Json(ApiResponse::ok(state.sessions.orders(&user_id)?)))
}

/// Places an order from the caller's current cart
///
/// # Request Body
///
/// ```json
/// { "shippingAddress": { "line1": "1 Fjord Way", "city": "Oslo" } }
/// ```
///
/// # Response
///
/// - **201 Created** - order placed with status `pending`
/// - **400 Bad Request** - empty cart or missing shipping address
pub async fn create_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(request) = payload?;

    let shipping_address = request
        .shipping_address
        .filter(|address| !address.is_null())
        .ok_or_else(|| AppError::Validation("Shipping address is required".to_string()))?;

    let order = state.sessions.create_order(&user_id, shipping_address)?;
    info!(order_id = order.id, "order placed");

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(order))))
}

pub async fn get_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    order_id: Result<Path<u64>, PathRejection>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let Path(order_id) = order_id?;
    Ok(Json(ApiResponse::ok(state.sessions.order(&user_id, order_id)?)))
}

/// Admin: every order across all users, newest first
pub async fn all_orders(State(state): State<AppState>) -> AppResult<Json<ApiResponse<Vec<Order>>>> {
    Ok(Json(ApiResponse::ok(state.sessions.all_orders()?)))
}

/// Admin: `PUT /api/orders/{id}/status` with `{ "status": "shipped" }`
pub async fn update_order_status(
    State(state): State<AppState>,
    order_id: Result<Path<u64>, PathRejection>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let Path(order_id) = order_id?;
    let Json(update) = payload?;

    let status = OrderStatus::parse(&update.status)
        .ok_or_else(|| AppError::Validation("Invalid status".to_string()))?;

    let order = state.sessions.update_order_status(order_id, status)?;
    Ok(Json(
        ApiResponse::ok(order).with_message("Order status updated successfully"),
    ))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    order_id: Result<Path<u64>, PathRejection>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let Path(order_id) = order_id?;
    let order = state.sessions.cancel_order(&user_id, order_id)?;
    Ok(Json(
        ApiResponse::ok(order).with_message("Order cancelled successfully"),
    ))
}
