//! Product and category endpoints under `/api/products`
//!
//! Reads are public. Writes sit behind the admin guard (see `route`).

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::database::AppState;
use crate::error::AppResult;
use crate::model::{
    ApiResponse, Category, LimitParams, NewCategory, Pagination, ProductFilters, ProductId,
    ProductPayload, ProductView, SearchParams, StockUpdate,
};

/// Lists products with filtering, sorting and pagination
///
/// # Example Request
///
/// `GET /api/products?minPrice=100&maxPrice=500&sort=price&order=desc&limit=2`
///
/// # Response
///
/// ```json
/// {
///   "success": true,
///   "data": [...],
///   "pagination": { "total": 5, "limit": 2, "offset": 0, "hasMore": true }
/// }
/// ```
pub async fn list_products(
    State(state): State<AppState>,
    query: Result<Query<ProductFilters>, QueryRejection>,
) -> AppResult<Json<ApiResponse<Vec<ProductView>>>> {
    let Query(filters) = query?;
    let page = state.products.list(&filters)?;

    Ok(Json(
        ApiResponse::ok(page.products)
            .with_pagination(page.pagination)
            .with_message("Products retrieved successfully"),
    ))
}

pub async fn get_product(
    State(state): State<AppState>,
    id: Result<Path<ProductId>, PathRejection>,
) -> AppResult<Json<ApiResponse<ProductView>>> {
    let Path(id) = id?;
    let product = state.products.get(id)?;
    Ok(Json(ApiResponse::ok(product).with_message("Product retrieved successfully")))
}

/// Creates a product
///
/// # Response
///
/// - **201 Created** - product stored
/// - **400 Bad Request** - invalid fields, listed in `details`
/// - **403 Forbidden** - the write was blocked by the catalog policy
/// - **409 Conflict** - slug already taken
pub async fn create_product(
    State(state): State<AppState>,
    payload: Result<Json<ProductPayload>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(payload) = payload?;
    let product = state.products.create(payload)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(product).with_message("Product created successfully")),
    ))
}

pub async fn update_product(
    State(state): State<AppState>,
    id: Result<Path<ProductId>, PathRejection>,
    payload: Result<Json<ProductPayload>, JsonRejection>,
) -> AppResult<Json<ApiResponse<ProductView>>> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let product = state.products.update(id, payload)?;
    Ok(Json(ApiResponse::ok(product).with_message("Product updated successfully")))
}

pub async fn delete_product(
    State(state): State<AppState>,
    id: Result<Path<ProductId>, PathRejection>,
) -> AppResult<Json<ApiResponse<ProductView>>> {
    let Path(id) = id?;
    let product = state.products.delete(id)?;
    Ok(Json(ApiResponse::ok(product).with_message("Product deleted successfully")))
}

/// `PUT /api/products/{id}/stock` with `{ "quantity": 3, "operation": "set" | "add" | "subtract" }`
pub async fn update_stock(
    State(state): State<AppState>,
    id: Result<Path<ProductId>, PathRejection>,
    payload: Result<Json<StockUpdate>, JsonRejection>,
) -> AppResult<Json<ApiResponse<ProductView>>> {
    let Path(id) = id?;
    let Json(update) = payload?;
    let product = state.products.update_stock(id, update)?;
    Ok(Json(ApiResponse::ok(product).with_message("Product stock updated successfully")))
}

pub async fn list_categories(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<Category>>>> {
    let categories = state.products.categories()?;
    Ok(Json(ApiResponse::ok(categories).with_message("Categories retrieved successfully")))
}

pub async fn create_category(
    State(state): State<AppState>,
    payload: Result<Json<NewCategory>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(new) = payload?;
    let category = state.products.create_category(new)?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(category).with_message("Category created successfully")),
    ))
}

pub async fn featured_products(
    State(state): State<AppState>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> AppResult<Json<ApiResponse<Vec<ProductView>>>> {
    let Query(params) = params?;
    let products = state.products.featured(params.limit.unwrap_or(10))?;
    Ok(Json(
        ApiResponse::ok(products).with_message("Featured products retrieved successfully"),
    ))
}

/// `GET /api/products/search?q=oak&limit=20&offset=0`
pub async fn search_products(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> AppResult<impl IntoResponse> {
    let Query(params) = params?;
    let limit = params.limit.unwrap_or(20);
    let offset = params.offset.unwrap_or(0);

    let result = state
        .products
        .search(params.q.as_deref().unwrap_or_default(), limit, offset)?;

    let pagination = Pagination {
        total: result.total,
        limit,
        offset,
        has_more: None,
    };

    Ok(Json(json!({
        "success": true,
        "data": result.products,
        "pagination": pagination,
        "query": result.query,
        "message": "Products searched successfully"
    })))
}
