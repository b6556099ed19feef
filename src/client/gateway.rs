//! HTTP gateway to the storefront API

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::model::{
    ApiResponse, CartContents, CartLine, CartSummary, Category, NewCategory, Order, OrderStatus,
    ProductId, ProductPayload, ProductView, StockUpdate, WishlistLine, WishlistToggle,
};

/// Gateway error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server answered with a non-success status
    #[error("{message}")]
    Status { status: StatusCode, message: String },

    /// The request never produced a response, or its body was unreadable
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A success response without the expected payload
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. "http://localhost:5000/api"
    pub base_url: String,

    /// Bearer token sent with every request when present
    pub token: Option<String>,

    /// Request timeout in seconds
    pub timeout: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            token: None,
            timeout: 30,
        }
    }
}

/// Extracts a human-readable message from an error response body
///
/// Looks at `message`, then `error`, then the `details[].message` entries
/// joined with ", ", and falls back to the status line.
pub fn error_message(status: StatusCode, body: &str) -> String {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    let text = |key: &str| {
        parsed
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(message) = text("message").or_else(|| text("error")) {
        return message;
    }

    if let Some(details) = parsed.get("details").and_then(Value::as_array) {
        let joined = details
            .iter()
            .filter_map(|d| d.get("message").and_then(Value::as_str))
            .filter(|m| !m.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        if !joined.is_empty() {
            return joined;
        }
    }

    format!(
        "HTTP {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown Status")
    )
}

/// HTTP client for the storefront API
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let request = self.client.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> ApiResult<T> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status,
                message: error_message(status, &body),
            });
        }

        Ok(response.json().await?)
    }

    async fn send<T: DeserializeOwned>(&self, method: Method, path: &str) -> ApiResult<T> {
        Self::execute(self.request(method, path)).await
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        Self::execute(self.request(method, path).json(body)).await
    }

    fn data<T>(response: ApiResponse<T>) -> ApiResult<T> {
        response
            .data
            .ok_or_else(|| ApiError::InvalidResponse("missing data".to_string()))
    }

    // ========== Products ==========

    /// `GET /products` with raw query parameters, e.g. `[("sort", "price")]`
    pub async fn products(&self, query: &[(&str, &str)]) -> ApiResult<ApiResponse<Vec<ProductView>>> {
        Self::execute(self.request(Method::GET, "products").query(query)).await
    }

    pub async fn product(&self, id: ProductId) -> ApiResult<ProductView> {
        Self::data(self.send(Method::GET, &format!("products/{id}")).await?)
    }

    pub async fn categories(&self) -> ApiResult<Vec<Category>> {
        Self::data(self.send(Method::GET, "products/categories").await?)
    }

    pub async fn create_category(&self, category: &NewCategory) -> ApiResult<Category> {
        Self::data(self.send_json(Method::POST, "products/categories", category).await?)
    }

    pub async fn featured_products(&self, limit: usize) -> ApiResult<Vec<ProductView>> {
        let request = self
            .request(Method::GET, "products/featured")
            .query(&[("limit", limit)]);
        Self::data(Self::execute(request).await?)
    }

    /// `GET /products/search`; the envelope carries `pagination.total`
    pub async fn search_products(
        &self,
        q: &str,
        limit: usize,
        offset: usize,
    ) -> ApiResult<ApiResponse<Vec<ProductView>>> {
        let request = self.request(Method::GET, "products/search").query(&[
            ("q", q.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ]);
        Self::execute(request).await
    }

    pub async fn update_stock(&self, id: ProductId, update: &StockUpdate) -> ApiResult<ProductView> {
        Self::data(
            self.send_json(Method::PUT, &format!("products/{id}/stock"), update)
                .await?,
        )
    }

    pub async fn create_product(&self, payload: &ProductPayload) -> ApiResult<ProductView> {
        Self::data(self.send_json(Method::POST, "products", payload).await?)
    }

    pub async fn update_product(&self, id: ProductId, payload: &ProductPayload) -> ApiResult<ProductView> {
        Self::data(self.send_json(Method::PUT, &format!("products/{id}"), payload).await?)
    }

    pub async fn delete_product(&self, id: ProductId) -> ApiResult<ProductView> {
        Self::data(self.send(Method::DELETE, &format!("products/{id}")).await?)
    }

    // ========== Cart ==========

    pub async fn cart(&self) -> ApiResult<CartContents> {
        Self::data(self.send(Method::GET, "cart").await?)
    }

    pub async fn cart_summary(&self) -> ApiResult<CartSummary> {
        Self::data(self.send(Method::GET, "cart/summary").await?)
    }

    pub async fn add_to_cart(&self, product_id: ProductId, quantity: u32) -> ApiResult<CartLine> {
        let body = json!({ "productId": product_id, "quantity": quantity });
        Self::data(self.send_json(Method::POST, "cart", &body).await?)
    }

    pub async fn update_cart_item(&self, product_id: ProductId, quantity: u32) -> ApiResult<CartLine> {
        let body = json!({ "quantity": quantity });
        Self::data(
            self.send_json(Method::PUT, &format!("cart/{product_id}"), &body)
                .await?,
        )
    }

    pub async fn remove_from_cart(&self, product_id: ProductId) -> ApiResult<()> {
        self.send::<ApiResponse<Value>>(Method::DELETE, &format!("cart/{product_id}"))
            .await?;
        Ok(())
    }

    pub async fn clear_cart(&self) -> ApiResult<()> {
        self.send::<ApiResponse<Value>>(Method::DELETE, "cart").await?;
        Ok(())
    }

    // ========== Wishlist ==========

    pub async fn wishlist(&self) -> ApiResult<Vec<WishlistLine>> {
        Self::data(self.send(Method::GET, "wishlist").await?)
    }

    pub async fn add_to_wishlist(&self, product_id: ProductId) -> ApiResult<WishlistLine> {
        let body = json!({ "productId": product_id });
        Self::data(self.send_json(Method::POST, "wishlist", &body).await?)
    }

    pub async fn toggle_wishlist(&self, product_id: ProductId) -> ApiResult<WishlistToggle> {
        let body = json!({ "productId": product_id });
        Self::data(self.send_json(Method::POST, "wishlist/toggle", &body).await?)
    }

    pub async fn remove_from_wishlist(&self, product_id: ProductId) -> ApiResult<()> {
        self.send::<ApiResponse<Value>>(Method::DELETE, &format!("wishlist/{product_id}"))
            .await?;
        Ok(())
    }

    pub async fn in_wishlist(&self, product_id: ProductId) -> ApiResult<bool> {
        let data: Value = Self::data(
            self.send(Method::GET, &format!("wishlist/check/{product_id}"))
                .await?,
        )?;
        data.get("inWishlist")
            .and_then(Value::as_bool)
            .ok_or_else(|| ApiError::InvalidResponse("missing inWishlist".to_string()))
    }

    /// Moves every wishlisted product into the cart, returning the cart
    pub async fn move_wishlist_to_cart(&self) -> ApiResult<CartContents> {
        Self::data(self.send(Method::POST, "wishlist/move-to-cart").await?)
    }

    pub async fn clear_wishlist(&self) -> ApiResult<()> {
        self.send::<ApiResponse<Value>>(Method::DELETE, "wishlist").await?;
        Ok(())
    }

    // ========== Orders ==========

    pub async fn orders(&self) -> ApiResult<Vec<Order>> {
        Self::data(self.send(Method::GET, "orders").await?)
    }

    /// Admin: every order across all users
    pub async fn all_orders(&self) -> ApiResult<Vec<Order>> {
        Self::data(self.send(Method::GET, "orders/all").await?)
    }

    pub async fn order(&self, id: u64) -> ApiResult<Order> {
        Self::data(self.send(Method::GET, &format!("orders/{id}")).await?)
    }

    pub async fn create_order(&self, shipping_address: Value) -> ApiResult<Order> {
        let body = json!({ "shippingAddress": shipping_address });
        Self::data(self.send_json(Method::POST, "orders", &body).await?)
    }

    pub async fn update_order_status(&self, id: u64, status: OrderStatus) -> ApiResult<Order> {
        let body = json!({ "status": status });
        Self::data(
            self.send_json(Method::PUT, &format!("orders/{id}/status"), &body)
                .await?,
        )
    }

    pub async fn cancel_order(&self, id: u64) -> ApiResult<Order> {
        Self::data(self.send(Method::POST, &format!("orders/{id}/cancel")).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_prefers_message_then_error() {
        let body = r#"{"success":false,"error":"Conflict","message":"Product with this slug already exists"}"#;
        assert_eq!(
            error_message(StatusCode::CONFLICT, body),
            "Product with this slug already exists"
        );

        let body = r#"{"error":"Route not found"}"#;
        assert_eq!(error_message(StatusCode::NOT_FOUND, body), "Route not found");
    }

    #[test]
    fn message_joins_validation_details() {
        let body = r#"{"details":[{"field":"name","message":"Name is required"},{"field":"price","message":"Price is required"}]}"#;
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, body),
            "Name is required, Price is required"
        );
    }

    #[test]
    fn message_falls_back_to_status_line() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "<html>upstream down</html>"),
            "HTTP 502: Bad Gateway"
        );
    }
}
