//! Data models for the storefront
//!
//! This module defines the records kept in the store, the request payloads
//! accepted by the HTTP API and the response envelopes it returns. Every type
//! serializes with camelCase field names.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ProductId = u64;

/// Image shown for lines whose product carries no pictures
pub const PLACEHOLDER_IMAGE: &str = "/placeholder.jpg";

/// A catalog product as stored
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,

    /// Unique URL-safe identifier, derived from the name when not given
    pub slug: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub price: f64,

    /// Units on hand. `inStock` is projected from this at read time
    #[serde(default)]
    pub stock: u32,

    #[serde(default)]
    pub category_id: Option<u64>,

    #[serde(default)]
    pub images: Vec<String>,

    #[serde(default)]
    pub featured: bool,

    #[serde(default)]
    pub tags: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn primary_image(&self) -> String {
        self.images
            .first()
            .cloned()
            .unwrap_or_else(|| PLACEHOLDER_IMAGE.to_string())
    }
}

/// Read-side projection of a product with derived fields
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,

    /// Slug of the product's category, or `"uncategorized"`
    pub category: String,

    /// `stock > 0`
    pub in_stock: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: u64,
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Identifier of a cart line
///
/// Lines confirmed by the server carry a numeric id. Lines created
/// optimistically on the client carry `temp-<operationId>` until confirmed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum LineId {
    Assigned(u64),
    Temporary(String),
}

impl LineId {
    pub fn is_temporary(&self) -> bool {
        matches!(self, LineId::Temporary(_))
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineId::Assigned(id) => write!(f, "{id}"),
            LineId::Temporary(id) => f.write_str(id),
        }
    }
}

/// One product and its quantity within a cart
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub id: LineId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: f64,
    pub name: String,
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set only while an optimistic add awaits confirmation
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_optimistic: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

impl CartLine {
    pub fn subtotal(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WishlistLine {
    /// Same as `product_id`; the wishlist is a set keyed by product
    pub id: ProductId,
    pub product_id: ProductId,
    pub name: String,
    pub price: f64,
    pub image: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

/// An order placed from a cart snapshot. Only `status` changes after creation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: u64,
    pub user_id: String,
    pub items: Vec<CartLine>,
    pub total_amount: f64,
    pub status: OrderStatus,
    pub shipping_address: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ========== Requests ==========

/// Query parameters for `GET /api/products`
///
/// Every value arrives as a string; `featured` and `inStock` only filter when
/// they are the literal `"true"`.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilters {
    pub category: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub featured: Option<String>,
    pub in_stock: Option<String>,
}

/// Body of product create and update requests
#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProductPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "category_id")]
    pub category_id: Option<u64>,
    /// Category slug or display name, resolved to `category_id`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_stock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StockUpdate {
    pub quantity: i64,
    #[serde(default)]
    pub operation: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
pub struct SearchParams {
    pub q: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    #[serde(default, alias = "product_id")]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub quantity: Option<i64>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UpdateQuantityRequest {
    #[serde(default)]
    pub quantity: Option<i64>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WishlistRequest {
    #[serde(default, alias = "product_id")]
    pub product_id: Option<ProductId>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub shipping_address: Option<Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StatusUpdate {
    pub status: String,
}

// ========== Responses ==========

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

/// Result of a filtered product listing
#[derive(Debug, Clone)]
pub struct ProductPage {
    pub products: Vec<ProductView>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub products: Vec<ProductView>,
    pub total: usize,
    pub query: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CartContents {
    pub items: Vec<CartLine>,
    pub total: f64,
    pub count: u32,
}

impl CartContents {
    pub fn from_lines(items: Vec<CartLine>) -> Self {
        let total = items.iter().map(CartLine::subtotal).sum();
        let count = items.iter().map(|line| line.quantity).sum();
        Self { items, total, count }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CartSummary {
    pub total: f64,
    pub items: u32,
    pub formatted: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WishlistToggle {
    pub in_wishlist: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<WishlistLine>,
}

/// Uniform success envelope
///
/// ```json
/// { "success": true, "data": { ... }, "message": "Item added to cart successfully" }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            pagination: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

impl ApiResponse<()> {
    /// Success with only a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            pagination: None,
        }
    }
}
