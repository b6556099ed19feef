//! Client side of the storefront API
//!
//! - [`ApiClient`] - typed HTTP gateway with bearer token injection and
//!   uniform error extraction
//! - [`OptimisticCart`] - cart state that applies mutations before the server
//!   confirms them and reconciles or rolls back afterwards
//! - [`CartSync`] - drives an [`OptimisticCart`] against a [`CartBackend`]

mod gateway;
mod optimistic;

pub use gateway::{error_message, ApiClient, ApiError, ApiResult, ClientConfig};
pub use optimistic::{
    AddedLine, CartBackend, CartError, CartNotice, CartSync, CatalogEntry, Confirmation,
    Dispatch, LoadingKey, OperationId, OperationKind, OptimisticCart, PendingOperation, Ticket,
};
