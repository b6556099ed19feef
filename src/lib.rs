//! Library exports for the storefront
//!
//! The server modules back the `storefront` binary; [`client`] holds the
//! HTTP gateway and the optimistic cart used by API consumers.

pub mod catalog;
pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod model;
pub mod route;
pub mod service;
pub mod store;
