//! Database initialization and table definitions
//!
//! This module handles the setup of the embedded redb database and the shared
//! application state handed to every request handler.

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use std::sync::Arc;

use crate::catalog::RedbProductRepository;
use crate::config::{Config, SessionBackend};
use crate::error::StoreError;
use crate::middleware::RateLimiter;
use crate::service::ProductService;
use crate::store::{MemorySessionRepository, RedbSessionRepository, SessionRepository, SessionStore};

/// Catalog products
///
/// Key: product id
/// Value: JSON-serialized `Product`
pub const TABLE_PRODUCTS: TableDefinition<u64, &str> = TableDefinition::new("products_v1");

/// Unique slug index for products
///
/// Key: slug (e.g. "oak-dining-table")
/// Value: product id
pub const TABLE_PRODUCT_SLUGS: TableDefinition<&str, u64> =
    TableDefinition::new("product_slugs_v1");

/// Product categories
///
/// Key: category id
/// Value: JSON-serialized `Category`
pub const TABLE_CATEGORIES: TableDefinition<u64, &str> = TableDefinition::new("categories_v1");

/// Per-user collections (cart, wishlist, orders)
///
/// Key: composite key "{collection}:{user_id}"
/// Value: JSON-serialized list of lines or orders
///
/// Example:
/// - Key: "cart:user_123"
/// - Value: '[{"id":1,"productId":7,"quantity":2,...}]'
pub const TABLE_SESSIONS: TableDefinition<&str, &str> = TableDefinition::new("sessions_v1");

/// Monotonic id sequences
///
/// Key: sequence name ("products", "categories", "cart_lines", "orders")
/// Value: last issued id
pub const TABLE_SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences_v1");

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub products: ProductService,
    pub sessions: SessionStore,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wires repositories over an opened database according to `config`
    pub fn new(db: Arc<Database>, config: Config) -> Self {
        let catalog = RedbProductRepository::new(db.clone(), config.catalog_read_only);

        let sessions: Arc<dyn SessionRepository> = match config.session_backend {
            SessionBackend::Redb => Arc::new(RedbSessionRepository::new(db)),
            SessionBackend::Memory => Arc::new(MemorySessionRepository::default()),
        };

        let rate_limiter = RateLimiter::new(config.rate_limit_max);

        Self {
            config: Arc::new(config),
            products: ProductService::new(Arc::new(catalog)),
            sessions: SessionStore::new(sessions),
            rate_limiter,
        }
    }
}

/// Initializes the embedded database and creates required tables
///
/// # Arguments
///
/// * `db_path` - File path where the database should be stored (e.g., "data.db")
///
/// # Example
///
/// ```no_run
/// # use storefront::database::init_db;
/// let db = init_db("data.db").expect("Failed to initialize database");
/// ```
pub fn init_db(db_path: &str) -> Result<Database, redb::Error> {
    let db = Database::create(db_path)?;

    let write_txn = db.begin_write()?;
    {
        write_txn.open_table(TABLE_PRODUCTS)?;
        write_txn.open_table(TABLE_PRODUCT_SLUGS)?;
        write_txn.open_table(TABLE_CATEGORIES)?;
        write_txn.open_table(TABLE_SESSIONS)?;
        write_txn.open_table(TABLE_SEQUENCES)?;
    }
    write_txn.commit()?;

    Ok(db)
}

/// Issues the next id of `sequence` inside an open write transaction
pub fn next_sequence(txn: &WriteTransaction, sequence: &str) -> Result<u64, StoreError> {
    let mut table = txn.open_table(TABLE_SEQUENCES)?;
    let next = table.get(sequence)?.map(|v| v.value()).unwrap_or(0) + 1;
    table.insert(sequence, next)?;
    Ok(next)
}
