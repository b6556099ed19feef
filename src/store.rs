//! Per-user session collections: carts, wishlists and orders
//!
//! Storage goes through the [`SessionRepository`] trait, a get/put/delete
//! capability keyed by `(collection, user_id)`. [`SessionStore`] layers the
//! cart, wishlist and order semantics on top and serializes every
//! read-modify-write on the same key behind a keyed mutex.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use redb::{Database, ReadableDatabase};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::catalog::StoreResult;
use crate::database::{next_sequence, TABLE_SESSIONS};
use crate::error::{AppError, AppResult};
use crate::model::{
    CartContents, CartLine, LineId, Order, OrderStatus, Product, ProductId, WishlistLine,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Cart,
    Wishlist,
    Orders,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Cart => "cart",
            Collection::Wishlist => "wishlist",
            Collection::Orders => "orders",
        }
    }

    fn key(self, user_id: &str) -> String {
        format!("{}:{}", self.as_str(), user_id)
    }
}

/// Keyed storage for per-user collections
///
/// Values are opaque JSON documents.
pub trait SessionRepository: Send + Sync {
    fn load(&self, collection: Collection, user_id: &str) -> StoreResult<Option<String>>;

    fn save(&self, collection: Collection, user_id: &str, value: &str) -> StoreResult<()>;

    fn delete(&self, collection: Collection, user_id: &str) -> StoreResult<()>;

    /// User ids holding a document in `collection`
    fn users(&self, collection: Collection) -> StoreResult<Vec<String>>;

    fn next_id(&self, sequence: &str) -> StoreResult<u64>;
}

/// Sessions persisted in the redb `sessions_v1` table
pub struct RedbSessionRepository {
    db: Arc<Database>,
}

impl RedbSessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl SessionRepository for RedbSessionRepository {
    fn load(&self, collection: Collection, user_id: &str) -> StoreResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE_SESSIONS)?;
        let key = collection.key(user_id);
        let value = table.get(key.as_str())?.map(|v| v.value().to_string());
        Ok(value)
    }

    fn save(&self, collection: Collection, user_id: &str, value: &str) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TABLE_SESSIONS)?;
            table.insert(collection.key(user_id).as_str(), value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, collection: Collection, user_id: &str) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TABLE_SESSIONS)?;
            table.remove(collection.key(user_id).as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn users(&self, collection: Collection) -> StoreResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE_SESSIONS)?;

        // "orders:" .. "orders;" covers every key with the "orders:" prefix
        let start = format!("{}:", collection.as_str());
        let end = format!("{};", collection.as_str());

        let mut users = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (key, _) = entry?;
            if let Some(user) = key.value().strip_prefix(start.as_str()) {
                users.push(user.to_string());
            }
        }
        Ok(users)
    }

    fn next_id(&self, sequence: &str) -> StoreResult<u64> {
        let write_txn = self.db.begin_write()?;
        let id = next_sequence(&write_txn, sequence)?;
        write_txn.commit()?;
        Ok(id)
    }
}

/// Process-local sessions, lost on restart
#[derive(Default)]
pub struct MemorySessionRepository {
    documents: DashMap<String, String>,
    sequences: DashMap<String, AtomicU64>,
}

impl SessionRepository for MemorySessionRepository {
    fn load(&self, collection: Collection, user_id: &str) -> StoreResult<Option<String>> {
        Ok(self
            .documents
            .get(&collection.key(user_id))
            .map(|v| v.value().clone()))
    }

    fn save(&self, collection: Collection, user_id: &str, value: &str) -> StoreResult<()> {
        self.documents
            .insert(collection.key(user_id), value.to_string());
        Ok(())
    }

    fn delete(&self, collection: Collection, user_id: &str) -> StoreResult<()> {
        self.documents.remove(&collection.key(user_id));
        Ok(())
    }

    fn users(&self, collection: Collection) -> StoreResult<Vec<String>> {
        let prefix = format!("{}:", collection.as_str());
        Ok(self
            .documents
            .iter()
            .filter_map(|entry| entry.key().strip_prefix(prefix.as_str()).map(str::to_string))
            .collect())
    }

    fn next_id(&self, sequence: &str) -> StoreResult<u64> {
        let counter = self
            .sequences
            .entry(sequence.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Cart, wishlist and order operations over a [`SessionRepository`]
#[derive(Clone)]
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self {
            repo,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Runs `f` while holding the key's lock. The map entry is dropped again
    /// once no other caller holds or waits on it
    fn with_lock<R>(&self, collection: Collection, user_id: &str, f: impl FnOnce() -> R) -> R {
        let key = collection.key(user_id);
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock();
            f()
        };

        drop(lock);
        self.locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn load<T: DeserializeOwned>(&self, collection: Collection, user_id: &str) -> AppResult<Vec<T>> {
        match self.repo.load(collection, user_id)? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| AppError::Upstream(format!("corrupt {} record: {e}", collection.as_str()))),
            None => Ok(Vec::new()),
        }
    }

    fn store<T: Serialize>(&self, collection: Collection, user_id: &str, items: &[T]) -> AppResult<()> {
        if items.is_empty() {
            self.repo.delete(collection, user_id)?;
        } else {
            let json = serde_json::to_string(items)
                .map_err(|e| AppError::Upstream(e.to_string()))?;
            self.repo.save(collection, user_id, &json)?;
        }
        Ok(())
    }

    /// Runs `f` over the collection while holding the key's lock and saves
    /// the result when `f` succeeds
    fn modify<T, R>(
        &self,
        collection: Collection,
        user_id: &str,
        f: impl FnOnce(&mut Vec<T>) -> AppResult<R>,
    ) -> AppResult<R>
    where
        T: Serialize + DeserializeOwned,
    {
        self.with_lock(collection, user_id, || -> AppResult<R> {
            let mut items = self.load(collection, user_id)?;
            let result = f(&mut items)?;
            self.store(collection, user_id, &items)?;
            Ok(result)
        })
    }

    // ========== Cart ==========

    pub fn cart(&self, user_id: &str) -> AppResult<CartContents> {
        Ok(CartContents::from_lines(self.load(Collection::Cart, user_id)?))
    }

    /// Adds `quantity` of `product`, merging into an existing line
    pub fn add_to_cart(&self, user_id: &str, product: &Product, quantity: u32) -> AppResult<CartLine> {
        self.modify(Collection::Cart, user_id, |lines: &mut Vec<CartLine>| {
            let now = Utc::now();
            if let Some(line) = lines.iter_mut().find(|l| l.product_id == product.id) {
                line.quantity = line.quantity.saturating_add(quantity);
                line.updated_at = now;
                debug!(user_id, product_id = product.id, quantity = line.quantity, "merged cart line");
                return Ok(line.clone());
            }

            let line = CartLine {
                id: LineId::Assigned(self.repo.next_id("cart_lines")?),
                product_id: product.id,
                quantity,
                price: product.price,
                name: product.name.clone(),
                image: product.primary_image(),
                created_at: now,
                updated_at: now,
                is_optimistic: false,
                operation_id: None,
            };
            debug!(user_id, product_id = product.id, quantity, "added cart line");
            lines.push(line.clone());
            Ok(line)
        })
    }

    pub fn update_cart_quantity(
        &self,
        user_id: &str,
        product_id: ProductId,
        quantity: u32,
    ) -> AppResult<CartLine> {
        self.modify(Collection::Cart, user_id, |lines: &mut Vec<CartLine>| {
            let line = lines
                .iter_mut()
                .find(|l| l.product_id == product_id)
                .ok_or_else(|| AppError::NotFound("Cart item not found".to_string()))?;
            line.quantity = quantity;
            line.updated_at = Utc::now();
            Ok(line.clone())
        })
    }

    /// Removes the line for `product_id`; a missing line is an error
    pub fn remove_from_cart(&self, user_id: &str, product_id: ProductId) -> AppResult<CartLine> {
        self.modify(Collection::Cart, user_id, |lines: &mut Vec<CartLine>| {
            let index = lines
                .iter()
                .position(|l| l.product_id == product_id)
                .ok_or_else(|| AppError::NotFound("Cart item not found".to_string()))?;
            Ok(lines.remove(index))
        })
    }

    /// Empties the cart, returning how many lines were dropped
    pub fn clear_cart(&self, user_id: &str) -> AppResult<usize> {
        self.modify(Collection::Cart, user_id, |lines: &mut Vec<CartLine>| {
            let count = lines.len();
            lines.clear();
            Ok(count)
        })
    }

    // ========== Wishlist ==========

    pub fn wishlist(&self, user_id: &str) -> AppResult<Vec<WishlistLine>> {
        self.load(Collection::Wishlist, user_id)
    }

    pub fn add_to_wishlist(&self, user_id: &str, product: &Product) -> AppResult<WishlistLine> {
        self.modify(Collection::Wishlist, user_id, |lines: &mut Vec<WishlistLine>| {
            if lines.iter().any(|l| l.product_id == product.id) {
                return Err(AppError::Conflict("Product already in wishlist".to_string()));
            }
            let line = wishlist_line(product);
            lines.push(line.clone());
            Ok(line)
        })
    }

    /// Flips membership of `product_id`. `product` is only needed when the
    /// item is being added.
    pub fn toggle_wishlist(
        &self,
        user_id: &str,
        product_id: ProductId,
        product: Option<&Product>,
    ) -> AppResult<Option<WishlistLine>> {
        self.modify(Collection::Wishlist, user_id, |lines: &mut Vec<WishlistLine>| {
            if let Some(index) = lines.iter().position(|l| l.product_id == product_id) {
                lines.remove(index);
                return Ok(None);
            }
            let product =
                product.ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;
            let line = wishlist_line(product);
            lines.push(line.clone());
            Ok(Some(line))
        })
    }

    /// Removes `product_id` if present. Unlike the cart, a no-op removal
    /// succeeds; the return value says whether anything was removed.
    pub fn remove_from_wishlist(&self, user_id: &str, product_id: ProductId) -> AppResult<bool> {
        self.modify(Collection::Wishlist, user_id, |lines: &mut Vec<WishlistLine>| {
            let before = lines.len();
            lines.retain(|l| l.product_id != product_id);
            Ok(lines.len() != before)
        })
    }

    pub fn in_wishlist(&self, user_id: &str, product_id: ProductId) -> AppResult<bool> {
        Ok(self
            .wishlist(user_id)?
            .iter()
            .any(|l| l.product_id == product_id))
    }

    pub fn clear_wishlist(&self, user_id: &str) -> AppResult<usize> {
        self.modify(Collection::Wishlist, user_id, |lines: &mut Vec<WishlistLine>| {
            let count = lines.len();
            lines.clear();
            Ok(count)
        })
    }

    /// Moves every wishlist item into the cart with quantity 1 and empties
    /// the wishlist
    pub fn move_wishlist_to_cart(&self, user_id: &str) -> AppResult<CartContents> {
        self.modify(Collection::Wishlist, user_id, |wishlist: &mut Vec<WishlistLine>| {
            let moved = std::mem::take(wishlist);
            self.modify(Collection::Cart, user_id, |cart: &mut Vec<CartLine>| {
                let now = Utc::now();
                for item in &moved {
                    match cart.iter_mut().find(|l| l.product_id == item.product_id) {
                        Some(line) => {
                            line.quantity = line.quantity.saturating_add(1);
                            line.updated_at = now;
                        }
                        None => cart.push(CartLine {
                            id: LineId::Assigned(self.repo.next_id("cart_lines")?),
                            product_id: item.product_id,
                            quantity: 1,
                            price: item.price,
                            name: item.name.clone(),
                            image: item.image.clone(),
                            created_at: now,
                            updated_at: now,
                            is_optimistic: false,
                            operation_id: None,
                        }),
                    }
                }
                Ok(CartContents::from_lines(cart.clone()))
            })
        })
    }

    // ========== Orders ==========

    /// The caller's orders, newest first
    pub fn orders(&self, user_id: &str) -> AppResult<Vec<Order>> {
        let mut orders: Vec<Order> = self.load(Collection::Orders, user_id)?;
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    pub fn order(&self, user_id: &str, order_id: u64) -> AppResult<Order> {
        self.load::<Order>(Collection::Orders, user_id)?
            .into_iter()
            .find(|o| o.id == order_id)
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))
    }

    /// Places an order from the caller's current cart
    ///
    /// The cart lock is held while the order is written, so the order sees
    /// a consistent snapshot. The cart itself is left untouched.
    pub fn create_order(&self, user_id: &str, shipping_address: Value) -> AppResult<Order> {
        self.with_lock(Collection::Cart, user_id, || -> AppResult<Order> {
            let items: Vec<CartLine> = self.load(Collection::Cart, user_id)?;
            if items.is_empty() {
                return Err(AppError::Validation("No items in order".to_string()));
            }

            let now = Utc::now();
            let order = Order {
                id: self.repo.next_id("orders")?,
                user_id: user_id.to_string(),
                total_amount: items.iter().map(CartLine::subtotal).sum(),
                items,
                status: OrderStatus::Pending,
                shipping_address,
                created_at: now,
                updated_at: now,
            };

            self.modify(Collection::Orders, user_id, |orders: &mut Vec<Order>| {
                orders.push(order.clone());
                Ok(())
            })?;

            debug!(user_id, order_id = order.id, total = order.total_amount, "order created");
            Ok(order)
        })
    }

    /// Every order in the store, newest first
    pub fn all_orders(&self) -> AppResult<Vec<Order>> {
        let mut all = Vec::new();
        for user in self.repo.users(Collection::Orders)? {
            all.extend(self.load::<Order>(Collection::Orders, &user)?);
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all)
    }

    /// Sets the status of an order regardless of its owner
    pub fn update_order_status(&self, order_id: u64, status: OrderStatus) -> AppResult<Order> {
        for user in self.repo.users(Collection::Orders)? {
            let updated = self.modify(Collection::Orders, &user, |orders: &mut Vec<Order>| {
                Ok(orders.iter_mut().find(|o| o.id == order_id).map(|order| {
                    order.status = status;
                    order.updated_at = Utc::now();
                    order.clone()
                }))
            })?;
            if let Some(order) = updated {
                return Ok(order);
            }
        }
        Err(AppError::NotFound("Order not found".to_string()))
    }

    /// Cancels one of the caller's orders; delivered orders stay delivered
    pub fn cancel_order(&self, user_id: &str, order_id: u64) -> AppResult<Order> {
        self.modify(Collection::Orders, user_id, |orders: &mut Vec<Order>| {
            let order = orders
                .iter_mut()
                .find(|o| o.id == order_id)
                .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;
            if order.status == OrderStatus::Delivered {
                return Err(AppError::Validation(
                    "Delivered orders cannot be cancelled".to_string(),
                ));
            }
            order.status = OrderStatus::Cancelled;
            order.updated_at = Utc::now();
            Ok(order.clone())
        })
    }
}

fn wishlist_line(product: &Product) -> WishlistLine {
    WishlistLine {
        id: product.id,
        product_id: product.id,
        name: product.name.clone(),
        price: product.price,
        image: product.primary_image(),
        created_at: Utc::now(),
    }
}
