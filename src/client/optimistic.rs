//! Optimistic cart protocol
//!
//! Every cart mutation is applied to local state first, recorded as a
//! [`PendingOperation`] carrying just enough of the prior state to undo it,
//! and then dispatched to the server. When the server answers the operation
//! is either confirmed (server identifiers and quantities are adopted) or
//! rolled back (the prior state is restored without disturbing lines that
//! other operations touched in the meantime).
//!
//! [`OptimisticCart`] is the synchronous state machine; [`CartSync`] drives it
//! against a [`CartBackend`] such as [`ApiClient`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::gateway::{ApiClient, ApiError};
use crate::model::{CartLine, LineId, Product, ProductId, ProductView, PLACEHOLDER_IMAGE};

pub type OperationId = String;

const NOTICE_CAPACITY: usize = 64;

/// Name shown for lines whose product is missing from the local catalog
const UNKNOWN_PRODUCT: &str = "Unknown Product";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Adding,
    Removing,
    Updating,
    Clearing,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Adding => "adding",
            OperationKind::Removing => "removing",
            OperationKind::Updating => "updating",
            OperationKind::Clearing => "clearing",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            OperationKind::Adding => "add",
            OperationKind::Removing => "remove",
            OperationKind::Updating => "update",
            OperationKind::Clearing => "clear",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an in-flight operation targets: one product, or the whole cart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadingKey {
    Product(ProductId),
    Clear,
}

/// Prior state captured when an operation is applied
#[derive(Debug, Clone, PartialEq)]
enum Snapshot {
    /// The add created a new line tagged with the operation id
    NewLine { quantity: u32 },
    /// The add was merged into an existing line
    Merged { quantity: u32 },
    Line(CartLine),
    Quantity(u32),
    Cart(Vec<CartLine>),
}

#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub target: LoadingKey,
    sequence: u64,
    snapshot: Snapshot,
}

/// Request to send to the server for an applied operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Add { product_id: ProductId, quantity: u32 },
    Update { product_id: ProductId, quantity: u32 },
    Remove { product_id: ProductId },
    Clear,
}

/// Handle for an operation that has been applied locally and awaits its
/// server outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub operation_id: OperationId,
    pub dispatch: Dispatch,
}

/// Identifier and quantity of a line as the server stored it
#[derive(Debug, Clone, PartialEq)]
pub struct AddedLine {
    pub id: LineId,
    pub quantity: u32,
}

impl From<CartLine> for AddedLine {
    fn from(line: CartLine) -> Self {
        Self {
            id: line.id,
            quantity: line.quantity,
        }
    }
}

/// Successful server outcome of a dispatched operation
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    Added(AddedLine),
    Done,
}

/// Change notifications, one `Applied` and then one terminal notice per
/// operation
#[derive(Debug, Clone, PartialEq)]
pub enum CartNotice {
    Applied {
        operation_id: OperationId,
        kind: OperationKind,
        target: LoadingKey,
    },
    Confirmed {
        operation_id: OperationId,
        kind: OperationKind,
        target: LoadingKey,
    },
    RolledBack {
        operation_id: OperationId,
        kind: OperationKind,
        target: LoadingKey,
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CartError {
    #[error("Please sign in to manage your cart")]
    NotAuthenticated,

    #[error("Product {0} is not in the cart")]
    NotFound(ProductId),

    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error("Unknown operation: {0}")]
    UnknownOperation(OperationId),

    #[error("{0}")]
    Rejected(#[from] ApiError),
}

/// Display fields used for lines created before the server answers
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    pub price: f64,
    pub image: String,
}

impl Default for CatalogEntry {
    fn default() -> Self {
        Self {
            name: UNKNOWN_PRODUCT.to_string(),
            price: 0.0,
            image: PLACEHOLDER_IMAGE.to_string(),
        }
    }
}

impl From<&Product> for CatalogEntry {
    fn from(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            price: product.price,
            image: product.primary_image(),
        }
    }
}

impl From<&ProductView> for CatalogEntry {
    fn from(view: &ProductView) -> Self {
        Self::from(&view.product)
    }
}

fn new_operation_id(kind: OperationKind) -> OperationId {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("{}-{}-{}", kind.prefix(), Utc::now().timestamp_millis(), suffix)
}

/// Client-side cart with optimistic mutations
///
/// `begin_*` methods apply a mutation and return a [`Ticket`] to dispatch.
/// The outcome is reported back with [`confirm`](Self::confirm) or
/// [`rollback`](Self::rollback). Operations may resolve in any order.
#[derive(Debug)]
pub struct OptimisticCart {
    user: Option<String>,
    lines: Vec<CartLine>,
    pending: Vec<PendingOperation>,
    loading: HashMap<LoadingKey, OperationKind>,
    /// Sequence of the most recent operation applied to each product
    latest: HashMap<ProductId, u64>,
    next_sequence: u64,
    catalog: HashMap<ProductId, CatalogEntry>,
    notices: broadcast::Sender<CartNotice>,
}

impl OptimisticCart {
    pub fn new(user: Option<String>) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            user,
            lines: Vec::new(),
            pending: Vec::new(),
            loading: HashMap::new(),
            latest: HashMap::new(),
            next_sequence: 0,
            catalog: HashMap::new(),
            notices,
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Signing out drops local lines; in-flight operations still resolve
    pub fn set_user(&mut self, user: Option<String>) {
        if user.is_none() {
            self.lines.clear();
        }
        self.user = user;
    }

    pub fn set_catalog<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (ProductId, CatalogEntry)>,
    {
        self.catalog = entries.into_iter().collect();
    }

    /// Replaces local lines with the server's cart
    pub fn load(&mut self, lines: Vec<CartLine>) {
        self.lines = lines;
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn line(&self, product_id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.product_id == product_id)
    }

    pub fn total(&self) -> f64 {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    pub fn count(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    pub fn loading(&self, key: LoadingKey) -> Option<OperationKind> {
        self.loading.get(&key).copied()
    }

    pub fn loading_map(&self) -> &HashMap<LoadingKey, OperationKind> {
        &self.loading
    }

    pub fn is_loading(&self) -> bool {
        !self.loading.is_empty()
    }

    pub fn pending_operations(&self) -> HashSet<&str> {
        self.pending.iter().map(|op| op.id.as_str()).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CartNotice> {
        self.notices.subscribe()
    }

    // ========== Apply ==========

    pub fn begin_add(&mut self, product_id: ProductId, quantity: u32) -> Result<Ticket, CartError> {
        self.require_user()?;
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }

        let kind = OperationKind::Adding;
        let operation_id = new_operation_id(kind);
        let now = Utc::now();

        let snapshot = match self.line_mut(product_id) {
            Some(line) => {
                line.quantity += quantity;
                line.updated_at = now;
                Snapshot::Merged { quantity }
            }
            None => {
                let entry = self.catalog.get(&product_id).cloned().unwrap_or_default();
                self.lines.push(CartLine {
                    id: LineId::Temporary(format!("temp-{operation_id}")),
                    product_id,
                    quantity,
                    price: entry.price,
                    name: entry.name,
                    image: entry.image,
                    created_at: now,
                    updated_at: now,
                    is_optimistic: true,
                    operation_id: Some(operation_id.clone()),
                });
                Snapshot::NewLine { quantity }
            }
        };

        Ok(self.track(
            operation_id,
            kind,
            LoadingKey::Product(product_id),
            snapshot,
            Dispatch::Add { product_id, quantity },
        ))
    }

    pub fn begin_remove(&mut self, product_id: ProductId) -> Result<Ticket, CartError> {
        self.require_user()?;

        let index = self
            .lines
            .iter()
            .position(|line| line.product_id == product_id)
            .ok_or(CartError::NotFound(product_id))?;
        let removed = self.lines.remove(index);

        let kind = OperationKind::Removing;
        Ok(self.track(
            new_operation_id(kind),
            kind,
            LoadingKey::Product(product_id),
            Snapshot::Line(removed),
            Dispatch::Remove { product_id },
        ))
    }

    /// Sets a line's quantity. Zero or less removes the line
    pub fn begin_update(&mut self, product_id: ProductId, quantity: i64) -> Result<Ticket, CartError> {
        if quantity <= 0 {
            return self.begin_remove(product_id);
        }
        self.require_user()?;
        let quantity = u32::try_from(quantity).map_err(|_| CartError::InvalidQuantity)?;

        let line = self
            .line_mut(product_id)
            .ok_or(CartError::NotFound(product_id))?;
        let prior = line.quantity;
        line.quantity = quantity;
        line.updated_at = Utc::now();

        let kind = OperationKind::Updating;
        Ok(self.track(
            new_operation_id(kind),
            kind,
            LoadingKey::Product(product_id),
            Snapshot::Quantity(prior),
            Dispatch::Update { product_id, quantity },
        ))
    }

    pub fn begin_clear(&mut self) -> Result<Ticket, CartError> {
        self.require_user()?;

        let snapshot = std::mem::take(&mut self.lines);
        let kind = OperationKind::Clearing;
        Ok(self.track(
            new_operation_id(kind),
            kind,
            LoadingKey::Clear,
            Snapshot::Cart(snapshot),
            Dispatch::Clear,
        ))
    }

    // ========== Resolve ==========

    pub fn confirm(&mut self, operation_id: &str, outcome: Confirmation) -> Result<(), CartError> {
        let op = self.take_pending(operation_id)?;

        if let (LoadingKey::Product(product_id), Confirmation::Added(added)) = (op.target, outcome) {
            let is_latest = self.is_latest(product_id, op.sequence);
            let line = match op.snapshot {
                Snapshot::NewLine { .. } => self
                    .lines
                    .iter_mut()
                    .find(|line| line.operation_id.as_deref() == Some(operation_id)),
                _ => self.line_mut(product_id),
            };

            if let Some(line) = line {
                if line.id.is_temporary() || line.operation_id.as_deref() == Some(operation_id) {
                    line.id = added.id;
                    line.is_optimistic = false;
                    line.operation_id = None;
                }
                if is_latest {
                    line.quantity = added.quantity;
                }
                line.updated_at = Utc::now();
            }
        }

        debug!(operation_id, kind = %op.kind, "cart operation confirmed");
        self.settle(&op);
        self.notify(CartNotice::Confirmed {
            operation_id: op.id,
            kind: op.kind,
            target: op.target,
        });
        Ok(())
    }

    pub fn rollback(&mut self, operation_id: &str, message: &str) -> Result<(), CartError> {
        let op = self.take_pending(operation_id)?;

        match (&op.snapshot, op.target) {
            (Snapshot::NewLine { quantity }, LoadingKey::Product(product_id)) => {
                let index = self
                    .lines
                    .iter()
                    .position(|line| line.operation_id.as_deref() == Some(operation_id))
                    // An untagged line means a merged add confirmed first and
                    // cleared the tag; lines tagged by other operations are not ours
                    .or_else(|| {
                        self.lines.iter().position(|line| {
                            line.product_id == product_id && line.operation_id.is_none()
                        })
                    });
                if let Some(index) = index {
                    self.subtract(index, *quantity);
                }
            }
            (Snapshot::Merged { quantity }, LoadingKey::Product(product_id)) => {
                if let Some(index) = self.lines.iter().position(|line| line.product_id == product_id) {
                    self.subtract(index, *quantity);
                }
            }
            (Snapshot::Line(removed), LoadingKey::Product(product_id)) => {
                if self.line(product_id).is_none() {
                    self.lines.push(removed.clone());
                }
            }
            (Snapshot::Quantity(prior), LoadingKey::Product(product_id)) => {
                if self.is_latest(product_id, op.sequence) {
                    if let Some(line) = self.line_mut(product_id) {
                        line.quantity = *prior;
                        line.updated_at = Utc::now();
                    }
                } else if let Some(next) = self.pending.iter_mut().find(|next| {
                    next.kind == OperationKind::Updating
                        && next.target == op.target
                        && next.sequence > op.sequence
                }) {
                    // A later update now owns the revert; it must restore
                    // the value from before this one.
                    next.snapshot = Snapshot::Quantity(*prior);
                }
            }
            (Snapshot::Cart(snapshot), _) => {
                let restored: HashSet<ProductId> =
                    snapshot.iter().map(|line| line.product_id).collect();
                let added_since: Vec<CartLine> = self
                    .lines
                    .drain(..)
                    .filter(|line| !restored.contains(&line.product_id))
                    .collect();
                self.lines = snapshot.clone();
                self.lines.extend(added_since);
            }
            _ => {}
        }

        warn!(operation_id, kind = %op.kind, message, "cart operation rolled back");
        self.settle(&op);
        self.notify(CartNotice::RolledBack {
            operation_id: op.id,
            kind: op.kind,
            target: op.target,
            message: message.to_string(),
        });
        Ok(())
    }

    // ========== Internals ==========

    fn require_user(&self) -> Result<(), CartError> {
        match self.user {
            Some(_) => Ok(()),
            None => Err(CartError::NotAuthenticated),
        }
    }

    fn line_mut(&mut self, product_id: ProductId) -> Option<&mut CartLine> {
        self.lines.iter_mut().find(|line| line.product_id == product_id)
    }

    fn subtract(&mut self, index: usize, quantity: u32) {
        let line = &mut self.lines[index];
        if line.quantity <= quantity {
            self.lines.remove(index);
        } else {
            line.quantity -= quantity;
            line.updated_at = Utc::now();
        }
    }

    fn is_latest(&self, product_id: ProductId, sequence: u64) -> bool {
        self.latest.get(&product_id) == Some(&sequence)
    }

    fn track(
        &mut self,
        operation_id: OperationId,
        kind: OperationKind,
        target: LoadingKey,
        snapshot: Snapshot,
        dispatch: Dispatch,
    ) -> Ticket {
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        if let LoadingKey::Product(product_id) = target {
            self.latest.insert(product_id, sequence);
        }

        self.pending.push(PendingOperation {
            id: operation_id.clone(),
            kind,
            target,
            sequence,
            snapshot,
        });
        self.loading.insert(target, kind);

        self.notify(CartNotice::Applied {
            operation_id: operation_id.clone(),
            kind,
            target,
        });
        Ticket {
            operation_id,
            dispatch,
        }
    }

    fn take_pending(&mut self, operation_id: &str) -> Result<PendingOperation, CartError> {
        let index = self
            .pending
            .iter()
            .position(|op| op.id == operation_id)
            .ok_or_else(|| CartError::UnknownOperation(operation_id.to_string()))?;
        Ok(self.pending.remove(index))
    }

    /// Clears the loading flag unless another operation on the same target
    /// is still in flight
    fn settle(&mut self, op: &PendingOperation) {
        match self.pending.iter().rev().find(|other| other.target == op.target) {
            Some(other) => {
                self.loading.insert(op.target, other.kind);
            }
            None => {
                self.loading.remove(&op.target);
            }
        }
        if let LoadingKey::Product(product_id) = op.target {
            if !self.pending.iter().any(|other| other.target == op.target) {
                self.latest.remove(&product_id);
            }
        }
    }

    fn notify(&self, notice: CartNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}

/// Server side of the cart as seen by [`CartSync`]
#[async_trait]
pub trait CartBackend: Send + Sync {
    async fn fetch(&self) -> Result<Vec<CartLine>, ApiError>;
    async fn add(&self, product_id: ProductId, quantity: u32) -> Result<AddedLine, ApiError>;
    async fn update_quantity(&self, product_id: ProductId, quantity: u32) -> Result<(), ApiError>;
    async fn remove(&self, product_id: ProductId) -> Result<(), ApiError>;
    async fn clear(&self) -> Result<(), ApiError>;
}

#[async_trait]
impl CartBackend for ApiClient {
    async fn fetch(&self) -> Result<Vec<CartLine>, ApiError> {
        Ok(self.cart().await?.items)
    }

    async fn add(&self, product_id: ProductId, quantity: u32) -> Result<AddedLine, ApiError> {
        Ok(self.add_to_cart(product_id, quantity).await?.into())
    }

    async fn update_quantity(&self, product_id: ProductId, quantity: u32) -> Result<(), ApiError> {
        self.update_cart_item(product_id, quantity).await?;
        Ok(())
    }

    async fn remove(&self, product_id: ProductId) -> Result<(), ApiError> {
        self.remove_from_cart(product_id).await
    }

    async fn clear(&self) -> Result<(), ApiError> {
        self.clear_cart().await
    }
}

/// Drives an [`OptimisticCart`] against a backend
///
/// Each call applies its mutation immediately, awaits the server and then
/// confirms or rolls back. Calls may run concurrently; the cart lock is never
/// held across an await.
pub struct CartSync<B> {
    backend: B,
    cart: Arc<Mutex<OptimisticCart>>,
}

impl<B: Clone> Clone for CartSync<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            cart: self.cart.clone(),
        }
    }
}

impl<B: CartBackend> CartSync<B> {
    pub fn new(backend: B, cart: OptimisticCart) -> Self {
        Self {
            backend,
            cart: Arc::new(Mutex::new(cart)),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs `f` with the current cart state
    pub fn with_cart<R>(&self, f: impl FnOnce(&mut OptimisticCart) -> R) -> R {
        f(&mut self.cart.lock())
    }

    pub fn lines(&self) -> Vec<CartLine> {
        self.cart.lock().lines().to_vec()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CartNotice> {
        self.cart.lock().subscribe()
    }

    /// Reloads the cart from the server
    pub async fn load(&self) -> Result<(), CartError> {
        if self.cart.lock().user().is_none() {
            return Err(CartError::NotAuthenticated);
        }
        let lines = self.backend.fetch().await?;
        self.cart.lock().load(lines);
        Ok(())
    }

    pub async fn add(&self, product_id: ProductId, quantity: u32) -> Result<(), CartError> {
        let ticket = self.cart.lock().begin_add(product_id, quantity)?;
        self.dispatch(ticket).await
    }

    pub async fn remove(&self, product_id: ProductId) -> Result<(), CartError> {
        let ticket = self.cart.lock().begin_remove(product_id)?;
        self.dispatch(ticket).await
    }

    pub async fn update_quantity(&self, product_id: ProductId, quantity: i64) -> Result<(), CartError> {
        let ticket = self.cart.lock().begin_update(product_id, quantity)?;
        self.dispatch(ticket).await
    }

    pub async fn clear(&self) -> Result<(), CartError> {
        let ticket = self.cart.lock().begin_clear()?;
        self.dispatch(ticket).await
    }

    async fn dispatch(&self, ticket: Ticket) -> Result<(), CartError> {
        let outcome = match ticket.dispatch {
            Dispatch::Add {
                product_id,
                quantity,
            } => self
                .backend
                .add(product_id, quantity)
                .await
                .map(Confirmation::Added),
            Dispatch::Update {
                product_id,
                quantity,
            } => self
                .backend
                .update_quantity(product_id, quantity)
                .await
                .map(|_| Confirmation::Done),
            Dispatch::Remove { product_id } => self
                .backend
                .remove(product_id)
                .await
                .map(|_| Confirmation::Done),
            Dispatch::Clear => self.backend.clear().await.map(|_| Confirmation::Done),
        };

        match outcome {
            Ok(confirmation) => self.cart.lock().confirm(&ticket.operation_id, confirmation),
            Err(e) => {
                self.cart
                    .lock()
                    .rollback(&ticket.operation_id, &e.to_string())?;
                Err(CartError::Rejected(e))
            }
        }
    }
}
