//! Storage seam for the order engine.
//!
//! All mutations happen through a [`StoreTx`]: a single storage transaction
//! that commits or rolls back as a unit. Methods named `*_for_update` take a
//! row lock that is held until the transaction ends, so read-modify-write
//! sequences on products, coupons, orders and carts are serialized per row.
//! Dropping a transaction without calling [`StoreTx::commit`] rolls it back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, Coupon, Order, Product};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Lost a race against a concurrent writer; the whole transaction may be retried.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("backend: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// Lock-free read used for previews (coupon validation endpoint).
    async fn find_coupon(&self, code: &str) -> StoreResult<Option<Coupon>>;
}

#[async_trait]
pub trait StoreTx: Send {
    // ---- catalog --------------------------------------------------------

    /// Locks and returns the products that exist among `ids`, in ascending id order.
    async fn products_for_update(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Product>>;

    /// Writes back the full variant list of a locked product.
    async fn save_variants(&mut self, product: &Product) -> StoreResult<()>;

    // ---- coupons --------------------------------------------------------

    async fn coupon_for_update(&mut self, code: &str) -> StoreResult<Option<Coupon>>;

    async fn coupon_usage(&mut self, coupon_id: Uuid, user_id: Uuid) -> StoreResult<u32>;

    /// Adds `delta` to `Coupon.total_used` and to the `(coupon, user)` usage row,
    /// creating the usage row with `used_count = 1` when absent. Negative deltas
    /// floor at zero.
    async fn adjust_coupon_usage(&mut self, coupon_id: Uuid, user_id: Uuid, delta: i32) -> StoreResult<()>;

    // ---- sequencing -----------------------------------------------------

    /// Atomically advances and returns the order counter for `day`. The result
    /// is always above the highest sequence already used by an order of that day.
    async fn next_order_sequence(&mut self, day: NaiveDate) -> StoreResult<u32>;

    // ---- orders ---------------------------------------------------------

    /// Inserts the order and its items. A duplicate order number is a `Conflict`.
    async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;

    async fn order_for_update(&mut self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn order_by_gateway_id_for_update(&mut self, gateway_order_id: &str) -> StoreResult<Option<Order>>;

    /// Persists status, payment status and gateway references of an existing order.
    async fn update_order_payment(&mut self, order: &Order) -> StoreResult<()>;

    /// Deletes the order only if it is still PENDING. Returns whether a row was deleted.
    async fn delete_pending_order(&mut self, id: Uuid) -> StoreResult<bool>;

    /// Locks up to `limit` PENDING orders created before `cutoff`, skipping rows
    /// already locked by other transactions.
    async fn stale_pending_orders(&mut self, cutoff: DateTime<Utc>, limit: u32) -> StoreResult<Vec<Order>>;

    /// Records a gateway event id. Returns `false` if it was already recorded.
    async fn claim_payment_event(&mut self, event_id: &str, order_id: Uuid, kind: &str) -> StoreResult<bool>;

    // ---- carts ----------------------------------------------------------

    async fn session_cart_for_update(&mut self, token: &str) -> StoreResult<Option<Cart>>;

    async fn user_cart_for_update(&mut self, user_id: Uuid) -> StoreResult<Option<Cart>>;

    /// Upserts the cart row and replaces its items.
    async fn save_cart(&mut self, cart: &Cart) -> StoreResult<()>;

    async fn delete_cart(&mut self, id: Uuid) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
