//! In-memory store.
//!
//! A transaction holds the store's single mutex for its whole lifetime and
//! works on a private copy of the state, so transactions are fully serialized
//! and a dropped transaction leaves no trace. Used by the test-suite and when
//! the service runs without `DATABASE_URL`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult, StoreTx};
use crate::domain::aggregates::{Cart, CartOwner, Coupon, Order, Product};
use crate::domain::value_objects::OrderNumber;

#[derive(Clone, Debug, Default)]
struct MemoryState {
    products: BTreeMap<Uuid, Product>,
    coupons: HashMap<String, Coupon>,
    usages: HashMap<(Uuid, Uuid), u32>,
    sequences: HashMap<NaiveDate, u32>,
    orders: HashMap<Uuid, Order>,
    payment_events: HashSet<String>,
    carts: HashMap<Uuid, Cart>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    insert_conflicts: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn insert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn insert_coupon(&self, coupon: Coupon) {
        self.state.lock().await.coupons.insert(coupon.code.clone(), coupon);
    }

    pub async fn insert_cart(&self, cart: Cart) {
        self.state.lock().await.carts.insert(cart.id(), cart);
    }

    pub async fn product(&self, id: Uuid) -> Option<Product> {
        self.state.lock().await.products.get(&id).cloned()
    }

    pub async fn coupon(&self, code: &str) -> Option<Coupon> {
        self.state.lock().await.coupons.get(code).cloned()
    }

    pub async fn coupon_usage(&self, coupon_id: Uuid, user_id: Uuid) -> u32 {
        self.state.lock().await.usages.get(&(coupon_id, user_id)).copied().unwrap_or(0)
    }

    pub async fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.state.lock().await.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.created_at());
        orders
    }

    pub async fn cart_of(&self, owner: &CartOwner) -> Option<Cart> {
        self.state.lock().await.carts.values().find(|c| c.owner() == owner).cloned()
    }

    /// Makes the next `n` order inserts fail with a conflict.
    pub fn inject_insert_conflicts(&self, n: u32) {
        self.insert_conflicts.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTx { guard, working, insert_conflicts: self.insert_conflicts.clone() }))
    }

    async fn find_coupon(&self, code: &str) -> StoreResult<Option<Coupon>> {
        Ok(self.state.lock().await.coupons.get(code).filter(|c| c.is_active).cloned())
    }
}

/// Rows never carry pending domain events, the same as an order read back from Postgres.
fn stored(order: &Order) -> Order {
    let mut row = order.clone();
    row.take_events();
    row
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    insert_conflicts: Arc<AtomicU32>,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn products_for_update(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        Ok(self.working.products.values().filter(|p| wanted.contains(&p.id)).cloned().collect())
    }

    async fn save_variants(&mut self, product: &Product) -> StoreResult<()> {
        let row = self.working.products.get_mut(&product.id)
            .ok_or_else(|| StoreError::Backend(format!("product {} vanished", product.id)))?;
        row.variants = product.variants.clone();
        Ok(())
    }

    async fn coupon_for_update(&mut self, code: &str) -> StoreResult<Option<Coupon>> {
        Ok(self.working.coupons.get(code).filter(|c| c.is_active).cloned())
    }

    async fn coupon_usage(&mut self, coupon_id: Uuid, user_id: Uuid) -> StoreResult<u32> {
        Ok(self.working.usages.get(&(coupon_id, user_id)).copied().unwrap_or(0))
    }

    async fn adjust_coupon_usage(&mut self, coupon_id: Uuid, user_id: Uuid, delta: i32) -> StoreResult<()> {
        let coupon = self.working.coupons.values_mut().find(|c| c.id == coupon_id)
            .ok_or_else(|| StoreError::Backend(format!("coupon {coupon_id} vanished")))?;
        coupon.total_used = coupon.total_used.saturating_add_signed(delta);
        let usage = self.working.usages.entry((coupon_id, user_id)).or_insert(0);
        *usage = usage.saturating_add_signed(delta);
        Ok(())
    }

    async fn next_order_sequence(&mut self, day: NaiveDate) -> StoreResult<u32> {
        let prefix = OrderNumber::day_prefix(day);
        let used = self.working.orders.values()
            .filter(|o| o.order_number().as_str().starts_with(&prefix))
            .filter_map(|o| o.order_number().sequence())
            .max()
            .unwrap_or(0);
        let last = self.working.sequences.get(&day).copied().unwrap_or(0);
        let next = last.max(used) + 1;
        self.working.sequences.insert(day, next);
        Ok(next)
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        let pending = self.insert_conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.insert_conflicts.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Conflict("injected order insert conflict".into()));
        }
        if self.working.orders.values().any(|o| o.order_number() == order.order_number()) {
            return Err(StoreError::Conflict(format!("order number {} taken", order.order_number())));
        }
        self.working.orders.insert(order.id(), stored(order));
        Ok(())
    }

    async fn order_for_update(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn order_by_gateway_id_for_update(&mut self, gateway_order_id: &str) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.values().find(|o| o.gateway_order_id() == Some(gateway_order_id)).cloned())
    }

    async fn update_order_payment(&mut self, order: &Order) -> StoreResult<()> {
        match self.working.orders.get_mut(&order.id()) {
            Some(row) => { *row = stored(order); Ok(()) }
            None => Err(StoreError::Backend(format!("order {} vanished", order.id()))),
        }
    }

    async fn delete_pending_order(&mut self, id: Uuid) -> StoreResult<bool> {
        if self.working.orders.get(&id).is_some_and(Order::is_pending) {
            self.working.orders.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn stale_pending_orders(&mut self, cutoff: DateTime<Utc>, limit: u32) -> StoreResult<Vec<Order>> {
        let mut stale: Vec<Order> = self.working.orders.values()
            .filter(|o| o.is_pending() && o.created_at() < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|o| o.created_at());
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn claim_payment_event(&mut self, event_id: &str, _order_id: Uuid, _kind: &str) -> StoreResult<bool> {
        Ok(self.working.payment_events.insert(event_id.to_string()))
    }

    async fn session_cart_for_update(&mut self, token: &str) -> StoreResult<Option<Cart>> {
        Ok(self.working.carts.values().find(|c| matches!(c.owner(), CartOwner::Session(t) if t == token)).cloned())
    }

    async fn user_cart_for_update(&mut self, user_id: Uuid) -> StoreResult<Option<Cart>> {
        Ok(self.working.carts.values().find(|c| c.owner() == &CartOwner::User(user_id)).cloned())
    }

    async fn save_cart(&mut self, cart: &Cart) -> StoreResult<()> {
        self.working.carts.insert(cart.id(), cart.clone());
        Ok(())
    }

    async fn delete_cart(&mut self, id: Uuid) -> StoreResult<()> {
        self.working.carts.remove(&id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }
}
