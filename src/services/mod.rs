//! Application services.
//!
//! Each service opens its own storage transaction per attempt, retries the
//! whole attempt when the store reports a conflict, and publishes the domain
//! events it collected only after the commit succeeded.

pub mod cart_merge;
pub mod checkout;
pub mod coupons;
pub mod inventory;
pub mod payment;
pub mod pricing;
pub mod sequencer;

use std::sync::Arc;

use crate::config::{CheckoutSettings, PaymentSettings};
use crate::domain::aggregates::Order;
use crate::domain::events::DomainEvent;
use crate::gateway::{PaymentGateway, SignatureVerifier};
use crate::publisher::EventPublisher;
use crate::store::{Store, StoreTx};
use crate::Result;

pub use cart_merge::{CartMergeService, MergeOutcome};
pub use checkout::{CheckoutReceipt, CheckoutService, CouponQuote, CreateOrderRequest};
pub use coupons::CouponEngine;
pub use inventory::InventoryLedger;
pub use payment::{ConfirmPayment, FailPayment, PaymentService};
pub use pricing::{price_order, OrderLine, PricedOrder, ShippingPolicy};
pub use sequencer::OrderSequencer;

/// Everything the HTTP layer and the background sweep need.
#[derive(Clone)]
pub struct Services {
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentService>,
    pub carts: Arc<CartMergeService>,
}

impl Services {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        publisher: Arc<dyn EventPublisher>,
        verifier: SignatureVerifier,
        checkout: CheckoutSettings,
        payments: PaymentSettings,
    ) -> Self {
        let retries = checkout.max_conflict_retries;
        let coupons = CouponEngine::new(checkout.enforce_per_user_coupon_limit);
        Self {
            payments: Arc::new(PaymentService::new(store.clone(), publisher.clone(), verifier, coupons, payments, retries)),
            carts: Arc::new(CartMergeService::new(store.clone(), publisher.clone(), retries)),
            checkout: Arc::new(CheckoutService::new(store, gateway, publisher, checkout)),
        }
    }
}

/// Gives an unpaid order's stock and coupon redemption back.
pub(crate) async fn release_holds(
    tx: &mut dyn StoreTx,
    order: &Order,
    ledger: &InventoryLedger,
    coupons: &CouponEngine,
) -> Result<Vec<DomainEvent>> {
    let events = ledger.release(tx, order.items()).await?;
    if let Some(applied) = order.coupon() {
        coupons.release(tx, applied.coupon_id, order.user_id()).await?;
    }
    tracing::info!(
        order_id = %order.id(),
        order_number = %order.order_number(),
        units = inventory::units(order.items()),
        coupon = order.coupon().map(|c| c.code.as_str()),
        "Released order holds"
    );
    Ok(events)
}
