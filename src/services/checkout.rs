//! Checkout: turns a validated request into a PENDING order with stock and
//! coupon usage committed, then opens the gateway-side order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::coupons::CouponEngine;
use super::inventory::InventoryLedger;
use super::pricing::{price_order, OrderLine, ShippingPolicy};
use super::sequencer::OrderSequencer;
use super::release_holds;
use crate::config::CheckoutSettings;
use crate::domain::aggregates::{Address, AppliedCoupon, NewOrder, Order, PaymentStatus, Totals};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{Money, OrderNumber};
use crate::gateway::PaymentGateway;
use crate::publisher::EventPublisher;
use crate::store::Store;
use crate::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderLine>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub order_number: OrderNumber,
    pub subtotal: Money,
    pub discount: Money,
    pub shipping_fee: Money,
    pub total: Money,
    pub payment_status: PaymentStatus,
    pub currency: String,
    pub gateway_order_id: String,
    pub public_key: String,
    pub amount_minor: i64,
}

/// Preview of a coupon against a subtotal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponQuote {
    pub code: String,
    pub discount: Money,
}

pub struct CheckoutService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: Arc<dyn EventPublisher>,
    settings: CheckoutSettings,
    sequencer: OrderSequencer,
    coupons: CouponEngine,
    ledger: InventoryLedger,
    shipping: ShippingPolicy,
}

impl CheckoutService {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, publisher: Arc<dyn EventPublisher>, settings: CheckoutSettings) -> Self {
        Self {
            sequencer: OrderSequencer::new(settings.utc_offset),
            coupons: CouponEngine::new(settings.enforce_per_user_coupon_limit),
            ledger: InventoryLedger,
            shipping: ShippingPolicy { flat_fee: settings.shipping_fee, free_threshold: settings.free_shipping_threshold },
            store,
            gateway,
            publisher,
            settings,
        }
    }

    /// Creates the order and its gateway counterpart.
    ///
    /// Order row, items, stock decrements and coupon usage commit together.
    /// If the gateway cannot be reached afterwards the order is abandoned again
    /// so nothing stays held for a payment that can never start.
    pub async fn create_order(&self, user_id: Uuid, request: CreateOrderRequest) -> Result<CheckoutReceipt> {
        let mut attempt = 0;
        let order = loop {
            match self.place(user_id, &request, Utc::now()).await {
                Err(EngineError::Conflict(reason)) if attempt < self.settings.max_conflict_retries => {
                    attempt += 1;
                    tracing::warn!(user_id = %user_id, attempt, reason = %reason, "Checkout conflicted, retrying");
                }
                other => break other?,
            }
        };
        tracing::info!(
            order_id = %order.id(),
            order_number = %order.order_number(),
            total = %order.total(),
            items = order.items().len(),
            "Order created"
        );

        let receipt = order.order_number().as_str();
        let gateway_order = match self.gateway.initiate(order.total(), &self.settings.currency, receipt).await {
            Ok(g) => g,
            Err(e) => {
                tracing::error!(order_id = %order.id(), error = %e, "Gateway order creation failed, abandoning order");
                if let Err(undo) = self.discard(order.id(), None).await {
                    tracing::error!(order_id = %order.id(), error = %undo, "Compensating abandon failed; sweep will reclaim the order");
                }
                return Err(e.into());
            }
        };

        let mut tx = self.store.begin().await?;
        let mut locked = tx.order_for_update(order.id()).await?.ok_or(EngineError::OrderNotFound(order.id()))?;
        locked.attach_gateway_order(gateway_order.gateway_order_id.clone())?;
        tx.update_order_payment(&locked).await?;
        tx.commit().await?;

        let totals = locked.totals();
        Ok(CheckoutReceipt {
            order_id: locked.id(),
            order_number: locked.order_number().clone(),
            subtotal: totals.subtotal,
            discount: totals.discount,
            shipping_fee: totals.shipping_fee,
            total: totals.total,
            payment_status: locked.payment_status(),
            currency: gateway_order.currency,
            gateway_order_id: gateway_order.gateway_order_id,
            public_key: gateway_order.public_key,
            amount_minor: gateway_order.amount_minor,
        })
    }

    async fn place(&self, user_id: Uuid, request: &CreateOrderRequest, now: DateTime<Utc>) -> Result<Order> {
        let mut ids: Vec<Uuid> = request.items.iter().map(|l| l.product_id).collect();
        ids.sort();
        ids.dedup();

        let mut tx = self.store.begin().await?;
        let mut products = tx.products_for_update(&ids).await?;
        let priced = price_order(&request.items, &products)?;

        let coupon = match request.coupon_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let coupon = self.coupons.lock(tx.as_mut(), code).await?;
                let discount = self.coupons.validate(&coupon, priced.subtotal, now)?;
                self.coupons.check_user_limit(tx.as_mut(), &coupon, user_id).await?;
                Some((coupon, discount))
            }
            None => None,
        };
        let discount = coupon.as_ref().map_or(Money::ZERO, |(_, d)| *d);
        let totals = Totals::compute(priced.subtotal, discount, self.shipping.fee_for(priced.subtotal))?;

        let order_number = self.sequencer.next(tx.as_mut(), now).await?;
        let mut order = Order::place(NewOrder {
            order_number,
            user_id,
            items: priced.items,
            totals,
            coupon: coupon.as_ref().map(|(c, _)| AppliedCoupon { coupon_id: c.id, code: c.code.clone() }),
            shipping_address: request.shipping_address.clone(),
            billing_address: request.billing_address.clone(),
        })?;
        tx.insert_order(&order).await?;

        let mut events = order.take_events();
        events.extend(self.ledger.decrement(tx.as_mut(), &mut products, &request.items).await?);
        if let Some((c, _)) = &coupon {
            self.coupons.apply(tx.as_mut(), c.id, user_id).await?;
        }
        tx.commit().await?;

        self.publisher.publish_all(&events).await;
        Ok(order)
    }

    /// Deletes a PENDING order the buyer never attempted to pay.
    pub async fn abandon_order(&self, user_id: Uuid, order_id: Uuid, payment_attempted: bool) -> Result<()> {
        if payment_attempted {
            return Err(EngineError::Validation("Order cannot be cancelled after a payment attempt".into()));
        }
        self.discard(order_id, Some(user_id)).await?;
        tracing::info!(order_id = %order_id, user_id = %user_id, "Order abandoned");
        Ok(())
    }

    async fn discard(&self, order_id: Uuid, owner: Option<Uuid>) -> Result<()> {
        let mut attempt = 0;
        let events = loop {
            match self.try_discard(order_id, owner).await {
                Err(EngineError::Conflict(reason)) if attempt < self.settings.max_conflict_retries => {
                    attempt += 1;
                    tracing::warn!(order_id = %order_id, attempt, reason = %reason, "Abandon conflicted, retrying");
                }
                other => break other?,
            }
        };
        self.publisher.publish_all(&events).await;
        Ok(())
    }

    async fn try_discard(&self, order_id: Uuid, owner: Option<Uuid>) -> Result<Vec<DomainEvent>> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .order_for_update(order_id)
            .await?
            .filter(|o| owner.map_or(true, |u| o.user_id() == u))
            .ok_or(EngineError::OrderNotFound(order_id))?;

        order.abandon()?;
        if !tx.delete_pending_order(order_id).await? {
            return Err(EngineError::InvalidTransition(format!("Order {} is no longer pending", order.order_number())));
        }
        let mut events = order.take_events();
        events.extend(release_holds(tx.as_mut(), &order, &self.ledger, &self.coupons).await?);
        tx.commit().await?;
        Ok(events)
    }

    /// Side-effect free coupon check for the cart page.
    pub async fn preview_coupon(&self, code: &str, subtotal: Money) -> Result<CouponQuote> {
        let (coupon, discount) = self.coupons.preview(self.store.as_ref(), code, subtotal, Utc::now()).await?;
        Ok(CouponQuote { code: coupon.code, discount })
    }
}
