//! Order Aggregate
//!
//! An order is created once at checkout with `payment_status = PENDING` and
//! leaves that state exactly once: confirmed, failed, expired, or deleted when
//! the buyer abandons before any payment attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::domain::value_objects::{Money, OrderNumber, Quantity, VariantWeight};
use crate::domain::events::{DomainEvent, OrderEvent};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: Uuid,
    order_number: OrderNumber,
    user_id: Uuid,
    status: OrderStatus,
    payment_status: PaymentStatus,
    items: Vec<OrderItem>,
    #[serde(flatten)]
    totals: Totals,
    coupon: Option<AppliedCoupon>,
    shipping_address: Address,
    billing_address: Option<Address>,
    gateway_order_id: Option<String>,
    payment_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

/// Immutable price/name snapshot taken when the order was placed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub variant_details: VariantDetails,
    pub quantity: Quantity,
    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantDetails { pub weight: VariantWeight, pub price: Money }

impl OrderItem {
    pub fn line_total(&self) -> Money { self.variant_details.price.multiply(self.quantity.value()) }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCoupon { pub coupon_id: Uuid, pub code: String }

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 1, max = 200))]
    pub street1: String,
    pub street2: Option<String>,
    #[validate(length(min = 1, max = 80))]
    pub city: String,
    pub state: Option<String>,
    #[validate(length(min = 3, max = 12))]
    pub zip: String,
    #[validate(length(min = 2, max = 56))]
    pub country: String,
    pub phone: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { #[default] Pending, Processing, Shipped, Delivered, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus { #[default] Pending, Success, Failed }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING", Self::Processing => "PROCESSING", Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED", Self::Cancelled => "CANCELLED",
        }
    }
    pub fn parse(s: &str) -> Option<Self> {
        [Self::Pending, Self::Processing, Self::Shipped, Self::Delivered, Self::Cancelled].into_iter().find(|v| v.as_str() == s)
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "PENDING", Self::Success => "SUCCESS", Self::Failed => "FAILED" }
    }
    pub fn parse(s: &str) -> Option<Self> {
        [Self::Pending, Self::Success, Self::Failed].into_iter().find(|v| v.as_str() == s)
    }
}

/// Monetary summary of an order. `total == round(subtotal - discount + shipping_fee, 2)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal: Money,
    pub discount: Money,
    pub tax_amount: Money,
    pub shipping_fee: Money,
    pub total: Money,
}

impl Totals {
    pub fn compute(subtotal: Money, discount: Money, shipping_fee: Money) -> Result<Self, OrderError> {
        let totals = Self { subtotal, discount, tax_amount: Money::ZERO, shipping_fee, total: subtotal - discount + shipping_fee };
        totals.check()?;
        Ok(totals)
    }

    pub fn check(&self) -> Result<(), OrderError> {
        if self.discount > self.subtotal || self.discount < Money::ZERO { return Err(OrderError::InvalidTotal); }
        let expected = self.subtotal - self.discount + self.shipping_fee + self.tax_amount;
        if self.total != expected || !self.total.is_positive() { return Err(OrderError::InvalidTotal); }
        Ok(())
    }
}

/// Everything needed to place a new order.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub order_number: OrderNumber,
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub totals: Totals,
    pub coupon: Option<AppliedCoupon>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
}

/// Persisted header of an order, used when loading it back from storage.
#[derive(Clone, Debug)]
pub struct OrderRecord {
    pub id: Uuid,
    pub order_number: OrderNumber,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub totals: Totals,
    pub coupon: Option<AppliedCoupon>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub gateway_order_id: Option<String>,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a payment event applied to the order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition { Applied, Unchanged }

impl Order {
    pub fn place(new: NewOrder) -> Result<Self, OrderError> {
        if new.items.is_empty() { return Err(OrderError::NoItems); }
        new.totals.check()?;
        let subtotal: Money = new.items.iter().map(OrderItem::line_total).sum();
        if subtotal != new.totals.subtotal { return Err(OrderError::InvalidTotal); }
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut order = Self {
            id, order_number: new.order_number, user_id: new.user_id,
            status: OrderStatus::Pending, payment_status: PaymentStatus::Pending,
            items: new.items, totals: new.totals, coupon: new.coupon,
            shipping_address: new.shipping_address, billing_address: new.billing_address,
            gateway_order_id: None, payment_id: None, created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Created {
            order_id: id, order_number: order.order_number.clone(), total: order.totals.total,
        }));
        Ok(order)
    }

    pub fn restore(record: OrderRecord, items: Vec<OrderItem>) -> Self {
        Self {
            id: record.id, order_number: record.order_number, user_id: record.user_id,
            status: record.status, payment_status: record.payment_status, items, totals: record.totals,
            coupon: record.coupon, shipping_address: record.shipping_address, billing_address: record.billing_address,
            gateway_order_id: record.gateway_order_id, payment_id: record.payment_id,
            created_at: record.created_at, updated_at: record.updated_at, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &OrderNumber { &self.order_number }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn totals(&self) -> &Totals { &self.totals }
    pub fn total(&self) -> Money { self.totals.total }
    pub fn coupon(&self) -> Option<&AppliedCoupon> { self.coupon.as_ref() }
    pub fn shipping_address(&self) -> &Address { &self.shipping_address }
    pub fn billing_address(&self) -> Option<&Address> { self.billing_address.as_ref() }
    pub fn gateway_order_id(&self) -> Option<&str> { self.gateway_order_id.as_deref() }
    pub fn payment_id(&self) -> Option<&str> { self.payment_id.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn is_pending(&self) -> bool { self.payment_status == PaymentStatus::Pending && self.status == OrderStatus::Pending }

    pub fn attach_gateway_order(&mut self, gateway_order_id: impl Into<String>) -> Result<(), OrderError> {
        if !self.is_pending() { return Err(OrderError::InvalidTransition(self.payment_status)); }
        self.gateway_order_id = Some(gateway_order_id.into());
        self.touch();
        Ok(())
    }

    /// INITIATED -> CONFIRMED. Confirming an already confirmed order is a no-op.
    pub fn confirm_payment(&mut self, payment_id: impl Into<String>) -> Result<Transition, OrderError> {
        match self.payment_status {
            PaymentStatus::Success => Ok(Transition::Unchanged),
            PaymentStatus::Failed => Err(OrderError::InvalidTransition(PaymentStatus::Failed)),
            PaymentStatus::Pending => {
                let payment_id = payment_id.into();
                self.payment_status = PaymentStatus::Success;
                self.status = OrderStatus::Processing;
                self.payment_id = Some(payment_id.clone());
                self.touch();
                self.raise_event(DomainEvent::Order(OrderEvent::PaymentConfirmed { order_id: self.id, payment_id }));
                Ok(Transition::Applied)
            }
        }
    }

    /// INITIATED -> FAILED. The order is kept for audit. A failure reported
    /// after a confirmation does not undo the confirmation.
    pub fn fail_payment(&mut self) -> Transition {
        if self.payment_status != PaymentStatus::Pending { return Transition::Unchanged; }
        self.payment_status = PaymentStatus::Failed;
        self.status = OrderStatus::Cancelled;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::PaymentFailed { order_id: self.id }));
        Transition::Applied
    }

    /// Stale PENDING order reaped by the sweep.
    pub fn expire(&mut self) -> Transition {
        if self.payment_status != PaymentStatus::Pending { return Transition::Unchanged; }
        self.payment_status = PaymentStatus::Failed;
        self.status = OrderStatus::Cancelled;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Expired { order_id: self.id }));
        Transition::Applied
    }

    /// INITIATED -> ABANDONED precondition. The row is deleted by the caller.
    pub fn abandon(&mut self) -> Result<(), OrderError> {
        if !self.is_pending() { return Err(OrderError::InvalidTransition(self.payment_status)); }
        self.raise_event(DomainEvent::Order(OrderEvent::Abandoned { order_id: self.id }));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { NoItems, InvalidTotal, InvalidTransition(PaymentStatus) }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoItems => write!(f, "No items"),
            Self::InvalidTotal => write!(f, "Order total must be positive and match its components"),
            Self::InvalidTransition(from) => write!(f, "Order payment is already {}", from.as_str()),
        }
    }
}
