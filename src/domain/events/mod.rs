//! Domain events
use crate::domain::value_objects::{Money, OrderNumber, VariantWeight};
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "aggregate", content = "event")]
pub enum DomainEvent {
    Order(OrderEvent),
    Inventory(InventoryEvent),
    Cart(CartEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OrderEvent {
    Created { order_id: Uuid, order_number: OrderNumber, total: Money },
    PaymentConfirmed { order_id: Uuid, payment_id: String },
    PaymentFailed { order_id: Uuid },
    Abandoned { order_id: Uuid },
    Expired { order_id: Uuid },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InventoryEvent {
    StockDecremented { product_id: Uuid, weight: VariantWeight, quantity: u32, remaining: u32 },
    StockReleased { product_id: Uuid, weight: VariantWeight, quantity: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CartEvent {
    Merged { user_id: Uuid, merged_lines: usize },
}

impl DomainEvent {
    /// Subject suffix used when publishing, e.g. `order.payment_confirmed`.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Created { .. }) => "order.created",
            Self::Order(OrderEvent::PaymentConfirmed { .. }) => "order.payment_confirmed",
            Self::Order(OrderEvent::PaymentFailed { .. }) => "order.payment_failed",
            Self::Order(OrderEvent::Abandoned { .. }) => "order.abandoned",
            Self::Order(OrderEvent::Expired { .. }) => "order.expired",
            Self::Inventory(InventoryEvent::StockDecremented { .. }) => "inventory.decremented",
            Self::Inventory(InventoryEvent::StockReleased { .. }) => "inventory.released",
            Self::Cart(CartEvent::Merged { .. }) => "cart.merged",
        }
    }
}
