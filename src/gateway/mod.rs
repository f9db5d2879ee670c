//! Payment gateway integration.
//!
//! The engine only needs two things from the gateway: creating a gateway-side
//! order for an amount, and proving that a confirmation callback really came
//! from the gateway (HMAC-SHA256 over `gatewayOrderId|paymentId`).

pub mod http;
pub mod signature;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::value_objects::Money;

pub use http::HttpGateway;
pub use signature::SignatureVerifier;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network failure, timeout, 5xx or rate limiting. Safe to retry later.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway rejected request: {0}")]
    Rejected(String),

    #[error("unexpected gateway response: {0}")]
    Malformed(String),
}

/// Gateway-side order the buyer's checkout widget pays against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayOrder {
    pub gateway_order_id: String,
    pub public_key: String,
    pub amount_minor: i64,
    pub currency: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    async fn initiate(&self, amount: Money, currency: &str, receipt: &str) -> Result<GatewayOrder, GatewayError>;
}
