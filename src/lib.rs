//! Storefront Order & Payment Engine
//!
//! Turns a shopping cart into a priced, inventory-checked, coupon-adjusted
//! order, drives it through a hosted payment gateway and keeps stock and
//! coupon counters correct under concurrent checkouts.
//!
//! ## Components
//! - Pricing & validation against live variant data
//! - Coupon engine
//! - Day-scoped order sequencer
//! - Inventory ledger
//! - Payment state machine (confirm, fail, abandon, stale sweep)
//! - Guest cart merge at login

pub mod api;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod publisher;
pub mod services;
pub mod store;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{CouponError, OrderError};
use crate::domain::value_objects::{Money, VariantWeight};
use crate::gateway::GatewayError;
use crate::store::StoreError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("Products not found: {}", join_ids(.0))]
    ProductsNotFound(Vec<Uuid>),

    #[error("Variant {weight} not found for product {product_id}")]
    VariantNotFound { product_id: Uuid, weight: VariantWeight },

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("No order for gateway order {0}")]
    UnknownGatewayOrder(String),

    #[error("Insufficient stock for {product} ({weight})")]
    InsufficientStock { product: String, weight: VariantWeight },

    #[error("Invalid coupon code: {0}")]
    InvalidCoupon(String),

    #[error("Coupon has expired")]
    CouponExpired,

    #[error("Minimum order value for this coupon is {0}")]
    BelowMinimumOrder(Money),

    #[error("Coupon usage limit reached")]
    UsageLimitReached,

    #[error("You have already used this coupon the maximum number of times")]
    PerUserLimitReached,

    #[error("Order total must be positive")]
    InvalidTotal,

    #[error("{0}")]
    InvalidTransition(String),

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Payment signature verification failed")]
    SignatureInvalid,

    #[error("Service temporarily unavailable: {0}")]
    Transient(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    NotFoundError,
    BusinessRuleViolation,
    ConflictError,
    SignatureInvalid,
    TransientError,
    InternalError,
    /// Raised at the HTTP boundary when no identity accompanies the request.
    Unauthenticated,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::ProductsNotFound(_)
            | Self::VariantNotFound { .. }
            | Self::OrderNotFound(_)
            | Self::UnknownGatewayOrder(_) => ErrorKind::NotFoundError,
            Self::InsufficientStock { .. }
            | Self::InvalidCoupon(_)
            | Self::CouponExpired
            | Self::BelowMinimumOrder(_)
            | Self::UsageLimitReached
            | Self::PerUserLimitReached
            | Self::InvalidTotal
            | Self::InvalidTransition(_) => ErrorKind::BusinessRuleViolation,
            Self::Conflict(_) => ErrorKind::ConflictError,
            Self::SignatureInvalid => ErrorKind::SignatureInvalid,
            Self::Transient(_) => ErrorKind::TransientError,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Message safe to show to the buyer. Internal details never leave the service.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "Something went wrong, please try again".to_string(),
            Self::Conflict(_) => "The store is busy, please try again".to_string(),
            Self::Transient(_) => "Payment service is temporarily unavailable, please try again".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ConflictError | ErrorKind::TransientError)
    }
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", ")
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<GatewayError> for EngineError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unavailable(msg) => EngineError::Transient(msg),
            GatewayError::Rejected(msg) | GatewayError::Malformed(msg) => EngineError::Internal(msg),
        }
    }
}

impl From<OrderError> for EngineError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::InvalidTotal => EngineError::InvalidTotal,
            OrderError::NoItems => EngineError::Validation("Order must contain at least one item".into()),
            OrderError::InvalidTransition(_) => EngineError::InvalidTransition(e.to_string()),
        }
    }
}

impl EngineError {
    pub(crate) fn from_coupon(code: &str, e: CouponError) -> Self {
        match e {
            CouponError::Inactive => EngineError::InvalidCoupon(code.to_string()),
            CouponError::Expired => EngineError::CouponExpired,
            CouponError::BelowMinimumOrder(min) => EngineError::BelowMinimumOrder(min),
            CouponError::UsageLimitReached => EngineError::UsageLimitReached,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_products_listed_in_one_message() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let msg = EngineError::ProductsNotFound(vec![a, b]).to_string();
        assert!(msg.contains(&a.to_string()) && msg.contains(&b.to_string()));
    }

    #[test]
    fn test_internal_details_hidden() {
        let e = EngineError::from(StoreError::Backend("password authentication failed for user app".into()));
        assert_eq!(e.kind(), ErrorKind::InternalError);
        assert!(!e.public_message().contains("password"));
    }

    #[test]
    fn test_store_conflict_is_retryable() {
        assert!(EngineError::from(StoreError::Conflict("dup".into())).is_retryable());
        assert!(!EngineError::SignatureInvalid.is_retryable());
    }
}
