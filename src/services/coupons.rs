//! Coupon engine.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::aggregates::Coupon;
use crate::domain::value_objects::Money;
use crate::store::{Store, StoreTx};
use crate::{EngineError, Result};

/// Codes are matched case-insensitively; stored codes are upper case.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CouponEngine {
    enforce_per_user_limit: bool,
}

impl CouponEngine {
    pub fn new(enforce_per_user_limit: bool) -> Self {
        Self { enforce_per_user_limit }
    }

    /// Locks the active coupon for `code` inside the order transaction.
    pub async fn lock(&self, tx: &mut dyn StoreTx, code: &str) -> Result<Coupon> {
        let code = normalize_code(code);
        tx.coupon_for_update(&code).await?.ok_or(EngineError::InvalidCoupon(code))
    }

    /// Eligibility and discount for `subtotal` at `now`. Never exceeds the subtotal.
    pub fn validate(&self, coupon: &Coupon, subtotal: Money, now: DateTime<Utc>) -> Result<Money> {
        coupon.evaluate(subtotal, now).map_err(|e| EngineError::from_coupon(&coupon.code, e))
    }

    /// Per-user cap. A no-op unless enforcement is switched on.
    pub async fn check_user_limit(&self, tx: &mut dyn StoreTx, coupon: &Coupon, user_id: Uuid) -> Result<()> {
        if !self.enforce_per_user_limit || coupon.per_user_limit.is_none() {
            return Ok(());
        }
        let used = tx.coupon_usage(coupon.id, user_id).await?;
        if coupon.per_user_exhausted(used) {
            tracing::info!(coupon = %coupon.code, user_id = %user_id, used, "Per-user coupon limit reached");
            return Err(EngineError::PerUserLimitReached);
        }
        Ok(())
    }

    /// Counts one redemption against the coupon and the user's usage row.
    pub async fn apply(&self, tx: &mut dyn StoreTx, coupon_id: Uuid, user_id: Uuid) -> Result<()> {
        tx.adjust_coupon_usage(coupon_id, user_id, 1).await?;
        Ok(())
    }

    /// Gives back one redemption, for orders that will never be paid.
    pub async fn release(&self, tx: &mut dyn StoreTx, coupon_id: Uuid, user_id: Uuid) -> Result<()> {
        tx.adjust_coupon_usage(coupon_id, user_id, -1).await?;
        Ok(())
    }

    /// Side-effect free check used before checkout.
    pub async fn preview(&self, store: &dyn Store, code: &str, subtotal: Money, now: DateTime<Utc>) -> Result<(Coupon, Money)> {
        let code = normalize_code(code);
        let coupon = store.find_coupon(&code).await?.ok_or(EngineError::InvalidCoupon(code))?;
        let discount = self.validate(&coupon, subtotal, now)?;
        Ok((coupon, discount))
    }
}
