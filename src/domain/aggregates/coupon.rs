//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CouponKind { Percentage, Flat }

impl CouponKind {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Percentage => "PERCENTAGE", Self::Flat => "FLAT" }
    }
    pub fn parse(s: &str) -> Option<Self> {
        match s { "PERCENTAGE" => Some(Self::Percentage), "FLAT" => Some(Self::Flat), _ => None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub kind: CouponKind,
    pub value: Decimal,
    pub min_order_value: Option<Money>,
    pub max_discount: Option<Money>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub global_usage_limit: Option<u32>,
    pub total_used: u32,
    pub per_user_limit: Option<u32>,
}

impl Coupon {
    /// Checks eligibility against `subtotal` at `now` and returns the discount.
    ///
    /// The discount is capped at `max_discount` for percentage coupons and is
    /// never larger than the subtotal.
    pub fn evaluate(&self, subtotal: Money, now: DateTime<Utc>) -> Result<Money, CouponError> {
        if !self.is_active { return Err(CouponError::Inactive); }
        if matches!(self.expires_at, Some(at) if at < now) { return Err(CouponError::Expired); }
        if let Some(min) = self.min_order_value {
            if subtotal < min { return Err(CouponError::BelowMinimumOrder(min)); }
        }
        if let Some(limit) = self.global_usage_limit {
            if self.total_used >= limit { return Err(CouponError::UsageLimitReached); }
        }
        let raw = match self.kind {
            CouponKind::Percentage => {
                let pct = Money::new(subtotal.amount() * self.value / Decimal::ONE_HUNDRED);
                match self.max_discount { Some(cap) => pct.min(cap), None => pct }
            }
            CouponKind::Flat => Money::new(self.value),
        };
        Ok(raw.min(subtotal).max(Money::ZERO))
    }

    pub fn per_user_exhausted(&self, used_count: u32) -> bool {
        matches!(self.per_user_limit, Some(limit) if used_count >= limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponError { Inactive, Expired, BelowMinimumOrder(Money), UsageLimitReached }
impl std::error::Error for CouponError {}
impl std::fmt::Display for CouponError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "Coupon is not active"),
            Self::Expired => write!(f, "Coupon has expired"),
            Self::BelowMinimumOrder(min) => write!(f, "Minimum order value is {}", min),
            Self::UsageLimitReached => write!(f, "Coupon usage limit reached"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon(kind: CouponKind, value: i64) -> Coupon {
        Coupon {
            id: Uuid::new_v4(), code: "SAVE".into(), kind, value: Decimal::from(value),
            min_order_value: None, max_discount: None, is_active: true, expires_at: None,
            global_usage_limit: None, total_used: 0, per_user_limit: None,
        }
    }

    #[test]
    fn test_percentage_capped_by_max_discount() {
        let mut c = coupon(CouponKind::Percentage, 10);
        c.max_discount = Some(Money::from_major(80));
        assert_eq!(c.evaluate(Money::from_major(1000), Utc::now()).unwrap(), Money::from_major(80));
        c.max_discount = None;
        assert_eq!(c.evaluate(Money::from_major(1000), Utc::now()).unwrap(), Money::from_major(100));
    }

    #[test]
    fn test_flat_clamped_to_subtotal() {
        let c = coupon(CouponKind::Flat, 50);
        assert_eq!(c.evaluate(Money::from_major(30), Utc::now()).unwrap(), Money::from_major(30));
    }

    #[test]
    fn test_eligibility_checks_in_order() {
        let now = Utc::now();
        let mut c = coupon(CouponKind::Flat, 50);
        c.expires_at = Some(now - Duration::hours(1));
        c.min_order_value = Some(Money::from_major(500));
        assert_eq!(c.evaluate(Money::from_major(100), now).unwrap_err(), CouponError::Expired);
        c.expires_at = Some(now + Duration::hours(1));
        assert_eq!(c.evaluate(Money::from_major(100), now).unwrap_err(), CouponError::BelowMinimumOrder(Money::from_major(500)));
        c.global_usage_limit = Some(3);
        c.total_used = 3;
        assert_eq!(c.evaluate(Money::from_major(600), now).unwrap_err(), CouponError::UsageLimitReached);
    }

    #[test]
    fn test_per_user_limit() {
        let mut c = coupon(CouponKind::Flat, 5);
        assert!(!c.per_user_exhausted(10));
        c.per_user_limit = Some(2);
        assert!(c.per_user_exhausted(2));
        assert!(!c.per_user_exhausted(1));
    }
}
