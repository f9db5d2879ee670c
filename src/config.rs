//! Service configuration, read from the environment (and `.env` via dotenvy).

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use rust_decimal::Decimal;

use crate::domain::value_objects::Money;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub gateway: GatewayConfig,
    pub checkout: CheckoutSettings,
    pub payments: PaymentSettings,
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub api_base: String,
    pub key_id: String,
    pub key_secret: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_base", &self.api_base)
            .field("key_id", &self.key_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Knobs of order creation.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub shipping_fee: Money,
    pub free_shipping_threshold: Money,
    /// Offset of the store's local day, used for order numbering.
    pub utc_offset: FixedOffset,
    pub max_conflict_retries: u32,
    /// Off by default: per-user coupon caps exist in the data model but were never enforced.
    pub enforce_per_user_coupon_limit: bool,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            currency: "INR".into(),
            shipping_fee: Money::from_major(50),
            free_shipping_threshold: Money::from_major(500),
            utc_offset: FixedOffset::east_opt(330 * 60).unwrap_or_else(|| Utc.fix()),
            max_conflict_retries: 3,
            enforce_per_user_coupon_limit: false,
        }
    }
}

/// Knobs of the payment state machine.
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    /// When set, a FAILED payment gives its stock and coupon usage back.
    pub restock_on_payment_failure: bool,
    pub pending_order_ttl: chrono::Duration,
    pub sweep_interval: Duration,
    pub sweep_batch: u32,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            restock_on_payment_failure: false,
            pending_order_ttl: chrono::Duration::minutes(30),
            sweep_interval: Duration::from_secs(60),
            sweep_batch: 100,
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {name}: {raw}")),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let checkout_defaults = CheckoutSettings::default();
        let payment_defaults = PaymentSettings::default();

        let offset_minutes: i32 = parsed("STORE_UTC_OFFSET_MINUTES", 330)?;
        let utc_offset = FixedOffset::east_opt(offset_minutes * 60)
            .with_context(|| format!("STORE_UTC_OFFSET_MINUTES out of range: {offset_minutes}"))?;

        Ok(Self {
            port: parsed("PORT", 8083)?,
            database_url: var("DATABASE_URL"),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            nats_url: var("NATS_URL"),
            gateway: GatewayConfig {
                api_base: var("GATEWAY_API_BASE").unwrap_or_else(|| "https://api.razorpay.com/v1".into()),
                key_id: var("GATEWAY_KEY_ID").context("GATEWAY_KEY_ID is required")?,
                key_secret: var("GATEWAY_KEY_SECRET").context("GATEWAY_KEY_SECRET is required")?,
                timeout: Duration::from_millis(parsed("GATEWAY_TIMEOUT_MS", 10_000)?),
            },
            checkout: CheckoutSettings {
                currency: var("STORE_CURRENCY").unwrap_or(checkout_defaults.currency),
                shipping_fee: Money::new(parsed("SHIPPING_FEE", Decimal::from(50))?),
                free_shipping_threshold: Money::new(parsed("FREE_SHIPPING_THRESHOLD", Decimal::from(500))?),
                utc_offset,
                max_conflict_retries: parsed("MAX_CONFLICT_RETRIES", checkout_defaults.max_conflict_retries)?,
                enforce_per_user_coupon_limit: parsed("ENFORCE_PER_USER_COUPON_LIMIT", false)?,
            },
            payments: PaymentSettings {
                restock_on_payment_failure: parsed("RESTOCK_ON_PAYMENT_FAILURE", false)?,
                pending_order_ttl: chrono::Duration::minutes(parsed("PENDING_ORDER_TTL_MINUTES", 30)?),
                sweep_interval: Duration::from_secs(parsed("SWEEP_INTERVAL_SECS", 60)?),
                sweep_batch: parsed("SWEEP_BATCH", payment_defaults.sweep_batch)?,
            },
        })
    }
}
