//! Payment state machine driver.
//!
//! Gateway callbacks may be redelivered or race each other. Each one carries an
//! idempotency key that is claimed in the same transaction as the state change,
//! so a replay finds the key taken and returns the order untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::coupons::CouponEngine;
use super::inventory::InventoryLedger;
use super::release_holds;
use crate::config::PaymentSettings;
use crate::domain::aggregates::{Order, Transition};
use crate::domain::events::DomainEvent;
use crate::gateway::SignatureVerifier;
use crate::publisher::EventPublisher;
use crate::store::Store;
use crate::{EngineError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPayment {
    pub gateway_order_id: String,
    pub payment_id: String,
    pub signature: String,
    /// Gateway delivery id; defaults to the payment id.
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailPayment {
    pub order_id: Uuid,
    /// Required when the caller is not the signed-in owner of the order.
    pub signature: Option<String>,
    pub event_id: Option<String>,
}

pub struct PaymentService {
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
    verifier: SignatureVerifier,
    coupons: CouponEngine,
    ledger: InventoryLedger,
    settings: PaymentSettings,
    max_conflict_retries: u32,
}

/// Outcome of one attempt: the order as it now stands and what to publish.
type Applied = (Order, Vec<DomainEvent>);

impl PaymentService {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn EventPublisher>,
        verifier: SignatureVerifier,
        coupons: CouponEngine,
        settings: PaymentSettings,
        max_conflict_retries: u32,
    ) -> Self {
        Self { store, publisher, verifier, coupons, ledger: InventoryLedger, settings, max_conflict_retries }
    }

    /// INITIATED -> CONFIRMED. The signature is checked before anything is read.
    pub async fn confirm(&self, cmd: ConfirmPayment) -> Result<Order> {
        if !self.verifier.verify(&cmd.gateway_order_id, &cmd.payment_id, &cmd.signature) {
            tracing::warn!(gateway_order_id = %cmd.gateway_order_id, payment_id = %cmd.payment_id, "Rejected payment confirmation with bad signature");
            return Err(EngineError::SignatureInvalid);
        }

        let mut attempt = 0;
        let (order, events) = loop {
            match self.try_confirm(&cmd).await {
                Err(EngineError::Conflict(reason)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    tracing::warn!(gateway_order_id = %cmd.gateway_order_id, attempt, reason = %reason, "Confirmation conflicted, retrying");
                }
                other => break other?,
            }
        };
        self.publisher.publish_all(&events).await;
        Ok(order)
    }

    async fn try_confirm(&self, cmd: &ConfirmPayment) -> Result<Applied> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .order_by_gateway_id_for_update(&cmd.gateway_order_id)
            .await?
            .ok_or_else(|| EngineError::UnknownGatewayOrder(cmd.gateway_order_id.clone()))?;

        let event_id = cmd.event_id.as_deref().unwrap_or(&cmd.payment_id);
        if !tx.claim_payment_event(event_id, order.id(), "confirmed").await? {
            tracing::info!(order_id = %order.id(), event_id, "Duplicate payment confirmation ignored");
            return Ok((order, vec![]));
        }

        match order.confirm_payment(cmd.payment_id.clone())? {
            Transition::Applied => {
                tx.update_order_payment(&order).await?;
                tracing::info!(order_id = %order.id(), order_number = %order.order_number(), payment_id = %cmd.payment_id, "Payment confirmed");
            }
            Transition::Unchanged => {
                tracing::info!(order_id = %order.id(), "Order already confirmed");
            }
        }
        let events = order.take_events();
        tx.commit().await?;
        Ok((order, events))
    }

    /// INITIATED -> FAILED. When `user_id` is given the order must belong to
    /// that user; otherwise the command must carry the gateway's failure signature.
    pub async fn fail(&self, user_id: Option<Uuid>, cmd: FailPayment) -> Result<Order> {
        if user_id.is_none() {
            let order_id = cmd.order_id.to_string();
            let signed = cmd.signature.as_deref().is_some_and(|sig| self.verifier.verify_failure(&order_id, sig));
            if !signed {
                tracing::warn!(order_id = %cmd.order_id, "Rejected unsigned payment failure callback");
                return Err(EngineError::SignatureInvalid);
            }
        }

        let mut attempt = 0;
        let (order, events) = loop {
            match self.try_fail(user_id, &cmd).await {
                Err(EngineError::Conflict(reason)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    tracing::warn!(order_id = %cmd.order_id, attempt, reason = %reason, "Payment failure conflicted, retrying");
                }
                other => break other?,
            }
        };
        self.publisher.publish_all(&events).await;
        Ok(order)
    }

    async fn try_fail(&self, user_id: Option<Uuid>, cmd: &FailPayment) -> Result<Applied> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .order_for_update(cmd.order_id)
            .await?
            .filter(|o| user_id.map_or(true, |u| o.user_id() == u))
            .ok_or(EngineError::OrderNotFound(cmd.order_id))?;

        let event_id = cmd.event_id.clone().unwrap_or_else(|| format!("failed:{}", cmd.order_id));
        if !tx.claim_payment_event(&event_id, order.id(), "failed").await? {
            tracing::info!(order_id = %order.id(), event_id = %event_id, "Duplicate payment failure ignored");
            return Ok((order, vec![]));
        }

        let mut events = Vec::new();
        match order.fail_payment() {
            Transition::Applied => {
                tx.update_order_payment(&order).await?;
                events = order.take_events();
                if self.settings.restock_on_payment_failure {
                    events.extend(release_holds(tx.as_mut(), &order, &self.ledger, &self.coupons).await?);
                }
                tracing::info!(order_id = %order.id(), order_number = %order.order_number(), "Payment failed");
            }
            Transition::Unchanged => {
                tracing::info!(order_id = %order.id(), payment_status = order.payment_status().as_str(), "Payment failure ignored for settled order");
            }
        }
        tx.commit().await?;
        Ok((order, events))
    }

    /// Expires PENDING orders older than the configured TTL and releases their
    /// holds. Returns how many orders were expired.
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.settings.pending_order_ttl;
        let mut tx = self.store.begin().await?;
        let stale = tx.stale_pending_orders(cutoff, self.settings.sweep_batch).await?;

        let mut events = Vec::new();
        let mut expired = 0;
        for mut order in stale {
            if order.expire() != Transition::Applied { continue; }
            tx.update_order_payment(&order).await?;
            events.extend(order.take_events());
            events.extend(release_holds(tx.as_mut(), &order, &self.ledger, &self.coupons).await?);
            expired += 1;
        }
        tx.commit().await?;

        if expired > 0 {
            tracing::info!(expired, cutoff = %cutoff, "Expired stale pending orders");
        }
        self.publisher.publish_all(&events).await;
        Ok(expired)
    }

    /// Runs [`Self::sweep_stale`] every `sweep_interval` until the runtime shuts down.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.settings.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep_stale(Utc::now()).await {
                    tracing::error!(error = %e, "Stale order sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::config::CheckoutSettings;
    use crate::domain::aggregates::{CouponKind, OrderStatus, PaymentStatus};
    use crate::services::testing::*;
    use crate::services::CheckoutReceipt;

    fn confirmation(receipt: &CheckoutReceipt, payment_id: &str) -> ConfirmPayment {
        let signature = SignatureVerifier::new(SECRET).sign(&receipt.gateway_order_id, payment_id).unwrap();
        ConfirmPayment {
            gateway_order_id: receipt.gateway_order_id.clone(),
            payment_id: payment_id.into(),
            signature,
            event_id: None,
        }
    }

    fn failure(receipt: &CheckoutReceipt, signature: Option<String>) -> FailPayment {
        FailPayment { order_id: receipt.order_id, signature, event_id: None }
    }

    fn signed_failure(receipt: &CheckoutReceipt) -> FailPayment {
        failure(receipt, SignatureVerifier::new(SECRET).sign_failure(&receipt.order_id.to_string()))
    }

    async fn placed(h: &Harness, stock_qty: u32, coupon: bool) -> (CheckoutReceipt, crate::domain::aggregates::Product, Uuid) {
        let p = seed_product(&h.store, "Cashews", "500g", 200, stock_qty).await;
        if coupon { seed_coupon(&h.store, "WELCOME", CouponKind::Flat, 20).await; }
        let user = Uuid::new_v4();
        let code = coupon.then_some("WELCOME");
        let receipt = h.services.checkout.create_order(user, request(vec![line(&p, "500g", 2)], code)).await.unwrap();
        (receipt, p, user)
    }

    #[tokio::test]
    async fn test_confirm_marks_success() {
        let h = Harness::new();
        let (receipt, _, _) = placed(&h, 5, false).await;

        let order = h.services.payments.confirm(confirmation(&receipt, "pay_1")).await.unwrap();

        assert_eq!(order.payment_status(), PaymentStatus::Success);
        assert_eq!(order.status(), OrderStatus::Processing);
        assert_eq!(order.payment_id(), Some("pay_1"));
        assert!(h.events.subjects().contains(&"order.payment_confirmed"));
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let h = Harness::new();
        let (receipt, _, _) = placed(&h, 5, false).await;
        let mut cmd = confirmation(&receipt, "pay_1");
        cmd.payment_id = "pay_forged".into();

        assert_eq!(h.services.payments.confirm(cmd).await.unwrap_err(), EngineError::SignatureInvalid);
        assert_eq!(h.store.orders().await[0].payment_status(), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_confirm_twice_is_noop() {
        let h = Harness::new();
        let (receipt, p, user) = placed(&h, 5, true).await;
        let coupon_id = h.store.coupon("WELCOME").await.unwrap().id;

        h.services.payments.confirm(confirmation(&receipt, "pay_1")).await.unwrap();
        // Same delivery replayed, then a second delivery id for the same payment
        h.services.payments.confirm(confirmation(&receipt, "pay_1")).await.unwrap();
        let mut redelivered = confirmation(&receipt, "pay_1");
        redelivered.event_id = Some("evt_2".into());
        let order = h.services.payments.confirm(redelivered).await.unwrap();

        assert_eq!(order.payment_status(), PaymentStatus::Success);
        assert_eq!(stock(&h.store, &p).await, 3);
        assert_eq!(h.store.coupon("WELCOME").await.unwrap().total_used, 1);
        assert_eq!(h.store.coupon_usage(coupon_id, user).await, 1);
        let confirmations = h.events.subjects().into_iter().filter(|s| *s == "order.payment_confirmed").count();
        assert_eq!(confirmations, 1);
    }

    #[tokio::test]
    async fn test_unknown_gateway_order() {
        let h = Harness::new();
        let signature = SignatureVerifier::new(SECRET).sign("gw_missing", "pay_1").unwrap();
        let cmd = ConfirmPayment { gateway_order_id: "gw_missing".into(), payment_id: "pay_1".into(), signature, event_id: None };
        assert_eq!(h.services.payments.confirm(cmd).await.unwrap_err(), EngineError::UnknownGatewayOrder("gw_missing".into()));
    }

    #[tokio::test]
    async fn test_failure_keeps_stock_by_default() {
        let h = Harness::new();
        let (receipt, p, user) = placed(&h, 5, false).await;

        let order = h.services.payments.fail(Some(user), failure(&receipt, None)).await.unwrap();

        assert_eq!(order.payment_status(), PaymentStatus::Failed);
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(stock(&h.store, &p).await, 3);
        // Retained for audit
        assert_eq!(h.store.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_restocks_when_configured() {
        let payments = PaymentSettings { restock_on_payment_failure: true, ..PaymentSettings::default() };
        let h = Harness::with(CheckoutSettings::default(), payments);
        let (receipt, p, _) = placed(&h, 5, true).await;

        h.services.payments.fail(None, signed_failure(&receipt)).await.unwrap();

        assert_eq!(stock(&h.store, &p).await, 5);
        assert_eq!(h.store.coupon("WELCOME").await.unwrap().total_used, 0);
    }

    #[tokio::test]
    async fn test_failure_for_other_user_not_found() {
        let h = Harness::new();
        let (receipt, _, _) = placed(&h, 5, false).await;
        let err = h.services.payments
            .fail(Some(Uuid::new_v4()), failure(&receipt, None))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::OrderNotFound(receipt.order_id));
    }

    #[tokio::test]
    async fn test_settled_orders_keep_their_outcome() {
        let h = Harness::new();
        let (receipt, _, user) = placed(&h, 5, false).await;
        h.services.payments.confirm(confirmation(&receipt, "pay_1")).await.unwrap();

        // Failure after success does not undo the payment
        let order = h.services.payments.fail(Some(user), failure(&receipt, None)).await.unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Success);

        // Abandoning a paid order is refused
        let err = h.services.checkout.abandon_order(user, receipt.order_id, false).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
        assert_eq!(h.store.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_after_failure_rejected() {
        let h = Harness::new();
        let (receipt, _, _) = placed(&h, 5, false).await;
        h.services.payments.fail(None, signed_failure(&receipt)).await.unwrap();

        let err = h.services.payments.confirm(confirmation(&receipt, "pay_late")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));

        // Abandoning a failed order is refused as well
        let user = h.store.orders().await[0].user_id();
        assert!(h.services.checkout.abandon_order(user, receipt.order_id, false).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_expires_stale_orders() {
        let h = Harness::new();
        let (receipt, p, _) = placed(&h, 5, true).await;

        assert_eq!(h.services.payments.sweep_stale(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + Duration::minutes(31);
        assert_eq!(h.services.payments.sweep_stale(later).await.unwrap(), 1);
        assert_eq!(h.services.payments.sweep_stale(later).await.unwrap(), 0);

        let order = h.store.orders().await.into_iter().find(|o| o.id() == receipt.order_id).unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Failed);
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(stock(&h.store, &p).await, 5);
        assert_eq!(h.store.coupon("WELCOME").await.unwrap().total_used, 0);
        assert!(h.events.subjects().contains(&"order.expired"));
    }

    #[tokio::test]
    async fn test_anonymous_failure_needs_signature() {
        let h = Harness::new();
        let (receipt, _, _) = placed(&h, 5, false).await;

        let err = h.services.payments.fail(None, failure(&receipt, None)).await.unwrap_err();
        assert_eq!(err, EngineError::SignatureInvalid);
        let forged = failure(&receipt, SignatureVerifier::new("guessed").sign_failure(&receipt.order_id.to_string()));
        assert_eq!(h.services.payments.fail(None, forged).await.unwrap_err(), EngineError::SignatureInvalid);
        assert_eq!(h.store.orders().await[0].payment_status(), PaymentStatus::Pending);

        let order = h.services.payments.fail(None, signed_failure(&receipt)).await.unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Failed);
    }
}
