//! Folds an anonymous session cart into the user's cart at login.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::Cart;
use crate::domain::events::{CartEvent, DomainEvent};
use crate::publisher::EventPublisher;
use crate::store::Store;
use crate::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub merged_lines: usize,
    /// The caller should drop the session token; its cart no longer exists.
    pub clear_session: bool,
}

impl MergeOutcome {
    fn nothing() -> Self { Self { merged_lines: 0, clear_session: false } }
}

pub struct CartMergeService {
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
    max_conflict_retries: u32,
}

impl CartMergeService {
    pub fn new(store: Arc<dyn Store>, publisher: Arc<dyn EventPublisher>, max_conflict_retries: u32) -> Self {
        Self { store, publisher, max_conflict_retries }
    }

    /// Idempotent: once the guest cart is gone, later calls find nothing to merge.
    pub async fn merge(&self, user_id: Uuid, session_token: &str) -> Result<MergeOutcome> {
        let token = session_token.trim();
        if token.is_empty() {
            return Ok(MergeOutcome::nothing());
        }

        let mut attempt = 0;
        let outcome = loop {
            match self.try_merge(user_id, token).await {
                Err(EngineError::Conflict(reason)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    tracing::warn!(user_id = %user_id, attempt, reason = %reason, "Cart merge conflicted, retrying");
                }
                other => break other?,
            }
        };

        if outcome.merged_lines > 0 {
            tracing::info!(user_id = %user_id, merged_lines = outcome.merged_lines, "Guest cart merged");
            self.publisher
                .publish(&DomainEvent::Cart(CartEvent::Merged { user_id, merged_lines: outcome.merged_lines }))
                .await;
        }
        Ok(outcome)
    }

    async fn try_merge(&self, user_id: Uuid, token: &str) -> Result<MergeOutcome> {
        let mut tx = self.store.begin().await?;
        let guest = match tx.session_cart_for_update(token).await? {
            Some(cart) if !cart.is_empty() => cart,
            _ => return Ok(MergeOutcome::nothing()),
        };

        let mut cart = tx.user_cart_for_update(user_id).await?.unwrap_or_else(|| Cart::for_user(user_id));
        let merged_lines = cart.absorb(&guest);
        tx.save_cart(&cart).await?;
        tx.delete_cart(guest.id()).await?;
        tx.commit().await?;

        Ok(MergeOutcome { merged_lines, clear_session: true })
    }
}
