//! Domain event publication.
//!
//! Events are published after their transaction commits. Publication is best
//! effort: a failure is logged and never fails the operation that raised it.

use async_trait::async_trait;

use crate::domain::events::DomainEvent;

#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    async fn publish(&self, event: &DomainEvent);

    async fn publish_all(&self, events: &[DomainEvent]) {
        for event in events { self.publish(event).await; }
    }
}

/// Publishes JSON-encoded events to `<prefix>.<subject>` on NATS.
pub struct NatsPublisher {
    client: async_nats::Client,
    prefix: String,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self { client, prefix: prefix.into() }
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &DomainEvent) {
        let subject = format!("{}.{}", self.prefix, event.subject());
        let payload = match serde_json::to_vec(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, subject = %subject, "Failed to encode domain event");
                return;
            }
        };
        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            tracing::warn!(error = %e, subject = %subject, "Failed to publish domain event");
        }
    }
}

/// Used when no broker is configured.
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &DomainEvent) {
        tracing::debug!(subject = event.subject(), ?event, "Domain event");
    }
}
