//! Domain event publishing over NATS

use crate::domain::events::DomainEvent;

/// Fire-and-forget publisher. Without a NATS client events are only logged.
#[derive(Clone, Debug)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
    prefix: String,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>, prefix: impl Into<String>) -> Self {
        Self { nats, prefix: prefix.into() }
    }

    pub fn disabled() -> Self { Self::new(None, "opensase.fulfillment") }

    pub fn subject(&self, event: &DomainEvent) -> String { format!("{}.{}", self.prefix, event.name()) }

    /// Publishing failures never fail the operation that produced the events.
    pub async fn publish(&self, events: &[DomainEvent]) {
        for event in events {
            let subject = self.subject(event);
            let Some(nats) = &self.nats else {
                tracing::debug!(%subject, "Event not published, NATS disabled");
                continue;
            };
            let payload = match serde_json::to_vec(event) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(%subject, error = %e, "Failed to serialize event");
                    continue;
                }
            };
            if let Err(e) = nats.publish(subject.clone(), payload.into()).await {
                tracing::warn!(%subject, error = %e, "Failed to publish event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::InventoryEvent;
    use crate::domain::value_objects::{OperationToken, VariantId};

    #[test]
    fn test_subject_uses_prefix_and_event_name() {
        let publisher = EventPublisher::new(None, "shop.prod");
        let event = DomainEvent::Inventory(InventoryEvent::Decremented {
            token: OperationToken::new("t1"),
            lines: vec![(VariantId::new("V1"), 2)],
        });
        assert_eq!(publisher.subject(&event), "shop.prod.inventory.decremented");
    }

    #[test]
    fn test_event_payload_shape() {
        let event = DomainEvent::Inventory(InventoryEvent::Incremented {
            token: OperationToken::new("t2"),
            lines: vec![(VariantId::new("V1"), 1)],
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["aggregate"], "inventory");
        assert_eq!(json["type"], "incremented");
        assert_eq!(json["token"], "t2");
    }

    #[tokio::test]
    async fn test_publish_without_client_is_noop() {
        let event = DomainEvent::Inventory(InventoryEvent::Incremented { token: OperationToken::new("t3"), lines: vec![] });
        EventPublisher::disabled().publish(&[event]).await;
    }
}
