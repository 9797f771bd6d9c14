use std::sync::Arc;

use pantry_core::Delivery;
use tokio::sync::broadcast;

use crate::client::ClientRegistry;

/// Forwards deliveries published in-process to the matching WebSocket clients.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Spawn the forwarding task. It ends when every sender is dropped.
    pub fn start(&self, mut rx: broadcast::Receiver<Delivery>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(delivery) => {
                        let _ = registry.deliver(&delivery);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event bridge lagged, dropped deliveries");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Create an event bridge wired to a broadcast channel.
pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<Delivery>,
) -> tokio::task::JoinHandle<()> {
    EventBridge::new(registry).start(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Outgoing;
    use pantry_core::{EventEnvelope, HouseholdId};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn bridge_forwards_to_household_clients() {
        let registry = Arc::new(ClientRegistry::new(32, Duration::from_secs(90)));
        let (tx, rx) = broadcast::channel(16);

        let (member, mut member_rx) = registry.register();
        let (_outsider, mut outsider_rx) = registry.register();
        registry.join(&member, HouseholdId::from("H1"));

        let handle = create_bridge(Arc::clone(&registry), rx);
        tx.send(Delivery::household(
            HouseholdId::from("H1"),
            EventEnvelope::new("item.added", "H1", json!({"itemId": "I1"})),
        ))
        .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), member_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Outgoing::Text(text) = msg else {
            panic!("expected text frame");
        };
        assert!(text.contains("item.added"));
        assert!(outsider_rx.try_recv().is_err());

        handle.abort();
    }

    #[tokio::test]
    async fn bridge_stops_when_senders_drop() {
        let registry = Arc::new(ClientRegistry::new(32, Duration::from_secs(90)));
        let (tx, rx) = broadcast::channel::<Delivery>(16);
        let handle = create_bridge(registry, rx);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
