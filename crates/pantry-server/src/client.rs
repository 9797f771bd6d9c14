use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use pantry_core::{Audience, ClientId, Delivery, HouseholdId, ServerFrame, UserId};
use tokio::sync::mpsc;

/// Queued for a client's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    /// Send a close frame and end the connection.
    Close,
}

/// A connected WebSocket client.
pub struct Client {
    pub id: ClientId,
    /// Set by a successful `hello`.
    pub user_id: Option<UserId>,
    /// Set by `join`, cleared by `leave`.
    pub household_id: Option<HouseholdId>,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<Outgoing>,
    last_seen_ms: AtomicI64,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<Outgoing>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: None,
            household_id: None,
            connected_at: now,
            tx,
            last_seen_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub fn record_activity(&self) {
        self.last_seen_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let silent_ms = Utc::now().timestamp_millis() - self.last_seen_ms.load(Ordering::Relaxed);
        silent_ms < i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX)
    }

    fn enqueue(&self, text: &str) -> bool {
        match self.tx.try_send(Outgoing::Text(text.to_string())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    client_id = %self.id,
                    msg_len = text.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Client>,
    max_send_queue: usize,
    client_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize, client_timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
            client_timeout,
        }
    }

    /// Register a new client and return its id and outbound queue.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<Outgoing>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let _ = self.clients.insert(id.clone(), Client::new(id.clone(), tx));
        (id, rx)
    }

    /// Remove a client. Dropping its sender ends the writer task.
    pub fn unregister(&self, id: &ClientId) -> bool {
        self.clients.remove(id).is_some()
    }

    pub fn set_user(&self, id: &ClientId, user_id: UserId) {
        if let Some(mut client) = self.clients.get_mut(id) {
            client.user_id = Some(user_id);
        }
    }

    pub fn user_of(&self, id: &ClientId) -> Option<UserId> {
        self.clients.get(id).and_then(|c| c.user_id.clone())
    }

    pub fn household_of(&self, id: &ClientId) -> Option<HouseholdId> {
        self.clients.get(id).and_then(|c| c.household_id.clone())
    }

    /// Move the client into `household_id`'s room, leaving any previous one.
    pub fn join(&self, id: &ClientId, household_id: HouseholdId) -> bool {
        match self.clients.get_mut(id) {
            Some(mut client) => {
                client.household_id = Some(household_id);
                true
            }
            None => false,
        }
    }

    pub fn leave(&self, id: &ClientId) -> Option<HouseholdId> {
        self.clients.get_mut(id).and_then(|mut c| c.household_id.take())
    }

    pub fn record_activity(&self, id: &ClientId) {
        if let Some(client) = self.clients.get(id) {
            client.record_activity();
        }
    }

    /// Queue a message for one client. Drops it if the queue is full.
    pub fn send_to(&self, id: &ClientId, message: &str) -> bool {
        self.clients.get(id).is_some_and(|c| c.enqueue(message))
    }

    pub fn send_frame(&self, id: &ClientId, frame: &ServerFrame) -> bool {
        match frame.to_json() {
            Ok(json) => self.send_to(id, &json),
            Err(error) => {
                tracing::error!(client_id = %id, error = %error, "failed to encode frame");
                false
            }
        }
    }

    /// Send to every client in the household room. Returns how many were queued.
    pub fn broadcast_to_household(&self, household_id: &HouseholdId, message: &str) -> usize {
        self.clients
            .iter()
            .filter(|c| c.household_id.as_ref() == Some(household_id))
            .filter(|c| c.enqueue(message))
            .count()
    }

    /// Send to every connection authenticated as `user_id`, joined or not.
    pub fn send_to_user(&self, user_id: &UserId, message: &str) -> usize {
        self.clients
            .iter()
            .filter(|c| c.user_id.as_ref() == Some(user_id))
            .filter(|c| c.enqueue(message))
            .count()
    }

    /// Fan an envelope out to its audience as an `event` frame.
    pub fn deliver(&self, delivery: &Delivery) -> usize {
        let json = match ServerFrame::Event(delivery.envelope.clone()).to_json() {
            Ok(json) => json,
            Err(error) => {
                tracing::error!(error = %error, "failed to encode event frame");
                return 0;
            }
        };
        let delivered = match &delivery.audience {
            Audience::Household(household_id) => self.broadcast_to_household(household_id, &json),
            Audience::User(user_id) => self.send_to_user(user_id, &json),
        };
        tracing::debug!(
            event_type = %delivery.envelope.event_type,
            scope_id = %delivery.envelope.scope_id,
            delivered,
            "event delivered"
        );
        delivered
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn clients_in_household(&self, household_id: &HouseholdId) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|c| c.household_id.as_ref() == Some(household_id))
            .map(|c| c.id.clone())
            .collect()
    }

    /// Ask a client's writer to close the socket.
    pub fn kick(&self, id: &ClientId) -> bool {
        self.clients
            .get(id)
            .is_some_and(|c| c.tx.try_send(Outgoing::Close).is_ok())
    }

    /// Close every connection, e.g. on shutdown.
    pub fn disconnect_all(&self) -> usize {
        self.clients
            .iter()
            .filter(|c| c.tx.try_send(Outgoing::Close).is_ok())
            .count()
    }

    /// Remove clients that have been silent longer than the client timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|c| !c.is_alive(self.client_timeout))
            .map(|c| c.id.clone())
            .collect();

        for id in &dead {
            let _ = self.unregister(id);
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        dead.len()
    }
}

/// Drive one WebSocket: a writer forwarding queued messages plus periodic
/// pings, and a reader forwarding text frames to `on_message`.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<Outgoing>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
    heartbeat_interval: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat_interval);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(Outgoing::Text(text)) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outgoing::Close) | None => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                },
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "sent ping");
                }
            }
        }
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            reader_registry.record_activity(&reader_cid);
            match msg {
                WsMessage::Text(text) => {
                    if on_message
                        .send((reader_cid.clone(), text.as_str().to_owned()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    let _ = registry.unregister(&client_id);
    tracing::info!(client_id = %client_id, "client disconnected");
}

/// Periodically drop clients that stopped answering pings.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            let _ = ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed, "dead client cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantry_core::EventEnvelope;
    use serde_json::json;

    fn registry(queue: usize) -> ClientRegistry {
        ClientRegistry::new(queue, Duration::from_secs(90))
    }

    #[test]
    fn register_and_unregister() {
        let registry = registry(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("client_"));
        assert_eq!(registry.count(), 2);

        assert!(registry.unregister(&id1));
        assert!(!registry.unregister(&id1));
        assert_eq!(registry.count(), 1);
        assert!(registry.unregister(&id2));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn join_and_leave_household() {
        let registry = registry(32);
        let (id, _rx) = registry.register();
        let hh = HouseholdId::from("H1");

        assert!(registry.join(&id, hh.clone()));
        assert_eq!(registry.household_of(&id), Some(hh.clone()));
        assert_eq!(registry.clients_in_household(&hh), vec![id.clone()]);

        assert_eq!(registry.leave(&id), Some(hh.clone()));
        assert!(registry.clients_in_household(&hh).is_empty());
    }

    #[test]
    fn broadcast_reaches_only_household_members() {
        let registry = registry(32);
        let (id1, mut rx1) = registry.register();
        let (id2, mut rx2) = registry.register();
        let (_id3, mut rx3) = registry.register();
        registry.join(&id1, HouseholdId::from("H1"));
        registry.join(&id2, HouseholdId::from("H2"));

        assert_eq!(registry.broadcast_to_household(&HouseholdId::from("H1"), "hello"), 1);
        assert_eq!(rx1.try_recv().unwrap(), Outgoing::Text("hello".into()));
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn user_delivery_ignores_household() {
        let registry = registry(32);
        let (id1, mut rx1) = registry.register();
        let (id2, mut rx2) = registry.register();
        registry.set_user(&id1, UserId::from_raw("U1"));
        registry.set_user(&id2, UserId::from_raw("U2"));
        registry.join(&id2, HouseholdId::from("H1"));

        let delivery = Delivery::user(
            UserId::from_raw("U1"),
            EventEnvelope::new("notification.new", "U1", json!({"notificationId": "N1"})),
        );
        assert_eq!(registry.deliver(&delivery), 1);

        let Outgoing::Text(text) = rx1.try_recv().unwrap() else {
            panic!("expected text");
        };
        let frame: ServerFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(frame.kind(), "event");
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn full_queue_drops() {
        let registry = registry(2);
        let (id, _rx) = registry.register();

        assert!(registry.send_to(&id, "msg1"));
        assert!(registry.send_to(&id, "msg2"));
        assert!(!registry.send_to(&id, "msg3"));
    }

    #[test]
    fn send_to_unknown_client() {
        let registry = registry(32);
        assert!(!registry.send_to(&ClientId::new(), "test"));
        assert!(!registry.kick(&ClientId::new()));
    }

    #[test]
    fn disconnect_all_queues_close() {
        let registry = registry(32);
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();
        assert_eq!(registry.disconnect_all(), 2);
        assert_eq!(rx_a.try_recv().unwrap(), Outgoing::Close);
        assert_eq!(rx_b.try_recv().unwrap(), Outgoing::Close);
    }

    #[test]
    fn cleanup_removes_silent_clients() {
        let registry = registry(32);
        let (id, _rx) = registry.register();
        let (_fresh, _rx2) = registry.register();

        if let Some(client) = registry.clients.get(&id) {
            client.last_seen_ms.store(0, Ordering::Relaxed);
        }

        assert_eq!(registry.cleanup_dead_clients(), 1);
        assert_eq!(registry.count(), 1);
        assert!(registry.user_of(&id).is_none());
    }

    #[test]
    fn activity_keeps_client_alive() {
        let (tx, _rx) = mpsc::channel(1);
        let client = Client::new(ClientId::new(), tx);
        client.last_seen_ms.store(0, Ordering::Relaxed);
        assert!(!client.is_alive(Duration::from_secs(90)));
        client.record_activity();
        assert!(client.is_alive(Duration::from_secs(90)));
    }
}
