//! Transport client: one WebSocket session to the event hub.
//!
//! Phases: `Disconnected → Connecting → Connected`, and on unexpected loss
//! `Connected → Reconnecting → Connected`. Every spawned task (link reader,
//! reconnect timer) carries the session generation it was created for and
//! does nothing once the generation has moved on, so `disconnect()` and a
//! fresh `connect()` deterministically cancel stale work.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pantry_core::{ClientFrame, Credential, EventEnvelope, HouseholdId, ServerFrame, UserId};
use pantry_settings::TransportSettings;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::errors::{ConnectionError, TransportError};
use crate::lifecycle::{ConnectionState, DisconnectReason, LifecycleEvent};
use crate::registry::{Handler, SubscriptionRegistry};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Transport tuning. Defaults match [`TransportSettings::default`].
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub url: String,
    pub handshake_timeout: Duration,
    pub reconnect_delay: Duration,
    pub send_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from_settings(&TransportSettings::default())
    }
}

impl TransportConfig {
    pub fn from_settings(settings: &TransportSettings) -> Self {
        Self {
            url: settings.url.clone(),
            handshake_timeout: settings.handshake_timeout(),
            reconnect_delay: settings.reconnect_delay(),
            send_queue: settings.send_queue.max(1),
        }
    }
}

/// Handle to the event-stream session. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    registry: Arc<SubscriptionRegistry>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    session: Mutex<Session>,
}

struct Session {
    phase: ConnectionState,
    generation: u64,
    target: Option<Target>,
    user_id: Option<UserId>,
    link: Option<Link>,
    reconnect_timer: Option<JoinHandle<()>>,
    /// A fired reconnect timer is running its handshake.
    attempt_in_flight: bool,
    attempts: u32,
}

#[derive(Clone)]
struct Target {
    credential: Credential,
    household_id: HouseholdId,
}

struct Link {
    outbound: mpsc::Sender<Outbound>,
    task: JoinHandle<()>,
}

enum Outbound {
    Frame(String),
    Close,
}

/// A completed handshake, not yet installed as the session link.
struct Established {
    ws: WsStream,
    user_id: UserId,
    /// Events that arrived between `welcome` and `joined`.
    early: Vec<EventEnvelope>,
}

/// Snapshot of session internals for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportDebug {
    pub phase: ConnectionState,
    pub generation: u64,
    pub reconnect_pending: bool,
    pub attempt_in_flight: bool,
    pub attempts: u32,
    pub link_open: bool,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self::with_registry(config, Arc::new(SubscriptionRegistry::new()))
    }

    /// Share an existing registry, e.g. one that synchronizers were activated on.
    pub fn with_registry(config: TransportConfig, registry: Arc<SubscriptionRegistry>) -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                lifecycle,
                session: Mutex::new(Session {
                    phase: ConnectionState::Disconnected,
                    generation: 0,
                    target: None,
                    user_id: None,
                    link: None,
                    reconnect_timer: None,
                    attempt_in_flight: false,
                    attempts: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// The event bus inbound envelopes are dispatched on.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    pub fn on(&self, event_type: &str, handler: &Handler) -> bool {
        self.inner.registry.on(event_type, handler)
    }

    pub fn off(&self, event_type: &str, handler: &Handler) -> bool {
        self.inner.registry.off(event_type, handler)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().phase
    }

    /// User the hub authenticated the credential as.
    pub fn user_id(&self) -> Option<UserId> {
        self.inner.session.lock().user_id.clone()
    }

    pub fn household_id(&self) -> Option<HouseholdId> {
        self.inner
            .session
            .lock()
            .target
            .as_ref()
            .map(|t| t.household_id.clone())
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }

    /// Lifecycle events as a stream. Events missed by a lagging reader are skipped.
    pub fn lifecycle_stream(&self) -> impl Stream<Item = LifecycleEvent> + Send + Unpin {
        tokio_stream::StreamExt::filter_map(
            BroadcastStream::new(self.subscribe_lifecycle()),
            Result::ok,
        )
    }

    /// Open the session and join `household_id`.
    ///
    /// Returns `Ok(())` at once when already connected, connecting, or while a
    /// reconnect handshake is running. A reconnect that is only waiting on its
    /// timer is superseded. A failed first attempt leaves the transport
    /// disconnected and schedules nothing.
    pub async fn connect(
        &self,
        credential: Credential,
        household_id: HouseholdId,
    ) -> Result<(), ConnectionError> {
        let generation = {
            let mut session = self.inner.session.lock();
            match session.phase {
                ConnectionState::Connected | ConnectionState::Connecting => {
                    debug!(phase = %session.phase, "connect ignored, session already active");
                    return Ok(());
                }
                ConnectionState::Reconnecting if session.attempt_in_flight => {
                    debug!("connect ignored, reconnect attempt in flight");
                    return Ok(());
                }
                ConnectionState::Reconnecting => {
                    if let Some(timer) = session.reconnect_timer.take() {
                        timer.abort();
                    }
                    debug!("connect supersedes pending reconnect");
                }
                ConnectionState::Disconnected => {}
            }
            session.generation += 1;
            session.phase = ConnectionState::Connecting;
            session.attempts = 0;
            session.target = Some(Target {
                credential: credential.clone(),
                household_id: household_id.clone(),
            });
            session.generation
        };

        info!(household_id = %household_id, url = %self.inner.config.url, "connecting");
        match establish(&self.inner.config, &credential, &household_id).await {
            Ok(established) => {
                let user_id = established.user_id.clone();
                match self.inner.install(generation, ConnectionState::Connecting, established) {
                    Ok(_) => {
                        info!(household_id = %household_id, user_id = %user_id, "connected");
                        self.inner.publish(LifecycleEvent::Connected {
                            household_id,
                            user_id,
                        });
                        Ok(())
                    }
                    Err(established) => {
                        close_quietly(established.ws).await;
                        Err(ConnectionError::Cancelled)
                    }
                }
            }
            Err(error) => {
                {
                    let mut session = self.inner.session.lock();
                    if session.generation == generation {
                        session.phase = ConnectionState::Disconnected;
                        session.target = None;
                    }
                }
                warn!(
                    household_id = %household_id,
                    error_kind = error.error_kind(),
                    error = %error,
                    "connect failed"
                );
                self.inner.publish(LifecycleEvent::Error {
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Close the session and cancel any pending reconnection. A later
    /// `connect` starts from scratch.
    pub async fn disconnect(&self) {
        let (was, link, timer) = {
            let mut session = self.inner.session.lock();
            let was = session.phase;
            session.generation += 1;
            session.phase = ConnectionState::Disconnected;
            session.target = None;
            session.user_id = None;
            session.attempt_in_flight = false;
            session.attempts = 0;
            (was, session.link.take(), session.reconnect_timer.take())
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(link) = link {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, link.outbound.send(Outbound::Close)).await;
            let mut task = link.task;
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                task.abort();
            }
        }

        if was != ConnectionState::Disconnected {
            info!(previous = %was, "disconnected");
            self.inner.publish(LifecycleEvent::Disconnected {
                reason: DisconnectReason::ClientRequested,
            });
        }
    }

    /// Queue an `emit` frame for the hub. Never blocks: a full queue drops the frame.
    pub fn emit(&self, event_type: &str, data: Value) -> Result<(), TransportError> {
        let text = ClientFrame::Emit {
            event_type: event_type.to_string(),
            data,
        }
        .to_json()?;

        let session = self.inner.session.lock();
        let link = match (&session.phase, &session.link) {
            (ConnectionState::Connected, Some(link)) => link,
            _ => return Err(TransportError::NotConnected),
        };
        link.outbound
            .try_send(Outbound::Frame(text))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(event_type, "send queue full, dropping emit");
                    TransportError::SendQueueFull
                }
                mpsc::error::TrySendError::Closed(_) => TransportError::NotConnected,
            })
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn debug(&self) -> TransportDebug {
        let session = self.inner.session.lock();
        TransportDebug {
            phase: session.phase,
            generation: session.generation,
            reconnect_pending: session
                .reconnect_timer
                .as_ref()
                .is_some_and(|t| !t.is_finished()),
            attempt_in_flight: session.attempt_in_flight,
            attempts: session.attempts,
            link_open: session.link.is_some(),
        }
    }
}

impl Inner {
    fn publish(&self, event: LifecycleEvent) {
        // No receivers is fine.
        let _ = self.lifecycle.send(event);
    }

    /// Make `established` the live link if the session is still at
    /// `generation` and `expected` phase. Returns the attempt count it reset.
    fn install(
        self: &Arc<Self>,
        generation: u64,
        expected: ConnectionState,
        established: Established,
    ) -> Result<u32, Established> {
        let mut session = self.session.lock();
        if session.generation != generation || session.phase != expected {
            return Err(established);
        }
        let Established { ws, user_id, early } = established;
        let (outbound, rx) = mpsc::channel(self.config.send_queue);
        let task = tokio::spawn(run_link(
            Arc::downgrade(self),
            Arc::clone(&self.registry),
            generation,
            ws,
            rx,
            early,
        ));
        session.link = Some(Link { outbound, task });
        session.phase = ConnectionState::Connected;
        session.attempt_in_flight = false;
        session.user_id = Some(user_id);
        Ok(std::mem::take(&mut session.attempts))
    }

    fn link_lost(self: &Arc<Self>, generation: u64, reason: DisconnectReason) {
        {
            let mut session = self.session.lock();
            if session.generation != generation || session.phase != ConnectionState::Connected {
                return;
            }
            session.link = None;
            session.phase = ConnectionState::Reconnecting;
        }
        warn!(reason = ?reason, "connection lost");
        self.publish(LifecycleEvent::Disconnected { reason });
        self.schedule_reconnect(generation);
    }

    /// Arm exactly one reconnection attempt after the configured delay.
    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let delay = self.config.reconnect_delay;
        let attempt = {
            let mut session = self.session.lock();
            if session.generation != generation || session.phase != ConnectionState::Reconnecting {
                return;
            }
            session.attempt_in_flight = false;
            session.attempts += 1;
            let weak = Arc::downgrade(self);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(inner) = weak.upgrade() {
                    inner.reconnect(generation).await;
                }
            });
            if let Some(stale) = session.reconnect_timer.replace(timer) {
                stale.abort();
            }
            session.attempts
        };
        info!(attempt, ?delay, "reconnect scheduled");
        self.publish(LifecycleEvent::Reconnecting { attempt, delay });
    }

    async fn reconnect(self: Arc<Self>, generation: u64) {
        let target = {
            let mut session = self.session.lock();
            if session.generation != generation || session.phase != ConnectionState::Reconnecting {
                return;
            }
            // Detach our own handle so a reschedule below does not abort this task.
            let _ = session.reconnect_timer.take();
            let Some(target) = session.target.clone() else {
                return;
            };
            session.attempt_in_flight = true;
            target
        };

        debug!(household_id = %target.household_id, "reconnecting");
        match establish(&self.config, &target.credential, &target.household_id).await {
            Ok(established) => {
                match self.install(generation, ConnectionState::Reconnecting, established) {
                    Ok(attempts) => {
                        info!(household_id = %target.household_id, attempts, "reconnected");
                        self.publish(LifecycleEvent::Reconnected {
                            household_id: target.household_id,
                            attempts,
                        });
                    }
                    Err(established) => close_quietly(established.ws).await,
                }
            }
            Err(error) => {
                warn!(
                    household_id = %target.household_id,
                    error_kind = error.error_kind(),
                    error = %error,
                    "reconnect attempt failed"
                );
                self.publish(LifecycleEvent::Error { error });
                self.schedule_reconnect(generation);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let session = self.session.get_mut();
        if let Some(timer) = session.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(link) = session.link.take() {
            link.task.abort();
        }
    }
}

/// Open the socket and run `hello`/`welcome` then `join`/`joined` under the
/// handshake timeout.
async fn establish(
    config: &TransportConfig,
    credential: &Credential,
    household_id: &HouseholdId,
) -> Result<Established, ConnectionError> {
    let handshake = async {
        let (mut ws, _) = connect_async(config.url.as_str())
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        send_frame(
            &mut ws,
            &ClientFrame::Hello {
                token: credential.expose().to_string(),
            },
        )
        .await?;
        let user_id = match next_frame(&mut ws).await? {
            ServerFrame::Welcome { user_id } => user_id,
            ServerFrame::Rejected { reason } => return Err(ConnectionError::Rejected(reason)),
            other => {
                return Err(ConnectionError::Protocol(format!(
                    "expected welcome, got {}",
                    other.kind()
                )))
            }
        };

        send_frame(
            &mut ws,
            &ClientFrame::Join {
                household_id: household_id.clone(),
            },
        )
        .await?;
        let mut early = Vec::new();
        loop {
            match next_frame(&mut ws).await? {
                ServerFrame::Joined { household_id: joined } if joined == *household_id => break,
                ServerFrame::Joined { household_id: joined } => {
                    return Err(ConnectionError::Protocol(format!(
                        "joined {joined}, expected {household_id}"
                    )))
                }
                ServerFrame::Event(envelope) => early.push(envelope),
                ServerFrame::Error { message } => return Err(ConnectionError::Protocol(message)),
                other => {
                    return Err(ConnectionError::Protocol(format!(
                        "expected joined, got {}",
                        other.kind()
                    )))
                }
            }
        }

        Ok(Established { ws, user_id, early })
    };

    tokio::time::timeout(config.handshake_timeout, handshake)
        .await
        .map_err(|_| ConnectionError::Timeout(config.handshake_timeout))?
}

async fn send_frame(ws: &mut WsStream, frame: &ClientFrame) -> Result<(), ConnectionError> {
    let text = frame
        .to_json()
        .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| ConnectionError::Transport(e.to_string()))
}

async fn next_frame(ws: &mut WsStream) -> Result<ServerFrame, ConnectionError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| ConnectionError::Protocol(e.to_string()));
            }
            Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
        }
    }
}

async fn close_quietly(mut ws: WsStream) {
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
}

/// Pump one connection: outbound frames from the queue, inbound envelopes to
/// the registry in receive order.
async fn run_link(
    inner: Weak<Inner>,
    registry: Arc<SubscriptionRegistry>,
    generation: u64,
    ws: WsStream,
    mut outbound: mpsc::Receiver<Outbound>,
    early: Vec<EventEnvelope>,
) {
    let (mut sink, mut stream) = ws.split();
    for envelope in &early {
        let _ = registry.dispatch(envelope);
    }

    let lost = loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        break Some(DisconnectReason::TransportError(e.to_string()));
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break None;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_inbound(&registry, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break Some(DisconnectReason::ServerClosed),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(DisconnectReason::TransportError(e.to_string())),
            },
        }
    };

    if let (Some(reason), Some(inner)) = (lost, inner.upgrade()) {
        inner.link_lost(generation, reason);
    }
}

fn handle_inbound(registry: &SubscriptionRegistry, text: &str) {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(ServerFrame::Event(envelope)) => {
            let report = registry.dispatch(&envelope);
            debug!(
                event_type = %envelope.event_type,
                scope_id = %envelope.scope_id,
                delivered = report.delivered,
                failed = report.failed,
                "event dispatched"
            );
        }
        Ok(ServerFrame::Error { message }) => warn!(message, "hub reported error"),
        Ok(other) => debug!(kind = other.kind(), "ignoring frame"),
        Err(error) => warn!(error = %error, "unparseable frame from hub"),
    }
}
