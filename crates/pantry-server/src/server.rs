use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use pantry_core::{ClientFrame, ClientId, Delivery, HouseholdId, ServerFrame, UserId};
use pantry_settings::ServerSettings;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::TokenAuthenticator;
use crate::client::{self, ClientRegistry};
use crate::event_bridge;

const FRAME_CHANNEL_CAPACITY: usize = 1024;
const DELIVERY_CHANNEL_CAPACITY: usize = 256;
const INBOUND_CHANNEL_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// `0` picks a free port.
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub tokens: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_send_queue: settings.max_send_queue,
            heartbeat_interval: settings.heartbeat_interval(),
            client_timeout: settings.client_timeout(),
            tokens: settings.tokens.clone(),
        }
    }

    /// Loopback on a free port, for tests and embedding.
    pub fn ephemeral() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::default()
        }
    }
}

/// An `emit` frame received from an authenticated client.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundEmit {
    pub client_id: ClientId,
    pub user_id: UserId,
    pub household_id: Option<HouseholdId>,
    pub event_type: String,
    pub data: Value,
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub client_registry: Arc<ClientRegistry>,
    pub frame_tx: mpsc::Sender<(ClientId, String)>,
    pub heartbeat_interval: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/events", post(publish_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and start the hub. Returns a handle that owns every background task.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let client_registry = Arc::new(ClientRegistry::new(
        config.max_send_queue,
        config.client_timeout,
    ));

    let (deliveries, bridge_rx) = broadcast::channel(DELIVERY_CHANNEL_CAPACITY);
    let bridge = event_bridge::create_bridge(Arc::clone(&client_registry), bridge_rx);

    let cleanup = client::start_cleanup_task(Arc::clone(&client_registry), config.heartbeat_interval);

    let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    let auth = TokenAuthenticator::new(&config.tokens);
    let processor = tokio::spawn(process_client_frames(
        frame_rx,
        Arc::clone(&client_registry),
        auth,
        inbound_tx,
    ));

    let router = build_router(AppState {
        client_registry: Arc::clone(&client_registry),
        frame_tx,
        heartbeat_interval: config.heartbeat_interval,
    });
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;

    tracing::info!(%addr, open_auth = config.tokens.is_empty(), "event hub started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await });
        if let Err(error) = serve.await {
            tracing::error!(error = %error, "event hub stopped with error");
        }
    });

    Ok(ServerHandle {
        addr,
        client_registry,
        deliveries,
        inbound: inbound_rx,
        shutdown,
        server,
        background: vec![bridge, cleanup, processor],
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub addr: SocketAddr,
    client_registry: Arc<ClientRegistry>,
    deliveries: broadcast::Sender<Delivery>,
    inbound: mpsc::Receiver<InboundEmit>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.client_registry
    }

    /// Queue a delivery for fan-out through the event bridge.
    pub fn publish(&self, delivery: Delivery) -> bool {
        self.deliveries.send(delivery).is_ok()
    }

    /// Next `emit` frame from any client.
    pub async fn recv_emit(&mut self) -> Option<InboundEmit> {
        self.inbound.recv().await
    }

    /// Close every client, stop accepting and end background tasks.
    pub async fn shutdown(mut self) {
        let closed = self.client_registry.disconnect_all();
        self.shutdown.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.server).await.is_err() {
            self.server.abort();
        }
        for task in &self.background {
            task.abort();
        }
        tracing::info!(closed, "event hub shut down");
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    tracing::info!(client_id = %client_id, "websocket client connected");

    client::handle_ws_connection(
        socket,
        client_id,
        rx,
        state.client_registry,
        state.frame_tx,
        state.heartbeat_interval,
    )
    .await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.client_registry.count(),
    }))
}

async fn publish_handler(
    State(state): State<AppState>,
    Json(delivery): Json<Delivery>,
) -> impl IntoResponse {
    if delivery.envelope.event_type.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "event type is empty" })),
        );
    }
    let delivered = state.client_registry.deliver(&delivery);
    (StatusCode::ACCEPTED, Json(json!({ "delivered": delivered })))
}

/// Run the handshake state machine for every client frame, in arrival order.
async fn process_client_frames(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    registry: Arc<ClientRegistry>,
    auth: TokenAuthenticator,
    inbound: mpsc::Sender<InboundEmit>,
) {
    while let Some((client_id, raw)) = rx.recv().await {
        let frame: ClientFrame = match serde_json::from_str(&raw) {
            Ok(frame) => frame,
            Err(error) => {
                let _ = registry.send_frame(
                    &client_id,
                    &ServerFrame::Error {
                        message: format!("invalid frame: {error}"),
                    },
                );
                continue;
            }
        };

        match frame {
            ClientFrame::Hello { token } => match auth.authenticate(&token) {
                Ok(user_id) => {
                    tracing::info!(client_id = %client_id, user_id = %user_id, "client authenticated");
                    registry.set_user(&client_id, user_id.clone());
                    let _ = registry.send_frame(&client_id, &ServerFrame::Welcome { user_id });
                }
                Err(error) => {
                    tracing::warn!(client_id = %client_id, error = %error, "handshake rejected");
                    let _ = registry.send_frame(
                        &client_id,
                        &ServerFrame::Rejected {
                            reason: error.to_string(),
                        },
                    );
                    let _ = registry.kick(&client_id);
                }
            },
            ClientFrame::Join { household_id } => {
                if registry.user_of(&client_id).is_none() {
                    let _ = registry.send_frame(
                        &client_id,
                        &ServerFrame::Error {
                            message: "join before hello".into(),
                        },
                    );
                    continue;
                }
                let _ = registry.join(&client_id, household_id.clone());
                tracing::info!(client_id = %client_id, household_id = %household_id, "client joined household");
                let _ = registry.send_frame(&client_id, &ServerFrame::Joined { household_id });
            }
            ClientFrame::Leave => {
                if let Some(household_id) = registry.leave(&client_id) {
                    tracing::info!(client_id = %client_id, household_id = %household_id, "client left household");
                }
            }
            ClientFrame::Emit { event_type, data } => {
                let Some(user_id) = registry.user_of(&client_id) else {
                    let _ = registry.send_frame(
                        &client_id,
                        &ServerFrame::Error {
                            message: "emit before hello".into(),
                        },
                    );
                    continue;
                };
                let household_id = registry.household_of(&client_id);
                tracing::info!(
                    client_id = %client_id,
                    user_id = %user_id,
                    event_type = %event_type,
                    "client emit"
                );
                let emit = InboundEmit {
                    client_id,
                    user_id,
                    household_id,
                    event_type,
                    data,
                };
                if inbound.try_send(emit).is_err() {
                    tracing::debug!("inbound emit queue full or closed, dropping");
                }
            }
        }
    }
}
