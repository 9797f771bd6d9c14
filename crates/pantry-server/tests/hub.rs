//! Protocol tests against a running hub using a raw WebSocket client.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pantry_core::{ClientFrame, Delivery, EventEnvelope, HouseholdId, ServerFrame, UserId};
use pantry_server::{start, ServerConfig, ServerHandle};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn boot() -> ServerHandle {
    start(ServerConfig::ephemeral()).await.unwrap()
}

async fn open(handle: &ServerHandle) -> WsStream {
    let (ws, _) = connect_async(handle.ws_url()).await.unwrap();
    ws
}

async fn send(ws: &mut WsStream, frame: &ClientFrame) {
    ws.send(Message::Text(frame.to_json().unwrap().into()))
        .await
        .unwrap();
}

async fn recv(ws: &mut WsStream) -> ServerFrame {
    timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<ServerFrame>(text.as_str()).unwrap()
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => panic!("unexpected message: {other:?}"),
            }
        }
    })
    .await
    .expect("no frame within timeout")
}

/// Complete hello/join and return the authenticated user.
async fn join(handle: &ServerHandle, token: &str, household: &str) -> (WsStream, UserId) {
    let mut ws = open(handle).await;
    send(&mut ws, &ClientFrame::Hello { token: token.into() }).await;
    let ServerFrame::Welcome { user_id } = recv(&mut ws).await else {
        panic!("expected welcome");
    };
    send(
        &mut ws,
        &ClientFrame::Join {
            household_id: HouseholdId::from(household),
        },
    )
    .await;
    assert_eq!(
        recv(&mut ws).await,
        ServerFrame::Joined {
            household_id: HouseholdId::from(household)
        }
    );
    (ws, user_id)
}

async fn post_delivery(handle: &ServerHandle, body: Value) -> Value {
    reqwest::Client::new()
        .post(format!("{}/events", handle.http_url()))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn handshake_welcomes_and_joins() {
    let handle = boot().await;
    let (_ws, user_id) = join(&handle, "T1", "H1").await;
    assert_eq!(user_id, UserId::from_raw("user_T1"));
    assert_eq!(handle.registry().clients_in_household(&HouseholdId::from("H1")).len(), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn empty_token_is_rejected_and_closed() {
    let handle = boot().await;
    let mut ws = open(&handle).await;
    send(&mut ws, &ClientFrame::Hello { token: String::new() }).await;
    assert_eq!(
        recv(&mut ws).await,
        ServerFrame::Rejected {
            reason: "empty token".into()
        }
    );
    let next = timeout(TIMEOUT, ws.next()).await.unwrap();
    assert!(matches!(next, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
    handle.shutdown().await;
}

#[tokio::test]
async fn join_before_hello_is_an_error() {
    let handle = boot().await;
    let mut ws = open(&handle).await;
    send(
        &mut ws,
        &ClientFrame::Join {
            household_id: HouseholdId::from("H1"),
        },
    )
    .await;
    assert_eq!(
        recv(&mut ws).await,
        ServerFrame::Error {
            message: "join before hello".into()
        }
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn garbage_frame_is_an_error() {
    let handle = boot().await;
    let mut ws = open(&handle).await;
    ws.send(Message::Text("not json".into())).await.unwrap();
    assert!(matches!(recv(&mut ws).await, ServerFrame::Error { .. }));
    handle.shutdown().await;
}

#[tokio::test]
async fn static_tokens_map_to_users() {
    let mut tokens = BTreeMap::new();
    tokens.insert("T1".to_string(), "U1".to_string());
    let handle = start(ServerConfig {
        tokens,
        ..ServerConfig::ephemeral()
    })
    .await
    .unwrap();

    let (_ws, user_id) = join(&handle, "T1", "H1").await;
    assert_eq!(user_id, UserId::from_raw("U1"));

    let mut stranger = open(&handle).await;
    send(&mut stranger, &ClientFrame::Hello { token: "T9".into() }).await;
    assert_eq!(
        recv(&mut stranger).await,
        ServerFrame::Rejected {
            reason: "unknown token".into()
        }
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn household_delivery_is_scoped() {
    let handle = boot().await;
    let (mut h1, _) = join(&handle, "T1", "H1").await;
    let (mut h2, _) = join(&handle, "T2", "H2").await;

    let body = post_delivery(
        &handle,
        json!({
            "audience": {"kind": "household", "id": "H1"},
            "envelope": {"type": "item.added", "scopeId": "H1", "payload": {"itemId": "I1", "item": {"name": "Milk"}}},
        }),
    )
    .await;
    assert_eq!(body["delivered"], 1);

    let ServerFrame::Event(envelope) = recv(&mut h1).await else {
        panic!("expected event");
    };
    assert_eq!(envelope.event_type, "item.added");
    assert_eq!(envelope.payload["item"]["name"], "Milk");

    // H2 sees nothing; a ping from the hub is the most it can get.
    let nothing = timeout(Duration::from_millis(200), h2.next()).await;
    assert!(nothing.is_err());
    handle.shutdown().await;
}

#[tokio::test]
async fn user_delivery_reaches_authenticated_user_only() {
    let handle = boot().await;
    let (mut alice, alice_id) = join(&handle, "alice", "H1").await;
    let (mut bob, _) = join(&handle, "bob", "H1").await;

    assert!(handle.publish(Delivery::user(
        alice_id.clone(),
        EventEnvelope::new(
            "notification.new",
            alice_id.as_str(),
            json!({"notificationId": "N1", "item": {"title": "Milk expires tomorrow"}}),
        ),
    )));

    let ServerFrame::Event(envelope) = recv(&mut alice).await else {
        panic!("expected event");
    };
    assert_eq!(envelope.scope_id, alice_id.as_str());
    assert!(timeout(Duration::from_millis(200), bob.next()).await.is_err());
    handle.shutdown().await;
}

#[tokio::test]
async fn emit_frames_reach_inbound_queue() {
    let mut handle = boot().await;
    let (mut ws, user_id) = join(&handle, "T1", "H1").await;

    send(
        &mut ws,
        &ClientFrame::Emit {
            event_type: "list.viewing".into(),
            data: json!({"listId": "L1"}),
        },
    )
    .await;

    let emit = timeout(TIMEOUT, handle.recv_emit()).await.unwrap().unwrap();
    assert_eq!(emit.user_id, user_id);
    assert_eq!(emit.household_id, Some(HouseholdId::from("H1")));
    assert_eq!(emit.event_type, "list.viewing");
    assert_eq!(emit.data["listId"], "L1");
    handle.shutdown().await;
}

#[tokio::test]
async fn leave_stops_household_delivery() {
    let handle = boot().await;
    let (mut ws, _) = join(&handle, "T1", "H1").await;
    send(&mut ws, &ClientFrame::Leave).await;

    timeout(TIMEOUT, async {
        while !handle
            .registry()
            .clients_in_household(&HouseholdId::from("H1"))
            .is_empty()
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let body = post_delivery(
        &handle,
        json!({
            "audience": {"kind": "household", "id": "H1"},
            "envelope": {"type": "item.deleted", "scopeId": "H1", "payload": {"itemId": "I1"}},
        }),
    )
    .await;
    assert_eq!(body["delivered"], 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn health_counts_clients() {
    let handle = boot().await;
    let (_a, _) = join(&handle, "T1", "H1").await;
    let (_b, _) = join(&handle, "T2", "H1").await;

    let body: Value = reqwest::get(format!("{}/health", handle.http_url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["clients"], 2);
    handle.shutdown().await;
}

#[tokio::test]
async fn heartbeat_pings_clients() {
    let handle = start(ServerConfig {
        heartbeat_interval: Duration::from_millis(50),
        ..ServerConfig::ephemeral()
    })
    .await
    .unwrap();
    let (mut ws, _) = join(&handle, "T1", "H1").await;

    let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(msg, Message::Ping(_)));
    handle.shutdown().await;
}
