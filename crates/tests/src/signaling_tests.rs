use crate::fixtures::TestApp;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

async fn connect(app: &TestApp, peer_id: &str, connection_id: &str) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let (ws, _) = connect_async(app.ws_url(peer_id, connection_id))
        .await
        .expect("failed to connect websocket");
    ws
}

async fn send_json(
    ws: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    value: Value,
) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn recv_json(
    ws: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
) -> Value {
    loop {
        match ws.next().await.expect("stream ended").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

fn join_payload(display_name: &str) -> Value {
    json!({
        "type": "join",
        "data": {
            "display_name": display_name,
            "rtp_capabilities": { "codecs": [], "header_extensions": [] },
        }
    })
}

#[tokio::test]
async fn health_check_reports_worker_count() {
    let app = TestApp::spawn().await;
    let client = reqwest::Client::new();
    let resp = client.get(app.url("/health")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["workers"], 1);
}

#[tokio::test]
async fn join_then_join_room_returns_snapshot_with_self_as_host() {
    let app = TestApp::spawn().await;
    let mut ws = connect(&app, "alice", "conn-1").await;

    send_json(&mut ws, join_payload("Alice")).await;
    let joined = recv_json(&mut ws).await;
    assert_eq!(joined["type"], "joined");

    send_json(
        &mut ws,
        json!({ "type": "joinRoom", "request_id": "r1", "data": { "room_id": "room-1" } }),
    )
    .await;
    let result = recv_json(&mut ws).await;
    assert_eq!(result["type"], "result");
    assert_eq!(result["request_id"], "r1");
    assert_eq!(result["data"]["created"], true);
    assert_eq!(result["data"]["room"]["host_peer_id"], "alice");
}

#[tokio::test]
async fn second_peer_joining_same_room_does_not_recreate_it() {
    let app = TestApp::spawn().await;

    let mut host_ws = connect(&app, "host", "conn-host").await;
    send_json(&mut host_ws, join_payload("Host")).await;
    recv_json(&mut host_ws).await;
    send_json(
        &mut host_ws,
        json!({ "type": "joinRoom", "request_id": "r1", "data": { "room_id": "room-1" } }),
    )
    .await;
    recv_json(&mut host_ws).await;

    let mut guest_ws = connect(&app, "guest", "conn-guest").await;
    send_json(&mut guest_ws, join_payload("Guest")).await;
    recv_json(&mut guest_ws).await;
    send_json(
        &mut guest_ws,
        json!({ "type": "joinRoom", "request_id": "r2", "data": { "room_id": "room-1" } }),
    )
    .await;
    let result = recv_json(&mut guest_ws).await;
    assert_eq!(result["data"]["created"], false);

    // Host sees the peer_joined notification for the guest.
    let notification = recv_json(&mut host_ws).await;
    assert_eq!(notification["type"], "peer_joined");
}

#[tokio::test]
async fn rejoining_with_a_different_connection_id_is_rejected() {
    let app = TestApp::spawn().await;

    let mut first = connect(&app, "alice", "conn-1").await;
    send_json(&mut first, join_payload("Alice")).await;
    recv_json(&mut first).await;

    let mut second = connect(&app, "alice", "conn-2").await;
    send_json(&mut second, join_payload("Alice")).await;
    let err = recv_json(&mut second).await;
    assert_eq!(err["type"], "error");
}

#[tokio::test]
async fn host_leaving_dismisses_room_for_everyone() {
    let app = TestApp::spawn_with_settings(|s| s.room.dismiss_drain_ms = 5).await;

    let mut host_ws = connect(&app, "host", "conn-host").await;
    send_json(&mut host_ws, join_payload("Host")).await;
    recv_json(&mut host_ws).await;
    send_json(
        &mut host_ws,
        json!({ "type": "joinRoom", "request_id": "r1", "data": { "room_id": "room-1" } }),
    )
    .await;
    recv_json(&mut host_ws).await;

    let mut guest_ws = connect(&app, "guest", "conn-guest").await;
    send_json(&mut guest_ws, join_payload("Guest")).await;
    recv_json(&mut guest_ws).await;
    send_json(
        &mut guest_ws,
        json!({ "type": "joinRoom", "request_id": "r2", "data": { "room_id": "room-1" } }),
    )
    .await;
    recv_json(&mut guest_ws).await;

    // Drain the peer_joined notification the host receives for the guest.
    recv_json(&mut host_ws).await;

    send_json(&mut host_ws, json!({ "type": "leaveRoom", "request_id": "r3" })).await;
    recv_json(&mut host_ws).await;

    let dismissal = recv_json(&mut guest_ws).await;
    assert_eq!(dismissal["type"], "room_dismissed");

    let client = reqwest::Client::new();
    let resp = client.get(app.url("/api/room/room-1")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}
