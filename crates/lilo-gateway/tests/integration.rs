//! Gateway integration tests: start a real gateway and interact via WS + HTTP.
//!
//! Run with: `cargo test -p lilo-gateway --test integration`

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Build a gateway on a free port and return its state + port.
async fn start_test_gateway() -> (Arc<lilo_gateway::GatewayState>, u16) {
    let port = find_free_port();

    let config = lilo_core::config::Config::default();
    let state = Arc::new(lilo_gateway::GatewayState::new(Arc::new(config)));

    // Start gateway in background
    let state_clone = state.clone();
    tokio::spawn(async move {
        let _ = lilo_gateway::start_gateway(state_clone, port).await;
    });

    // Wait for gateway to be ready
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    (state, port)
}

async fn connect(port: u16) -> Ws {
    let url = format!("ws://127.0.0.1:{port}/ws");
    let (ws, _) = connect_async(&url).await.expect("WS connect failed");
    ws
}

async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next JSON event, skipping control frames.
async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("stream ended")
            .expect("WS error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn join(ws: &mut Ws, room_id: &str, name: &str) -> Value {
    send(
        ws,
        json!({"type": "join-room", "roomId": room_id, "userName": name, "userColor": "#4ECDC4"}),
    )
    .await;
    let state = recv(ws).await;
    assert_eq!(state["type"], "room-state");
    state
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_state, port) = start_test_gateway().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert_eq!(body["rooms"], 0);
}

#[tokio::test]
async fn test_two_clients_sync_a_room() {
    let (state, port) = start_test_gateway().await;
    let mut ada = connect(port).await;
    let mut bob = connect(port).await;

    let snapshot = join(&mut ada, "ABCDE", "Ada").await;
    assert_eq!(snapshot["roomId"], "ABCDE");
    assert_eq!(snapshot["users"].as_array().unwrap().len(), 1);
    assert_eq!(snapshot["wordPieces"], json!([]));
    assert_eq!(snapshot["operations"], json!([]));
    let ada_id = snapshot["userId"].as_str().unwrap().to_string();

    let snapshot = join(&mut bob, "ABCDE", "Bob").await;
    assert_eq!(snapshot["users"][0]["name"], "Ada");
    let joined = recv(&mut ada).await;
    assert_eq!(joined["type"], "user-joined");
    assert_eq!(joined["user"]["name"], "Bob");

    send(
        &mut ada,
        json!({"type": "operation", "kind": "add",
               "data": {"id": "w1", "text": "dawn", "x": 10, "y": 10, "rotation": 0}}),
    )
    .await;
    let op = recv(&mut bob).await;
    assert_eq!(op["type"], "operation");
    assert_eq!(op["operation"]["kind"], "add");
    assert_eq!(op["operation"]["userId"], ada_id.as_str());
    assert_eq!(op["wordPieces"][0]["id"], "w1");
    assert_eq!(op["wordPieces"][0]["text"], "dawn");
    assert_eq!(op["wordPieces"][0]["owner"], ada_id.as_str());

    send(&mut bob, json!({"type": "cursor-move", "cursor": {"x": 3.0, "y": 4.0}})).await;
    let cursor = recv(&mut ada).await;
    assert_eq!(cursor["type"], "cursor-update");
    assert_eq!(cursor["cursor"], json!({"x": 3.0, "y": 4.0}));

    send(&mut bob, json!({"type": "operation", "kind": "delete", "data": {"id": "w1"}})).await;
    let op = recv(&mut ada).await;
    assert_eq!(op["operation"]["kind"], "delete");
    assert_eq!(op["wordPieces"], json!([]));

    let room = state.registry.get("ABCDE").unwrap();
    assert!(room.lock().await.canvas().is_empty());
    assert_eq!(room.lock().await.log().len(), 2);

    // Closing a socket is an implicit leave.
    bob.close(None).await.unwrap();
    let left = recv(&mut ada).await;
    assert_eq!(left["type"], "user-left");
    assert_eq!(left["users"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_malformed_messages_get_error_events() {
    let (_state, port) = start_test_gateway().await;
    let mut ws = connect(port).await;

    ws.send(Message::Text("{not json".into())).await.unwrap();
    let err = recv(&mut ws).await;
    assert_eq!(err["type"], "error");

    send(
        &mut ws,
        json!({"type": "join-room", "roomId": "", "userName": "Ada", "userColor": "#4ECDC4"}),
    )
    .await;
    let err = recv(&mut ws).await;
    assert_eq!(err["type"], "error");

    join(&mut ws, "ABCDE", "Ada").await;
    send(&mut ws, json!({"type": "operation", "kind": "add", "data": {"text": "no id"}})).await;
    let err = recv(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert!(err["message"].as_str().unwrap().contains("add"));
}

#[tokio::test]
async fn test_late_joiner_receives_log_and_pieces() {
    let (state, port) = start_test_gateway().await;
    let mut ada = connect(port).await;
    join(&mut ada, "ROOM7", "Ada").await;

    for (id, text) in [("w1", "dawn"), ("w2", "moon")] {
        send(
            &mut ada,
            json!({"type": "operation", "id": format!("op-{id}"), "kind": "add",
                   "data": {"id": id, "text": text, "x": 0, "y": 0}}),
        )
        .await;
    }
    // Operations are never echoed, so wait for the room to apply both.
    for _ in 0..50 {
        let room = state.registry.get("ROOM7").unwrap();
        if room.lock().await.log().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let mut bob = connect(port).await;
    let snapshot = join(&mut bob, "ROOM7", "Bob").await;
    let ids: Vec<_> = snapshot["operations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|op| op["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, ["op-w1", "op-w2"]);
    assert_eq!(snapshot["wordPieces"][1]["text"], "moon");
}
