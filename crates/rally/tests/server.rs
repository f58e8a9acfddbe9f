//! Integration tests for the peer: raw frames over a real WebSocket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rally::prelude::*;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const WAIT: Duration = Duration::from_secs(5);

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Starts a server on a random port and returns the address.
async fn start_server() -> (String, ServerHandle) {
    let server = RallyServerBuilder::new()
        .bind("127.0.0.1:0")
        .config(ServerConfig { match_size: 2 })
        .build()
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let handle = server.handle();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    (addr, handle)
}

async fn connect_path(addr: &str, path: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .expect("should connect");
    ws
}

async fn connect(addr: &str, participant: &str) -> ClientWs {
    connect_path(addr, &format!("/ws/{participant}")).await
}

async fn send_raw(ws: &mut ClientWs, frame: &str) {
    ws.send(WsMessage::Text(frame.into())).await.expect("send");
}

async fn send_json(ws: &mut ClientWs, frame: Value) {
    send_raw(ws, &frame.to_string()).await;
}

async fn recv_json(ws: &mut ClientWs) -> Value {
    let msg = timeout(WAIT, ws.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("recv");
    let text = msg.into_text().expect("text frame");
    serde_json::from_str(&text).expect("frame should be JSON")
}

fn assert_error(frame: &Value) {
    assert_eq!(frame["type"], "error", "expected error frame, got {frame}");
    assert!(frame["message"].as_str().is_some_and(|m| !m.is_empty()));
}

/// Creates a lobby as `ws` and returns its id.
async fn create_lobby(ws: &mut ClientWs, max_commanders: usize, max_pawns: usize) -> String {
    send_json(
        ws,
        json!({
            "type": "lobby",
            "action": "create",
            "name": "Alpha",
            "maxCommanders": max_commanders,
            "maxPawns": max_pawns,
            "hostName": "Host",
        }),
    )
    .await;
    let reply = recv_json(ws).await;
    assert_eq!(reply["action"], "update");
    reply["lobby"]["id"].as_str().expect("lobby id").to_owned()
}

// =========================================================================
// Malformed input
// =========================================================================

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr, "p1").await;

    send_raw(&mut ws, "not json at all").await;
    assert_error(&recv_json(&mut ws).await);

    send_json(&mut ws, json!({"type": "teleport"})).await;
    assert_error(&recv_json(&mut ws).await);

    send_json(&mut ws, json!({"type": "lobby", "action": "list"})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "lobby");
    assert_eq!(reply["action"], "list");
    assert_eq!(reply["lobbies"], json!([]));
}

#[tokio::test]
async fn test_non_utf8_binary_frame_is_answered_not_fatal() {
    let (addr, handle) = start_server().await;
    let mut ws = connect(&addr, "p1").await;

    ws.send(WsMessage::Binary(vec![0xff, 0xfe, 0xfd].into()))
        .await
        .expect("send");
    assert_error(&recv_json(&mut ws).await);

    send_json(&mut ws, json!({"type": "lobby", "action": "list"})).await;
    assert_eq!(recv_json(&mut ws).await["action"], "list");
    assert_eq!(handle.connected().await, 1);
}

#[tokio::test]
async fn test_path_without_participant_is_refused() {
    let (addr, handle) = start_server().await;
    let mut ws = connect_path(&addr, "/lobby").await;

    assert_error(&recv_json(&mut ws).await);
    assert_eq!(handle.connected().await, 0);
}

#[tokio::test]
async fn test_peer_only_frames_from_client_are_rejected() {
    let (addr, handle) = start_server().await;
    let mut ws = connect(&addr, "p1").await;

    let forged = json!({
        "type": "lobby",
        "action": "update",
        "lobby": {
            "id": "L1", "name": "Forged", "commanders": ["p1"], "pawns": [],
            "maxCommanders": 1, "maxPawns": 0, "status": "waiting", "created_at": 0.0
        }
    });
    send_json(&mut ws, forged).await;
    assert_error(&recv_json(&mut ws).await);

    send_json(&mut ws, json!({"type": "match", "players": ["p1"], "timestamp": "1"})).await;
    assert_error(&recv_json(&mut ws).await);

    assert!(handle.lobbies().await.is_empty());
}

// =========================================================================
// Identity
// =========================================================================

#[tokio::test]
async fn test_duplicate_participant_is_refused() {
    let (addr, handle) = start_server().await;
    let mut first = connect(&addr, "p1").await;
    send_json(&mut first, json!({"type": "lobby", "action": "list"})).await;
    recv_json(&mut first).await;

    let mut second = connect(&addr, "p1").await;
    assert_error(&recv_json(&mut second).await);

    // The original connection is untouched.
    send_json(&mut first, json!({"type": "lobby", "action": "list"})).await;
    assert_eq!(recv_json(&mut first).await["action"], "list");
    assert_eq!(handle.connected().await, 1);
}

// =========================================================================
// Lobby rules
// =========================================================================

#[tokio::test]
async fn test_create_seats_creator_as_host() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr, "p1").await;

    send_json(
        &mut ws,
        json!({"type": "lobby", "action": "create", "name": "Alpha", "maxCommanders": 2, "maxPawns": 3}),
    )
    .await;
    let reply = recv_json(&mut ws).await;

    assert_eq!(reply["type"], "lobby");
    assert_eq!(reply["action"], "update");
    let lobby = &reply["lobby"];
    assert_eq!(lobby["name"], "Alpha");
    assert_eq!(lobby["commanders"], json!(["p1"]));
    assert_eq!(lobby["pawns"], json!([]));
    assert_eq!(lobby["maxCommanders"], 2);
    assert_eq!(lobby["maxPawns"], 3);
    assert_eq!(lobby["status"], "waiting");
    assert!(lobby["created_at"].as_f64().is_some());
}

#[tokio::test]
async fn test_join_broadcasts_update_to_every_member() {
    let (addr, _) = start_server().await;
    let mut host = connect(&addr, "host").await;
    let mut guest = connect(&addr, "guest").await;
    let lobby_id = create_lobby(&mut host, 1, 2).await;

    send_json(
        &mut guest,
        json!({"type": "lobby", "action": "join", "lobby_id": lobby_id, "role": "pawn", "name": "Guest"}),
    )
    .await;

    for ws in [&mut host, &mut guest] {
        let update = recv_json(ws).await;
        assert_eq!(update["action"], "update");
        assert_eq!(update["lobby"]["pawns"], json!(["guest"]));
    }
}

#[tokio::test]
async fn test_join_unknown_lobby_is_rejected() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr, "p1").await;

    send_json(
        &mut ws,
        json!({"type": "lobby", "action": "join", "lobby_id": "nope", "role": "commander"}),
    )
    .await;
    assert_error(&recv_json(&mut ws).await);
}

#[tokio::test]
async fn test_leave_sends_removal_signal_and_update() {
    let (addr, _) = start_server().await;
    let mut host = connect(&addr, "host").await;
    let mut guest = connect(&addr, "guest").await;
    let lobby_id = create_lobby(&mut host, 1, 1).await;

    send_json(
        &mut guest,
        json!({"type": "lobby", "action": "join", "lobby_id": lobby_id, "role": "pawn"}),
    )
    .await;
    recv_json(&mut host).await;
    recv_json(&mut guest).await;

    send_json(&mut guest, json!({"type": "lobby", "action": "leave", "lobby_id": lobby_id})).await;

    let removal = recv_json(&mut guest).await;
    assert_eq!(removal["action"], "update");
    assert_eq!(removal["lobby_id"], lobby_id.as_str());
    assert!(removal.get("lobby").is_none());

    let update = recv_json(&mut host).await;
    assert_eq!(update["lobby"]["pawns"], json!([]));
}

#[tokio::test]
async fn test_dropped_connection_frees_the_seat() {
    let (addr, handle) = start_server().await;
    let mut host = connect(&addr, "host").await;
    let mut guest = connect(&addr, "guest").await;
    let lobby_id = create_lobby(&mut host, 1, 1).await;

    send_json(
        &mut guest,
        json!({"type": "lobby", "action": "join", "lobby_id": lobby_id, "role": "pawn"}),
    )
    .await;
    recv_json(&mut host).await;
    recv_json(&mut guest).await;

    guest.close(None).await.expect("close");
    drop(guest);

    let update = recv_json(&mut host).await;
    assert_eq!(update["lobby"]["pawns"], json!([]));
    assert_eq!(handle.lobbies().await[0].pawns.len(), 0);
}

// =========================================================================
// Chat
// =========================================================================

#[tokio::test]
async fn test_chat_sender_comes_from_connection() {
    let (addr, _) = start_server().await;
    let mut host = connect(&addr, "host").await;
    let lobby_id = create_lobby(&mut host, 1, 0).await;

    send_json(
        &mut host,
        json!({"type": "chat", "lobby_id": lobby_id, "sender": "somebody-else", "message": "hi"}),
    )
    .await;
    let echo = recv_json(&mut host).await;

    assert_eq!(echo["type"], "chat");
    assert_eq!(echo["sender"], "host");
    assert_eq!(echo["message"], "hi");
}

#[tokio::test]
async fn test_chat_from_non_member_is_rejected() {
    let (addr, _) = start_server().await;
    let mut host = connect(&addr, "host").await;
    let mut outsider = connect(&addr, "outsider").await;
    let lobby_id = create_lobby(&mut host, 1, 1).await;

    send_json(
        &mut outsider,
        json!({"type": "chat", "lobby_id": lobby_id, "sender": "outsider", "message": "hi"}),
    )
    .await;
    assert_error(&recv_json(&mut outsider).await);
}

// =========================================================================
// Matchmaking
// =========================================================================

#[tokio::test]
async fn test_matchmaking_sends_match_to_both_players() {
    let (addr, _) = start_server().await;
    let mut a = connect(&addr, "a").await;
    let mut b = connect(&addr, "b").await;

    send_json(&mut a, json!({"type": "matchmaking", "action": "join"})).await;
    // Round trip so `a` is queued first.
    send_json(&mut a, json!({"type": "lobby", "action": "list"})).await;
    recv_json(&mut a).await;
    send_json(&mut b, json!({"type": "matchmaking", "action": "join"})).await;

    for ws in [&mut a, &mut b] {
        let notice = recv_json(ws).await;
        assert_eq!(notice["type"], "match");
        assert_eq!(notice["players"], json!(["a", "b"]));
        assert!(notice["timestamp"].as_str().is_some());
    }
}
