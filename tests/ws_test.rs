//! Integration tests for WebSocket auth, send/ack/echo and status fanout across tabs.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use mindbridge_server::auth::jwt::issue_access_token;
use mindbridge_server::config::RealtimeConfig;
use mindbridge_server::db::models::Role;
use mindbridge_server::state::AppState;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    base_url: String,
    addr: SocketAddr,
    jwt_secret: Vec<u8>,
}

impl TestServer {
    fn token(&self, user_id: &str, role: Role) -> String {
        issue_access_token(&self.jwt_secret, user_id, role, 300).expect("issue token")
    }
}

/// Helper: start the server on a random port with a throwaway data dir.
async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = mindbridge_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = mindbridge_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = AppState::new(db, jwt_secret.clone(), RealtimeConfig::default());
    let app = mindbridge_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        jwt_secret,
    }
}

/// Seed the member directory through the admin feed.
async fn seed_members(server: &TestServer, members: Value) {
    let resp = reqwest::Client::new()
        .put(format!("{}/api/admin/members", server.base_url))
        .bearer_auth(server.token("adm-root", Role::Admin))
        .json(&members)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
}

/// Open an authenticated socket and give the actor a moment to register it.
async fn connect(server: &TestServer, user_id: &str, role: Role) -> WsStream {
    let url = format!("ws://{}/ws?token={}", server.addr, server.token(user_id, role));
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket connect");
    tokio::time::sleep(Duration::from_millis(100)).await;
    ws
}

async fn send_event(ws: &mut WsStream, event: Value) {
    ws.send(Message::Text(event.to_string().into())).await.unwrap();
}

/// Every JSON event received until the socket stays quiet for `quiet`.
async fn collect_events(ws: &mut WsStream, quiet: Duration) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(Some(Ok(msg))) = tokio::time::timeout(quiet, ws.next()).await {
        if let Message::Text(text) = msg {
            events.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    events
}

/// Wait for the first event with the given name.
async fn next_event(ws: &mut WsStream, name: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let msg = tokio::time::timeout_at(deadline, ws.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {}", name))
            .expect("stream ended")
            .expect("ws error");
        if let Message::Text(text) = msg {
            let event: Value = serde_json::from_str(text.as_str()).unwrap();
            if event["event"] == name {
                return event;
            }
        }
    }
}

fn named<'a>(events: &'a [Value], name: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["event"] == name).collect()
}

async fn expect_close_code(url: &str, expected: u16) {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.expect("handshake");
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("close frame in time")
        .expect("stream ended")
        .expect("ws error");
    match msg {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), expected),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ws_rejects_missing_and_invalid_tokens() {
    let server = start_test_server().await;

    expect_close_code(&format!("ws://{}/ws", server.addr), 4001).await;
    expect_close_code(&format!("ws://{}/ws?token=garbage", server.addr), 4002).await;

    let foreign = issue_access_token(b"some-other-secret-some-other-sec", "pat-1", Role::Patient, 300)
        .unwrap();
    expect_close_code(&format!("ws://{}/ws?token={}", server.addr, foreign), 4002).await;
}

#[tokio::test]
async fn test_send_acks_origin_and_echoes_to_other_tabs() {
    let server = start_test_server().await;
    seed_members(
        &server,
        json!([{"id": "psy-1", "role": "psychologist", "displayName": "Dra. Ana"}]),
    )
    .await;

    let mut tab_a = connect(&server, "pat-1", Role::Patient).await;
    let mut tab_b = connect(&server, "pat-1", Role::Patient).await;
    let mut psy = connect(&server, "psy-1", Role::Psychologist).await;

    send_event(
        &mut tab_a,
        json!({"event": "sendMessage", "data": {
            "requestId": "req-1",
            "recipientId": "psy-1",
            "recipientType": "psychologist",
            "content": "Olá, doutora"
        }}),
    )
    .await;

    let received = next_event(&mut psy, "receiveMessage").await;
    let message_id = received["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(received["data"]["content"], "Olá, doutora");
    assert_eq!(received["data"]["status"], "sent");
    assert_eq!(received["data"]["isRead"], false);

    let echo = next_event(&mut tab_b, "receiveMessage").await;
    assert_eq!(echo["data"]["id"], message_id.as_str());

    let origin_events = collect_events(&mut tab_a, Duration::from_millis(300)).await;
    let acks = named(&origin_events, "ack");
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0]["data"]["requestId"], "req-1");
    assert_eq!(acks[0]["data"]["success"], true);
    assert_eq!(acks[0]["data"]["message"]["id"], message_id.as_str());
    assert!(named(&origin_events, "receiveMessage").is_empty());
    assert_eq!(named(&origin_events, "conversationUpdated").len(), 1);
}

#[tokio::test]
async fn test_failed_send_reports_in_ack() {
    let server = start_test_server().await;
    let mut patient = connect(&server, "pat-1", Role::Patient).await;

    send_event(
        &mut patient,
        json!({"event": "sendMessage", "data": {
            "requestId": "req-9",
            "recipientId": "pat-2",
            "recipientType": "patient",
            "content": "hi"
        }}),
    )
    .await;

    let ack = next_event(&mut patient, "ack").await;
    assert_eq!(ack["data"]["requestId"], "req-9");
    assert_eq!(ack["data"]["success"], false);
    assert_eq!(ack["data"]["error"]["code"], "conversation_resolution_failed");

    send_event(&mut patient, json!({"event": "noSuchEvent", "data": {}})).await;
    let error = next_event(&mut patient, "error").await;
    assert_eq!(error["data"]["code"], "invalid_request");
}

#[tokio::test]
async fn test_two_tabs_deliver_once_and_stay_in_sync() {
    let server = start_test_server().await;
    seed_members(
        &server,
        json!([{"id": "psy-1", "role": "psychologist", "displayName": "Dr. Bruno"}]),
    )
    .await;

    let mut patient = connect(&server, "pat-1", Role::Patient).await;
    let mut tab_1 = connect(&server, "psy-1", Role::Psychologist).await;
    let mut tab_2 = connect(&server, "psy-1", Role::Psychologist).await;

    send_event(
        &mut patient,
        json!({"event": "sendMessage", "data": {
            "recipientId": "psy-1",
            "recipientType": "psychologist",
            "content": "Podemos remarcar?"
        }}),
    )
    .await;
    let ack = next_event(&mut patient, "ack").await;
    let message_id = ack["data"]["message"]["id"].as_str().unwrap().to_string();
    let conversation_id = ack["data"]["message"]["conversationId"].as_str().unwrap().to_string();

    next_event(&mut tab_1, "receiveMessage").await;
    next_event(&mut tab_2, "receiveMessage").await;

    // Both tabs acknowledge at the same time.
    let delivered = json!({"event": "message_delivered", "data": {"messageId": message_id}});
    send_event(&mut tab_1, delivered.clone()).await;
    send_event(&mut tab_2, delivered).await;

    let patient_events = collect_events(&mut patient, Duration::from_millis(400)).await;
    let updates = named(&patient_events, "message_status_updated");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["data"]["messageId"], message_id.as_str());
    assert_eq!(updates[0]["data"]["status"], "delivered");

    for tab in [&mut tab_1, &mut tab_2] {
        let events = collect_events(tab, Duration::from_millis(300)).await;
        assert_eq!(named(&events, "message_status_updated").len(), 1);
    }

    // Reading from one tab moves the other tab and the patient to `read`.
    send_event(
        &mut tab_1,
        json!({"event": "messages_read", "data": {"conversationId": conversation_id}}),
    )
    .await;
    let read = next_event(&mut patient, "message_status_updated").await;
    assert_eq!(read["data"]["status"], "read");
    let synced = next_event(&mut tab_2, "message_status_updated").await;
    assert_eq!(synced["data"]["status"], "read");

    // A late delivered ack after read changes nothing and publishes nothing.
    send_event(
        &mut tab_2,
        json!({"event": "message_delivered", "data": {"messageId": message_id}}),
    )
    .await;
    let late = collect_events(&mut patient, Duration::from_millis(300)).await;
    assert!(named(&late, "message_status_updated").is_empty());
}
