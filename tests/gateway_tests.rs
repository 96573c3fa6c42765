//! End-to-end tests against a live relay on an ephemeral port:
//! HTTP auth flow, WebSocket handshake rejection, message relay, and the
//! full client chat session with its cache.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_relay::api::handlers::ServerState;
use chat_relay::api::routes::create_router;
use chat_relay::auth::jwt::encode_jwt;
use chat_relay::client::cache::MessageCache;
use chat_relay::client::chat::{ChatNotice, ChatSession};
use chat_relay::client::session::UserInfo;
use chat_relay::store::mock::MockChatStore;
use chat_relay::store::ChatStore;
use chat_relay::AuthConfig;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;

const TEST_SECRET: &str = "test-secret-key-minimum-32-chars!!";

fn test_auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: TEST_SECRET.to_string(),
        jwt_expiry_secs: 3600,
        allow_registration: true,
        frontend_url: None,
    }
}

/// Serve the relay on an ephemeral port, returning its address and a
/// handle to the backing mock store.
async fn spawn_relay() -> (SocketAddr, Arc<MockChatStore>) {
    let store = Arc::new(MockChatStore::new());
    let state = Arc::new(ServerState {
        store: store.clone(),
        auth_config: Some(test_auth_config()),
        server_port: 0,
    });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, store)
}

/// Read frames until the next text frame, skipping pings.
async fn next_text<S>(stream: &mut S) -> serde_json::Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

// ============================================================================
// HTTP auth flow
// ============================================================================

#[tokio::test]
async fn test_register_login_me_flow() {
    let (addr, _store) = spawn_relay().await;
    let base = format!("http://{}", addr);
    let http = reqwest::Client::new();

    // Register
    let resp = http
        .post(format!("{}/api/auth/local/register", base))
        .json(&serde_json::json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "securepass123",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let registered: serde_json::Value = resp.json().await.unwrap();
    assert!(!registered["jwt"].as_str().unwrap().is_empty());

    // Login with the same credentials
    let resp = http
        .post(format!("{}/api/auth/local", base))
        .json(&serde_json::json!({
            "identifier": "alice",
            "password": "securepass123",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let logged_in: serde_json::Value = resp.json().await.unwrap();
    let jwt = logged_in["jwt"].as_str().unwrap();

    // Profile with the fresh token
    let resp = http
        .get(format!("{}/api/users/me", base))
        .bearer_auth(jwt)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let me: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(me["username"], "alice");
    assert_eq!(me["id"], logged_in["user"]["id"]);
}

#[tokio::test]
async fn test_login_bad_credentials_rejected() {
    let (addr, _store) = spawn_relay().await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/api/auth/local", addr))
        .json(&serde_json::json!({
            "identifier": "ghost",
            "password": "whatever",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Invalid identifier or password");
}

// ============================================================================
// WebSocket handshake
// ============================================================================

#[tokio::test]
async fn test_ws_missing_token_closed_with_reason() {
    let (addr, _store) = spawn_relay().await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Close(Some(close)) => {
            assert_eq!(close.code, CloseCode::Library(4401));
            assert_eq!(close.reason.as_str(), "Authentication token missing");
        }
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ws_invalid_token_closed_with_reason() {
    let (addr, _store) = spawn_relay().await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws?token=garbage", addr))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Close(Some(close)) => {
            assert_eq!(close.code, CloseCode::Library(4401));
            assert_eq!(close.reason.as_str(), "Authentication failed");
        }
        other => panic!("expected close frame, got {:?}", other),
    }
}

// ============================================================================
// Message relay
// ============================================================================

#[tokio::test]
async fn test_relay_round_trip() {
    let (addr, store) = spawn_relay().await;
    let token = encode_jwt(7, TEST_SECRET, 3600).unwrap();

    let (mut ws, _) = connect_async(format!("ws://{}/ws?token={}", addr, token))
        .await
        .unwrap();

    ws.send(Message::Text(
        r#"{"event":"sendMessage","content":"hello relay","sender":7}"#.into(),
    ))
    .await
    .unwrap();

    let reply = next_text(&mut ws).await;
    assert_eq!(reply["event"], "receiveMessage");
    assert_eq!(reply["content"], "hello relay");
    assert_eq!(reply["sender"], 7);
    assert!(reply["id"].as_i64().unwrap() >= 1);
    assert!(reply["timestamp"].is_string());

    let persisted = store.messages();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].content, "hello relay");
    assert_eq!(persisted[0].id, reply["id"].as_i64().unwrap());
}

#[tokio::test]
async fn test_relay_persistence_failure_keeps_connection() {
    let (addr, store) = spawn_relay().await;
    let token = encode_jwt(7, TEST_SECRET, 3600).unwrap();

    let (mut ws, _) = connect_async(format!("ws://{}/ws?token={}", addr, token))
        .await
        .unwrap();

    store.set_fail_message_writes(true);
    ws.send(Message::Text(
        r#"{"event":"sendMessage","content":"doomed","sender":7}"#.into(),
    ))
    .await
    .unwrap();

    let reply = next_text(&mut ws).await;
    assert_eq!(reply["event"], "errorMessage");
    assert_eq!(reply["error"], "Failed to save message");
    assert!(store.messages().is_empty());

    // The connection survives; the next message goes through
    store.set_fail_message_writes(false);
    ws.send(Message::Text(
        r#"{"event":"sendMessage","content":"recovered","sender":7}"#.into(),
    ))
    .await
    .unwrap();

    let reply = next_text(&mut ws).await;
    assert_eq!(reply["event"], "receiveMessage");
    assert_eq!(reply["content"], "recovered");
    assert_eq!(store.messages().len(), 1);
}

// ============================================================================
// Client chat session end-to-end
// ============================================================================

#[tokio::test]
async fn test_chat_session_end_to_end_with_cache() {
    let (addr, store) = spawn_relay().await;
    let user = store
        .create_user("alice", "alice@example.com", "unused-hash")
        .await
        .unwrap();
    let token = encode_jwt(user.id, TEST_SECRET, 3600).unwrap();
    let user_info = UserInfo {
        id: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
    };

    let dir = tempfile::tempdir().unwrap();
    let cache = MessageCache::new(dir.path().join("cache.db"));
    let base = format!("http://{}", addr);

    // First session: submit a message and wait for confirmation
    let mut chat = ChatSession::connect(&base, &token, user_info.clone(), cache.clone())
        .await
        .unwrap();
    assert!(chat.messages().is_empty());

    let submitted = chat.submit("hello from the client").unwrap();
    assert!(submitted.pending);

    let notice = tokio::time::timeout(Duration::from_secs(5), chat.next_notice())
        .await
        .unwrap()
        .unwrap();
    let confirmed = match notice {
        ChatNotice::Confirmed(message) => message,
        other => panic!("expected confirmation, got {:?}", other),
    };
    assert_eq!(confirmed.local_id, submitted.local_id);
    assert!(confirmed.server_id.is_some());

    let messages = chat.messages();
    assert_eq!(messages.len(), 1, "confirmation must replace the pending echo");
    assert!(!messages[0].pending);

    chat.close().await;

    // Second session: history comes back from the cache, without duplicates
    let chat = ChatSession::connect(&base, &token, user_info, cache)
        .await
        .unwrap();
    let restored = chat.messages();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].content, "hello from the client");
    assert_eq!(restored[0].server_id, confirmed.server_id);
    chat.close().await;
}
