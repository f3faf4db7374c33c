#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use gateway_api::auth::jwt::JwtVerifier;
use gateway_api::auth::TrustedUserVerifier;
use gateway_api::config::Config;
use gateway_api::db::kv::{KeyValueStore, MemoryStore};
use gateway_api::error::StoreError;
use gateway_api::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_SECRET: &str = "test-secret-do-not-use-in-production";

/// Build a test AppState over an in-memory registry that trusts the claimed `userId`.
pub fn test_state() -> AppState {
    AppState::new(
        Config::default(),
        Arc::new(MemoryStore::new()),
        Arc::new(TrustedUserVerifier),
    )
}

/// Build a test AppState sharing `kv` with other states, as separate gateway
/// processes pointed at one store would.
pub fn test_state_with_store(kv: Arc<dyn KeyValueStore>) -> AppState {
    AppState::new(Config::default(), kv, Arc::new(TrustedUserVerifier))
}

/// Like [`test_state_with_store`], with connections this process does not hold
/// reached through the push API at `push_api_url`.
pub fn test_state_with_push(kv: Arc<dyn KeyValueStore>, push_api_url: &str) -> AppState {
    let config = Config {
        push_api_url: Some(push_api_url.to_string()),
        ..Config::default()
    };
    AppState::new(config, kv, Arc::new(TrustedUserVerifier))
}

/// In-memory store whose writes and listings can be switched to fail.
/// Reads always succeed.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.del(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.keys_with_prefix(prefix).await
    }
}

/// Build a test AppState that requires HS256 bearer tokens signed with [`TEST_SECRET`].
pub fn jwt_state() -> AppState {
    let config = Config {
        auth_secret: Some(TEST_SECRET.to_string()),
        ..Config::default()
    };
    AppState::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(JwtVerifier::new(TEST_SECRET, None, None)),
    )
}

/// Build the full application router wired to `state`.
pub fn test_app(state: &AppState) -> Router {
    gateway_api::routes::router().with_state(state.clone())
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background until the test ends.
pub async fn start_ws_server(state: &AppState) -> SocketAddr {
    let app = test_app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

#[derive(Debug, Serialize)]
struct TestClaims {
    sub: String,
    exp: i64,
}

/// Mint an HS256 token for `user_id`, valid for five minutes.
pub fn mint_token(user_id: &str) -> String {
    mint_token_with_exp(user_id, chrono::Duration::seconds(300))
}

/// Mint a token that expired ten minutes ago.
pub fn mint_expired_token(user_id: &str) -> String {
    mint_token_with_exp(user_id, chrono::Duration::seconds(-600))
}

fn mint_token_with_exp(user_id: &str, offset: chrono::Duration) -> String {
    let claims = TestClaims {
        sub: user_id.to_string(),
        exp: (chrono::Utc::now() + offset).timestamp(),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint test token")
}

/// Open a raw WebSocket to `/gateway` with the given query string.
pub async fn connect_raw(addr: SocketAddr, query: &str) -> WsClient {
    let url = format!("ws://{addr}/gateway?{query}");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

/// Connect as `user_id` and consume the welcome envelope. Returns the socket
/// and the connection id the gateway assigned.
pub async fn connect_as(addr: SocketAddr, user_id: &str) -> (WsClient, String) {
    let mut ws = connect_raw(addr, &format!("userId={user_id}")).await;
    let welcome = recv_json(&mut ws).await;
    assert_eq!(welcome["type"], "system");
    assert_eq!(welcome["sender"], "system");
    let content = welcome["content"].as_str().expect("welcome content");
    let connection_id = content
        .strip_prefix("Connected with ID: ")
        .expect("welcome text")
        .to_string();
    (ws, connection_id)
}

pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("ws send");
}

pub async fn join(ws: &mut WsClient, room_id: &str) {
    send_json(ws, serde_json::json!({ "type": "join_room", "roomId": room_id })).await;
}

pub async fn leave(ws: &mut WsClient, room_id: &str) {
    send_json(ws, serde_json::json!({ "type": "leave_room", "roomId": room_id })).await;
}

/// Read the next text frame as JSON, failing after five seconds.
pub async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("parse envelope"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Assert that no text frame arrives within `ms` milliseconds.
pub async fn expect_silence(ws: &mut WsClient, ms: u64) {
    if let Ok(Some(Ok(Message::Text(text)))) =
        time::timeout(Duration::from_millis(ms), ws.next()).await
    {
        panic!("expected no frame, got {text}");
    }
}

/// Read until the server closes the socket and return the close code.
pub async fn recv_close_code(ws: &mut WsClient) -> u16 {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for close");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(Message::Close(None))) => return u16::from(CloseCode::Status),
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("ws error before close: {e}"),
            None => panic!("stream ended without close frame"),
        }
    }
}

/// Poll the registry until `room_id` has `expected` members, for at most two
/// seconds. Frames from a socket land asynchronously with respect to the test.
pub async fn wait_for_room_size(state: &AppState, room_id: &str, expected: usize) {
    for _ in 0..100 {
        let members = state
            .registry
            .list_by_room(room_id)
            .await
            .expect("list_by_room");
        if members.len() == expected {
            return;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    panic!("room {room_id} never reached {expected} members");
}

/// Poll the registry until `connection_id` has no record.
pub async fn wait_for_record_gone(state: &AppState, connection_id: &str) {
    for _ in 0..100 {
        if state
            .registry
            .get(connection_id)
            .await
            .expect("registry get")
            .is_none()
        {
            return;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    panic!("record for {connection_id} was never deleted");
}
