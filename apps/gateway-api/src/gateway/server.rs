//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_common::PrefixedId;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::Credentials;
use crate::AppState;

use super::events::Envelope;
use super::handler::{handle_frame, FrameOutcome};
use super::record::ConnectionRecord;
use super::session::GatewaySession;

/// Normal closure, also used when the gateway shuts down.
pub const CLOSE_NORMAL: u16 = 1000;
/// Missing or rejected credentials, or a connection the registry no longer knows.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// The connection could not be registered.
pub const CLOSE_SERVER_ERROR: u16 = 1011;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub token: Option<String>,
    pub user_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let credentials = Credentials {
        token: params.token.or(bearer),
        user_id: params.user_id,
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state, credentials))
}

async fn handle_connection(socket: WebSocket, state: AppState, credentials: Credentials) {
    let (mut ws_tx, ws_rx) = socket.split();

    let identity = match state.verifier.verify(&credentials).await {
        Ok(identity) => identity,
        Err(err) => {
            tracing::debug!(%err, "gateway connection rejected");
            let _ = send_close(&mut ws_tx, CLOSE_POLICY_VIOLATION, &err.to_string()).await;
            return;
        }
    };

    let record = ConnectionRecord::new(ConnectionRecord::generate(), identity.user_id);
    let mut session = GatewaySession::new(record.connection_id.clone(), record.user_id.clone());

    if let Err(err) = state.registry.put(&record).await {
        tracing::error!(
            connection_id = %session.connection_id,
            user_id = %session.user_id,
            %err,
            "failed to register connection"
        );
        let _ = send_close(&mut ws_tx, CLOSE_SERVER_ERROR, "Failed to register connection").await;
        return;
    }

    let outbound_rx = state
        .sessions
        .register(&session.connection_id, &session.user_id);
    session.mark_open();

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        local_connections = state.sessions.len(),
        "gateway connection established"
    );

    let welcome = Envelope::connected(&session.connection_id).encode();
    if ws_tx.send(Message::Text(welcome.into())).await.is_ok() {
        run_session(&state, &session, ws_tx, ws_rx, outbound_rx).await;
    }

    close_connection(&state, &mut session).await;
}

/// Main connection loop: read client frames in order, forward queued envelopes.
async fn run_session(
    state: &AppState,
    session: &GatewaySession,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut outbound_rx: mpsc::Receiver<Arc<str>>,
) {
    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let bytes = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                };

                match handle_frame(state, session, &bytes).await {
                    FrameOutcome::Continue => {}
                    FrameOutcome::Reply(envelope) => {
                        if ws_tx.send(Message::Text(envelope.encode().into())).await.is_err() {
                            break;
                        }
                    }
                    FrameOutcome::Close { code, reason } => {
                        let _ = send_close(&mut ws_tx, code, reason).await;
                        break;
                    }
                }
            }

            queued = outbound_rx.recv() => {
                match queued {
                    Some(payload) => {
                        if ws_tx.send(Message::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Table entry drained: the gateway is shutting down.
                        let _ = send_close(&mut ws_tx, CLOSE_NORMAL, "Server shutting down").await;
                        break;
                    }
                }
            }
        }
    }
}

/// Remove every trace of a connection. Safe to reach more than once.
async fn close_connection(state: &AppState, session: &mut GatewaySession) {
    if !session.mark_closed() {
        return;
    }

    if let Err(err) = state.registry.delete(&session.connection_id).await {
        tracing::error!(
            connection_id = %session.connection_id,
            %err,
            "failed to delete connection record"
        );
    }
    state.sessions.unregister(&session.connection_id);

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        "gateway connection ended"
    );
}

/// Close every local connection and delete their registry records.
pub async fn shutdown(state: &AppState) {
    let drained = state.sessions.drain();
    tracing::info!(connections = drained.len(), "closing gateway connections");

    for connection_id in &drained {
        if let Err(err) = state.registry.delete(connection_id).await {
            tracing::warn!(%connection_id, %err, "failed to delete connection record on shutdown");
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
