//! WebSocket gateway for real-time message relay
//!
//! Protocol:
//! - Client → Server: JSON events tagged by `event` (currently `sendMessage`)
//! - Server → Client: `receiveMessage` with the persisted message, or
//!   `errorMessage` when handling fails
//!
//! Handshake: the JWT travels in the `Authorization` header (native clients)
//! or the `token` query parameter (browser clients, which cannot set headers
//! on WebSocket upgrades). A connection with a missing or invalid token is
//! upgraded and then immediately closed with an application close code, so
//! the client sees the rejection reason instead of a bare failed upgrade.

use super::handlers::RelayState;
use crate::auth::jwt::{decode_jwt, Claims};
use crate::protocol::{ClientEvent, ServerEvent};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

/// Application close code for rejected handshakes (4000-4999 range is
/// reserved for application use).
pub const AUTH_REJECT_CODE: u16 = 4401;

/// Close reason when no token was presented at all
pub const MISSING_TOKEN: &str = "Authentication token missing";

/// Close reason when a token was presented but failed validation
pub const AUTH_FAILED: &str = "Authentication failed";

/// Query parameters for the relay WebSocket
#[derive(Debug, Deserialize, Default)]
pub struct WsQuery {
    /// JWT, for clients that cannot set the Authorization header
    #[serde(default)]
    pub token: Option<String>,
}

/// Validate the handshake credentials before entering the relay loop.
///
/// Token sources, in priority order:
/// 1. `Authorization` header (with or without a `Bearer ` prefix)
/// 2. `token` query parameter
fn authenticate_handshake(
    headers: &HeaderMap,
    query: &WsQuery,
    state: &RelayState,
) -> Result<Claims, &'static str> {
    let raw = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.token.clone())
        .ok_or(MISSING_TOKEN)?;

    let token = raw.strip_prefix("Bearer ").unwrap_or(&raw);
    if token.is_empty() {
        return Err(MISSING_TOKEN);
    }

    // Deny-by-default when auth is not configured
    let auth_config = state.auth_config.as_ref().ok_or(AUTH_FAILED)?;

    decode_jwt(token, &auth_config.jwt_secret).map_err(|_| AUTH_FAILED)
}

/// WebSocket upgrade handler for `/ws`
pub async fn ws_relay(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    match authenticate_handshake(&headers, &query, &state) {
        Ok(claims) => {
            ws.on_upgrade(move |socket| handle_relay(socket, state, claims))
        }
        Err(reason) => {
            debug!(reason, "WS relay: handshake rejected");
            ws.on_upgrade(move |socket| reject(socket, reason))
        }
    }
}

/// Close an unauthenticated connection with the rejection reason.
async fn reject(mut socket: WebSocket, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: AUTH_REJECT_CODE,
            reason: reason.into(),
        })))
        .await;
}

/// Main relay loop for an authenticated connection.
///
/// Each inbound `sendMessage` is persisted and echoed back to the
/// originating connection as `receiveMessage`. Persistence failures are
/// reported as `errorMessage` without dropping the connection.
async fn handle_relay(socket: WebSocket, state: RelayState, claims: Claims) {
    info!(user_id = claims.id, "WS relay: client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Ping interval (30s) to detect dead clients
    let mut ping_interval = interval(Duration::from_secs(30));
    ping_interval.tick().await; // skip first immediate tick

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if ws_sender.send(Message::Ping(vec![].into())).await.is_err() {
                    debug!(user_id = claims.id, "WS relay: ping failed, client gone");
                    break;
                }
            }

            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let event = match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(user_id = claims.id, error = %e, "WS relay: unparseable event");
                                let reply = ServerEvent::ErrorMessage {
                                    error: "Invalid message format".to_string(),
                                };
                                if send_event(&mut ws_sender, &reply).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };

                        let reply = handle_event(&state, &claims, event).await;
                        if send_event(&mut ws_sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Keepalive response, nothing to do
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(user_id = claims.id, "WS relay: client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ignore binary and client-initiated pings
                    }
                    Some(Err(e)) => {
                        warn!(user_id = claims.id, error = %e, "WS relay: socket error");
                        break;
                    }
                }
            }
        }
    }
}

/// Process one client event and build the reply for the originating socket.
async fn handle_event(state: &RelayState, claims: &Claims, event: ClientEvent) -> ServerEvent {
    match event {
        ClientEvent::SendMessage { content, sender } => {
            // The authenticated identity wins over whatever the payload claims
            let sender = if sender == claims.id {
                sender
            } else {
                debug!(
                    claimed = sender,
                    authenticated = claims.id,
                    "WS relay: overriding payload sender with token identity"
                );
                claims.id
            };

            match state.store.create_message(&content, sender).await {
                Ok(message) => ServerEvent::ReceiveMessage { message },
                Err(e) => {
                    warn!(user_id = claims.id, error = %e, "WS relay: failed to persist message");
                    ServerEvent::ErrorMessage {
                        error: "Failed to save message".to_string(),
                    }
                }
            }
        }
    }
}

async fn send_event<S>(sender: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = serde_json::to_string(event).map_err(|_| ())?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

// ============================================================================
// Tests
// ============================================================================
