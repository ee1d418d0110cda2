//! WebSocket handler for real-time messaging.
//!
//! Authentication happens in-band: the socket upgrades for anyone, and the
//! first useful frame is `{"type":"auth","token":...}`. Only authenticated
//! sockets may post and only they receive `new_message` broadcasts.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use chat_shared::{
    decode_client_frame, strip_bearer, AuthenticatedPayload, ClientEnvelope, ServerEnvelope,
    ServerEvent, User,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::routes::messages::CONTENT_REQUIRED;
use crate::state::AppState;

pub const INVALID_TOKEN: &str = "Invalid token";
pub const USER_NOT_FOUND: &str = "User not found";
pub const NOT_AUTHENTICATED: &str = "Not authenticated";
pub const SAVE_FAILED: &str = "Failed to save message";
pub const AUTH_OK: &str = "Authentication successful";

/// WebSocket upgrade handler
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection state.
struct Connection {
    id: Uuid,
    user: Option<User>,
    outbound: mpsc::UnboundedSender<String>,
    forwarder: Option<JoinHandle<()>>,
}

impl Connection {
    fn push(&self, envelope: ServerEnvelope) {
        match envelope.to_json() {
            Ok(json) => {
                let _ = self.outbound.send(json);
            }
            Err(e) => tracing::error!(conn = %self.id, error = %e, "failed to encode frame"),
        }
    }

    fn push_error(&self, reason: &str) {
        self.push(ServerEnvelope::new(ServerEvent::Error(reason.to_string())));
    }

    /// Refuse a posted message, echoing the sender's nonce.
    fn refuse(&self, reason: &str, nonce: Option<String>) {
        self.push(ServerEnvelope::new(ServerEvent::Error(reason.to_string())).with_nonce(nonce));
    }

    /// Start relaying broadcasts to this socket. Runs once per connection.
    fn subscribe(&mut self, state: &AppState) {
        if self.forwarder.is_some() {
            return;
        }
        let mut events = state.events.subscribe();
        let outbound = self.outbound.clone();
        let conn = self.id;
        self.forwarder = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(json) => {
                        if outbound.send(json).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%conn, skipped, "socket fell behind the broadcast");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    let mut conn = Connection {
        id: Uuid::new_v4(),
        user: None,
        outbound,
        forwarder: None,
    };
    tracing::info!(conn = %conn.id, "socket connected");

    // Task to forward frames to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(json) = outbound_rx.recv().await {
            if sender.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Main receive loop
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => handle_frame(&mut conn, &state, text.as_str()).await,
            Ok(WsMessage::Close(_)) => break,
            Err(e) => {
                tracing::debug!(conn = %conn.id, error = %e, "socket read failed");
                break;
            }
            _ => {}
        }
    }

    // Cleanup
    if let Some(forwarder) = conn.forwarder.take() {
        forwarder.abort();
    }
    send_task.abort();
    tracing::info!(conn = %conn.id, user_id = conn.user.as_ref().map(|u| u.id), "socket closed");
}

async fn handle_frame(conn: &mut Connection, state: &AppState, text: &str) {
    let envelope = match decode_client_frame(text) {
        Ok(Some(envelope)) => envelope,
        Ok(None) => {
            tracing::debug!(conn = %conn.id, "ignoring frame of unknown type");
            return;
        }
        Err(e) => {
            tracing::debug!(conn = %conn.id, error = %e, "skipping malformed frame");
            return;
        }
    };

    match envelope {
        ClientEnvelope::Auth { token } => authenticate(conn, state, strip_bearer(&token)).await,
        ClientEnvelope::Message { content, nonce } => {
            post_message(conn, state, &content, nonce).await
        }
    }
}

async fn authenticate(conn: &mut Connection, state: &AppState, token: &str) {
    let claims = match state.tokens.verify(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::info!(conn = %conn.id, error = %e, "socket auth rejected");
            conn.push_error(INVALID_TOKEN);
            return;
        }
    };

    let Some(user) = state.store.find_user(claims.user_id).await else {
        tracing::info!(conn = %conn.id, user_id = claims.user_id, "socket auth for unknown user");
        conn.push_error(USER_NOT_FOUND);
        return;
    };

    conn.subscribe(state);
    conn.push(ServerEnvelope::new(ServerEvent::Authenticated(
        AuthenticatedPayload {
            user: user.to_ref(),
            message: Some(AUTH_OK.to_string()),
        },
    )));
    tracing::info!(conn = %conn.id, user_id = user.id, "socket authenticated");
    conn.user = Some(user);
}

async fn post_message(
    conn: &mut Connection,
    state: &AppState,
    content: &str,
    nonce: Option<String>,
) {
    let Some(user_id) = conn.user.as_ref().map(|u| u.id) else {
        conn.refuse(NOT_AUTHENTICATED, nonce);
        return;
    };

    let content = content.trim();
    if content.is_empty() {
        conn.refuse(CONTENT_REQUIRED, nonce);
        return;
    }

    match state.store.insert_message(user_id, content).await {
        Ok(message) => {
            tracing::debug!(conn = %conn.id, message_id = message.id, "message created over socket");
            let nonce = nonce.unwrap_or_else(|| Uuid::new_v4().to_string());
            state.broadcast_message(message, Some(nonce));
        }
        Err(e) => {
            tracing::error!(conn = %conn.id, error = %e, "failed to save message");
            conn.refuse(SAVE_FAILED, nonce);
        }
    }
}
