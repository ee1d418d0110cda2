//! Application state shared across request handlers.

use std::sync::Arc;

use chat_shared::{Message, ServerEnvelope, ServerEvent};
use tokio::sync::broadcast;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::tokens::TokenManager;

const BROADCAST_CAPACITY: usize = 100;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub tokens: Arc<TokenManager>,
    /// Encoded `new_message` frames for every authenticated socket.
    pub events: broadcast::Sender<String>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            store: Arc::new(Store::new()),
            tokens: Arc::new(TokenManager::new(&config.jwt_secret, config.token_ttl)),
            events,
        }
    }

    /// Push a stored message to every authenticated socket.
    pub fn broadcast_message(&self, message: Message, nonce: Option<String>) {
        let envelope = ServerEnvelope::new(ServerEvent::NewMessage(message)).with_nonce(nonce);
        match envelope.to_json() {
            Ok(json) => {
                // Err only means nobody is listening.
                let receivers = self.events.send(json).unwrap_or(0);
                tracing::debug!(receivers, "broadcast new_message");
            }
            Err(e) => tracing::error!(error = %e, "failed to encode new_message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_shared::decode_server_frame;

    #[tokio::test]
    async fn broadcast_carries_nonce() {
        let state = AppState::new(&ServerConfig::default());
        let mut rx = state.events.subscribe();

        let alice = state.store.create_user("alice", "a@x.io", "h".into()).await.unwrap();
        let message = state.store.insert_message(alice.id, "hi").await.unwrap();
        state.broadcast_message(message.clone(), Some("n-1".into()));

        let frame = rx.recv().await.unwrap();
        let envelope = decode_server_frame(&frame).unwrap().unwrap();
        assert_eq!(envelope.event, ServerEvent::NewMessage(message));
        assert_eq!(envelope.nonce.as_deref(), Some("n-1"));
    }

    #[tokio::test]
    async fn broadcast_without_listeners_is_fine() {
        let state = AppState::new(&ServerConfig::default());
        let alice = state.store.create_user("alice", "a@x.io", "h".into()).await.unwrap();
        let message = state.store.insert_message(alice.id, "hi").await.unwrap();
        state.broadcast_message(message, None);
    }
}
