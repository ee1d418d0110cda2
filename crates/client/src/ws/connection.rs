//! Connection state and the send handle.

use chat_shared::ClientEnvelope;
use futures_channel::mpsc::UnboundedSender;
use tokio::sync::watch;

/// Connection state for the chat socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Open; the auth envelope may or may not have been answered yet.
    Connected,
    Authenticated,
    Errored,
}

impl ConnectionState {
    /// True while frames can be written.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Authenticated
        )
    }

    /// Open or about to be.
    pub fn is_live(&self) -> bool {
        self.is_open() || matches!(self, ConnectionState::Connecting)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Authenticated => "Connected & Authenticated",
            ConnectionState::Errored => "Error",
        }
    }
}

pub(crate) enum Outbound {
    Frame(ClientEnvelope),
    Close,
}

/// Handle for sending frames through one open channel.
///
/// A handle belongs to the channel it was issued for. Once that channel
/// closes, every send through it reports failure.
#[derive(Clone)]
pub struct TransportHandle {
    sender: UnboundedSender<Outbound>,
    state: watch::Receiver<ConnectionState>,
    channel_id: u64,
}

impl TransportHandle {
    pub(crate) fn new(
        sender: UnboundedSender<Outbound>,
        state: watch::Receiver<ConnectionState>,
        channel_id: u64,
    ) -> Self {
        Self {
            sender,
            state,
            channel_id,
        }
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Send a chat message. Returns `false` if the channel is not open.
    pub fn send(&self, content: &str) -> bool {
        self.send_envelope(ClientEnvelope::Message {
            content: content.to_string(),
            nonce: None,
        })
    }

    /// Send a chat message tagged with a correlation id.
    pub fn send_correlated(&self, content: &str, nonce: &str) -> bool {
        self.send_envelope(ClientEnvelope::Message {
            content: content.to_string(),
            nonce: Some(nonce.to_string()),
        })
    }

    fn send_envelope(&self, envelope: ClientEnvelope) -> bool {
        if self.sender.is_closed() || !self.state().is_open() {
            tracing::error!(channel = self.channel_id, "send attempted while not connected");
            return false;
        }
        match self.sender.unbounded_send(Outbound::Frame(envelope)) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(channel = self.channel_id, error = %e, "failed to queue frame");
                false
            }
        }
    }

    pub(crate) fn close(&self) {
        // The task may already be gone; nothing to do then.
        let _ = self.sender.unbounded_send(Outbound::Close);
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("channel_id", &self.channel_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_channel::mpsc::unbounded;
    use futures_util::StreamExt;

    #[test]
    fn open_states() {
        assert!(ConnectionState::Connected.is_open());
        assert!(ConnectionState::Authenticated.is_open());
        assert!(!ConnectionState::Connecting.is_open());
        assert!(ConnectionState::Connecting.is_live());
        assert!(!ConnectionState::Errored.is_live());
        assert!(!ConnectionState::Disconnected.is_live());
    }

    #[tokio::test]
    async fn send_requires_open_channel() {
        let (tx, mut rx) = unbounded();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let handle = TransportHandle::new(tx, state_rx, 1);

        assert!(!handle.send("too early"));

        state_tx.send_replace(ConnectionState::Connected);
        assert!(handle.send_correlated("hi", "n-1"));

        match rx.next().await {
            Some(Outbound::Frame(ClientEnvelope::Message { content, nonce })) => {
                assert_eq!(content, "hi");
                assert_eq!(nonce.as_deref(), Some("n-1"));
            }
            _ => panic!("expected a message frame"),
        }
    }

    #[test]
    fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = unbounded();
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Authenticated);
        let handle = TransportHandle::new(tx, state_rx, 1);
        drop(rx);
        assert!(!handle.send("hi"));
    }
}
