//! The owned socket transport, using tokio-tungstenite.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chat_shared::{decode_server_frame, ClientEnvelope, Message, ServerEvent, UserRef};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as Frame};
use url::Url;

use super::connection::{ConnectionState, Outbound, TransportHandle};
use crate::auth_session::redact;

/// Reason reported to the error observer for any channel-level failure.
pub const CONNECTION_ERROR: &str = "Connection error";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid socket url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("no async runtime available to drive the socket")]
    NoRuntime,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub handshake_delay: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake_delay: Duration::from_millis(crate::config::DEFAULT_HANDSHAKE_DELAY_MS),
        }
    }

    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }
}

impl From<&crate::config::ClientConfig> for TransportConfig {
    fn from(config: &crate::config::ClientConfig) -> Self {
        Self::new(config.ws_url.clone()).with_handshake_delay(config.handshake_delay)
    }
}

/// A confirmed message pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message: Message,
    /// Correlation id of the send this confirms, when the server echoes one.
    pub nonce: Option<String>,
}

/// An error reported to the error observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundError {
    pub reason: String,
    /// Correlation id of the send the server refused, when it echoes one.
    pub nonce: Option<String>,
}

impl InboundError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            nonce: None,
        }
    }

    /// True when the error answers one specific send.
    pub fn is_rejection(&self) -> bool {
        self.nonce.is_some()
    }
}

/// Everything a subscriber can observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    Authenticated(UserRef),
    Message(InboundMessage),
    Error(InboundError),
}

type MessageObserver = Arc<dyn Fn(InboundMessage) + Send + Sync>;
type AuthObserver = Arc<dyn Fn(UserRef) + Send + Sync>;
type ErrorObserver = Arc<dyn Fn(InboundError) + Send + Sync>;

#[derive(Default)]
struct Observers {
    message: Option<MessageObserver>,
    auth: Option<AuthObserver>,
    error: Option<ErrorObserver>,
}

struct ActiveChannel {
    handle: TransportHandle,
    task: JoinHandle<()>,
}

struct Shared {
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    channel: Mutex<Option<ActiveChannel>>,
    current_user: Mutex<Option<UserRef>>,
    observers: Mutex<Observers>,
    subscribers: Mutex<Vec<UnboundedSender<TransportEvent>>>,
    next_channel_id: AtomicU64,
}

/// A single-channel socket client.
///
/// Cloning yields another reference to the same transport.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                state,
                channel: Mutex::new(None),
                current_user: Mutex::new(None),
                observers: Mutex::new(Observers::default()),
                subscribers: Mutex::new(Vec::new()),
                next_channel_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open the channel, or return the existing one if it is open or opening.
    ///
    /// Returns immediately; the socket is opened in a background task and
    /// the auth envelope goes out once it is open. Must be called from
    /// within a tokio runtime.
    pub fn connect(&self, credential: &str) -> Result<TransportHandle, TransportError> {
        let mut channel = lock(&self.shared.channel);

        if let Some(active) = channel.as_ref() {
            if !active.task.is_finished() && self.state().is_live() {
                tracing::debug!(channel = active.handle.channel_id(), "socket already connected");
                return Ok(active.handle.clone());
            }
        }

        let url = parse_ws_url(&self.shared.config.url)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let channel_id = self.shared.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = unbounded();
        let handle = TransportHandle::new(sender, self.shared.state.subscribe(), channel_id);

        tracing::info!(
            channel = channel_id,
            url = %url,
            token = %redact(credential),
            "opening socket"
        );
        self.shared.set_state(ConnectionState::Connecting);

        let task = runtime.spawn(run_channel(
            self.shared.clone(),
            channel_id,
            url,
            credential.to_string(),
            receiver,
        ));

        *channel = Some(ActiveChannel {
            handle: handle.clone(),
            task,
        });
        Ok(handle)
    }

    /// Send a chat message on the current channel. `false` if none is open.
    pub fn send(&self, content: &str) -> bool {
        match self.handle() {
            Some(handle) => handle.send(content),
            None => {
                tracing::error!("send attempted while not connected");
                false
            }
        }
    }

    /// Close the channel and forget the session-scoped state.
    ///
    /// Safe to call when already disconnected.
    pub fn disconnect(&self) {
        let active = lock(&self.shared.channel).take();
        if let Some(active) = active {
            tracing::info!(channel = active.handle.channel_id(), "disconnecting");
            active.handle.close();
        }
        *lock(&self.shared.current_user) = None;
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Handle for the current channel, if one exists.
    pub fn handle(&self) -> Option<TransportHandle> {
        lock(&self.shared.channel)
            .as_ref()
            .map(|active| active.handle.clone())
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// The user confirmed by the last `authenticated` frame on this channel.
    pub fn current_user(&self) -> Option<UserRef> {
        lock(&self.shared.current_user).clone()
    }

    /// Register the message observer, replacing any previous one.
    pub fn on_message(&self, callback: impl Fn(InboundMessage) + Send + Sync + 'static) {
        lock(&self.shared.observers).message = Some(Arc::new(callback));
    }

    /// Register the auth observer, replacing any previous one.
    pub fn on_auth(&self, callback: impl Fn(UserRef) + Send + Sync + 'static) {
        lock(&self.shared.observers).auth = Some(Arc::new(callback));
    }

    /// Register the error observer, replacing any previous one.
    pub fn on_error(&self, callback: impl Fn(InboundError) + Send + Sync + 'static) {
        lock(&self.shared.observers).error = Some(Arc::new(callback));
    }

    /// Drop all three observers.
    pub fn detach_observers(&self) {
        *lock(&self.shared.observers) = Observers::default();
    }

    /// Stream of every event, independent of the single-slot observers.
    ///
    /// The stream ends when the receiver is dropped; nothing needs to be
    /// unregistered.
    pub fn subscribe(&self) -> UnboundedReceiver<TransportEvent> {
        let (tx, rx) = unbounded();
        lock(&self.shared.subscribers).push(tx);
        rx
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("url", &self.shared.config.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::debug!(state = ?state, "connection state changed");
            self.publish(TransportEvent::StateChanged(state));
        }
    }

    fn is_current(&self, channel_id: u64) -> bool {
        lock(&self.channel)
            .as_ref()
            .is_some_and(|active| active.handle.channel_id() == channel_id)
    }

    fn publish(&self, event: TransportEvent) {
        lock(&self.subscribers).retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }

    fn dispatch(&self, channel_id: u64, text: &str) {
        if !self.is_current(channel_id) {
            tracing::debug!(channel = channel_id, "dropping frame from a stale channel");
            return;
        }
        let envelope = match decode_server_frame(text) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                tracing::trace!(channel = channel_id, "ignoring frame of unknown type");
                return;
            }
            Err(e) => {
                tracing::error!(channel = channel_id, error = %e, "failed to parse frame");
                return;
            }
        };

        match envelope.event {
            ServerEvent::Authenticated(payload) => {
                tracing::info!(channel = channel_id, user = %payload.user.username, "authenticated");
                *lock(&self.current_user) = Some(payload.user.clone());
                self.set_state(ConnectionState::Authenticated);
                self.publish(TransportEvent::Authenticated(payload.user.clone()));
                let observer = lock(&self.observers).auth.clone();
                if let Some(observer) = observer {
                    observer(payload.user);
                }
            }
            ServerEvent::NewMessage(message) => {
                tracing::debug!(channel = channel_id, id = message.id, "new message");
                let inbound = InboundMessage {
                    message,
                    nonce: envelope.nonce,
                };
                self.publish(TransportEvent::Message(inbound.clone()));
                let observer = lock(&self.observers).message.clone();
                if let Some(observer) = observer {
                    observer(inbound);
                }
            }
            ServerEvent::Error(reason) => {
                tracing::error!(channel = channel_id, %reason, nonce = ?envelope.nonce, "server reported an error");
                self.report_error(InboundError {
                    reason,
                    nonce: envelope.nonce,
                });
            }
        }
    }

    fn report_error(&self, error: InboundError) {
        self.publish(TransportEvent::Error(error.clone()));
        let observer = lock(&self.observers).error.clone();
        if let Some(observer) = observer {
            observer(error);
        }
    }

    /// The channel failed: report it and leave the transport closed.
    fn fail(&self, channel_id: u64) {
        if !self.is_current(channel_id) {
            return;
        }
        *lock(&self.channel) = None;
        *lock(&self.current_user) = None;
        self.set_state(ConnectionState::Errored);
        self.report_error(InboundError::new(CONNECTION_ERROR));
    }

    /// The channel closed normally.
    fn closed(&self, channel_id: u64) {
        if !self.is_current(channel_id) {
            return;
        }
        *lock(&self.channel) = None;
        *lock(&self.current_user) = None;
        self.set_state(ConnectionState::Disconnected);
    }
}

enum Exit {
    Closed,
    Failed,
}

/// Drive one channel: open, handshake, then pump frames both ways.
async fn run_channel(
    shared: Arc<Shared>,
    channel_id: u64,
    url: Url,
    credential: String,
    mut outbound: UnboundedReceiver<Outbound>,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::error!(channel = channel_id, url = %url, error = %e, "failed to open socket");
            shared.fail(channel_id);
            return;
        }
    };

    // disconnect() may have run while we were still opening
    if !shared.is_current(channel_id) {
        tracing::debug!(channel = channel_id, "socket opened after disconnect; closing");
        let mut stream = stream;
        let _ = stream.close(None).await;
        return;
    }

    tracing::info!(channel = channel_id, "socket connected");
    shared.set_state(ConnectionState::Connected);

    let (mut write, mut read) = stream.split();

    let handshake = tokio::time::sleep(shared.config.handshake_delay);
    tokio::pin!(handshake);
    let mut handshake_sent = false;

    let exit = loop {
        tokio::select! {
            _ = &mut handshake, if !handshake_sent => {
                handshake_sent = true;
                let auth = ClientEnvelope::Auth { token: credential.clone() };
                match auth.to_json() {
                    Ok(json) => {
                        if let Err(e) = write.send(Frame::Text(json.into())).await {
                            tracing::error!(channel = channel_id, error = %e, "failed to send auth envelope");
                            break Exit::Failed;
                        }
                        tracing::info!(channel = channel_id, "auth envelope sent");
                    }
                    Err(e) => tracing::error!(channel = channel_id, error = %e, "failed to encode auth envelope"),
                }
            }
            outgoing = outbound.next() => match outgoing {
                Some(Outbound::Frame(envelope)) => match envelope.to_json() {
                    Ok(json) => {
                        if let Err(e) = write.send(Frame::Text(json.into())).await {
                            tracing::error!(channel = channel_id, error = %e, "send failed");
                            break Exit::Failed;
                        }
                    }
                    Err(e) => tracing::error!(channel = channel_id, error = %e, "serialize failed"),
                },
                Some(Outbound::Close) | None => {
                    let _ = write.send(Frame::Close(None)).await;
                    break Exit::Closed;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Frame::Text(text))) => shared.dispatch(channel_id, text.as_str()),
                Some(Ok(Frame::Close(frame))) => {
                    tracing::info!(channel = channel_id, ?frame, "server closed the socket");
                    break Exit::Closed;
                }
                Some(Ok(Frame::Ping(_))) => {
                    // Pong is handled automatically by tungstenite
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(channel = channel_id, error = %e, "socket read error");
                    break Exit::Failed;
                }
                None => break Exit::Closed,
            },
        }
    };

    match exit {
        Exit::Closed => {
            tracing::info!(channel = channel_id, "socket closed");
            shared.closed(channel_id);
        }
        Exit::Failed => shared.fail(channel_id),
    }
}

fn parse_ws_url(raw: &str) -> Result<Url, TransportError> {
    let url = Url::parse(raw).map_err(|e| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(TransportError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme `{other}`"),
        }),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn transport() -> Transport {
        Transport::new(TransportConfig::new("ws://127.0.0.1:9/ws"))
    }

    /// Make `channel_id` the current channel without opening a socket.
    fn install_channel(t: &Transport, channel_id: u64) -> UnboundedReceiver<Outbound> {
        let (sender, receiver) = unbounded();
        let handle = TransportHandle::new(sender, t.shared.state.subscribe(), channel_id);
        *lock(&t.shared.channel) = Some(ActiveChannel {
            handle,
            task: tokio::spawn(async {}),
        });
        receiver
    }

    #[test]
    fn rejects_non_socket_urls() {
        assert!(parse_ws_url("http://localhost/ws").is_err());
        assert!(parse_ws_url("not a url").is_err());
        assert!(parse_ws_url("wss://chat.example.com/ws").is_ok());
    }

    #[test]
    fn connect_outside_runtime_fails_cleanly() {
        let result = transport().connect("token");
        assert!(matches!(result, Err(TransportError::NoRuntime)));
    }

    #[test]
    fn send_without_channel_returns_false() {
        assert!(!transport().send("hello"));
    }

    #[test]
    fn disconnect_when_idle_is_a_noop() {
        let t = transport();
        t.disconnect();
        t.disconnect();
        assert_eq!(t.state(), ConnectionState::Disconnected);
        assert!(t.current_user().is_none());
    }

    #[tokio::test]
    async fn observers_are_single_slot() {
        let t = transport();
        let _outbound = install_channel(&t, 1);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = first.clone();
        t.on_error(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = second.clone();
        t.on_error(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        t.shared.dispatch(1, r#"{"type":"error","data":"Invalid token"}"#);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        t.detach_observers();
        t.shared.dispatch(1, r#"{"type":"error","data":"Invalid token"}"#);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_routes_by_type() {
        let t = transport();
        let _outbound = install_channel(&t, 1);
        let mut events = t.subscribe();

        t.shared.dispatch(
            1,
            r#"{"type":"authenticated","data":{"user":{"id":1,"username":"alice"}}}"#,
        );
        t.shared.dispatch(1, r#"{"type":"ping"}"#);
        t.shared.dispatch(1, "{{{");
        t.shared.dispatch(
            1,
            r#"{"type":"new_message","data":{"id":2,"content":"yo","user_id":1,"user":{"id":1,"username":"alice"},"created_at":"2024-05-01T10:00:00Z"},"nonce":"n-1"}"#,
        );

        assert_eq!(t.current_user().map(|u| u.username), Some("alice".to_string()));

        let mut seen = Vec::new();
        while let Ok(Some(event)) = events.try_next() {
            seen.push(event);
        }
        assert!(matches!(
            seen[0],
            TransportEvent::StateChanged(ConnectionState::Authenticated)
        ));
        assert!(matches!(seen[1], TransportEvent::Authenticated(_)));
        match &seen[2] {
            TransportEvent::Message(inbound) => {
                assert_eq!(inbound.message.id, 2);
                assert_eq!(inbound.nonce.as_deref(), Some("n-1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn refused_send_carries_its_nonce() {
        let t = transport();
        let _outbound = install_channel(&t, 1);
        let mut events = t.subscribe();

        t.shared.dispatch(
            1,
            r#"{"type":"error","data":"Not authenticated","nonce":"n-4"}"#,
        );
        t.shared.dispatch(1, r#"{"type":"error","data":"Invalid token"}"#);

        let mut errors = Vec::new();
        while let Ok(Some(TransportEvent::Error(error))) = events.try_next() {
            errors.push(error);
        }
        assert_eq!(errors.len(), 2);
        assert!(errors[0].is_rejection());
        assert_eq!(errors[0].nonce.as_deref(), Some("n-4"));
        assert_eq!(errors[1], InboundError::new("Invalid token"));
    }

    #[tokio::test]
    async fn frames_from_a_stale_channel_are_dropped() {
        let t = transport();
        let _outbound = install_channel(&t, 1);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        t.on_message(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let h = hits.clone();
        t.on_auth(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        t.disconnect();
        let authenticated =
            r#"{"type":"authenticated","data":{"user":{"id":9,"username":"ghost"}}}"#;
        let new_message = r#"{"type":"new_message","data":{"id":2,"content":"boo","user_id":9,"user":{"id":9,"username":"ghost"},"created_at":"2024-05-01T10:00:00Z"}}"#;
        t.shared.dispatch(1, authenticated);
        t.shared.dispatch(1, new_message);
        assert_eq!(t.state(), ConnectionState::Disconnected);
        assert!(t.current_user().is_none());

        // a newer channel does not accept frames addressed to an older one
        let _outbound = install_channel(&t, 2);
        t.shared.dispatch(1, authenticated);
        t.shared.dispatch(1, new_message);
        assert!(t.current_user().is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        t.shared.dispatch(2, authenticated);
        assert_eq!(t.state(), ConnectionState::Authenticated);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let t = transport();
        let _outbound = install_channel(&t, 1);
        let rx = t.subscribe();
        drop(rx);
        t.shared.dispatch(1, r#"{"type":"error","data":"x"}"#);
        assert!(lock(&t.shared.subscribers).is_empty());
    }
}
