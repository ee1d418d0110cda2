//! The chat view: the display list, the error banner and the live socket.
//!
//! A `ChatView` is only ever created by the session gate. It owns the
//! reconciler outright; socket events reach it through a queue and are
//! applied one at a time by whoever drives [`ChatView::next_update`].
//! Dropping the view tears the socket down.

use chat_shared::{ApiError, Message, UserRef, BEARER_PREFIX};
use chrono::{DateTime, Local, Utc};
use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::StreamExt;

use crate::auth_session::AuthSession;
use crate::routes::Route;
use crate::stores::{DisplayMessage, PendingTicket, Reconciled, Reconciler, SendError};
use crate::ws::{ConnectionState, InboundError, InboundMessage, Transport, TransportError};

pub const CONNECT_FAILED: &str = "Failed to connect to WebSocket";
pub const SEND_FAILED: &str = "Failed to send message";

#[derive(Debug)]
enum ViewEvent {
    Authenticated(UserRef),
    Message(InboundMessage),
    Error(InboundError),
}

/// What changed after one event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    Authenticated(UserRef),
    MessageAppended(Message),
    DuplicateIgnored(u64),
    Error(String),
    /// The view was already torn down.
    Ignored,
}

pub struct ChatView {
    session: AuthSession,
    transport: Transport,
    reconciler: Reconciler,
    events: UnboundedReceiver<ViewEvent>,
    error: Option<String>,
    /// Set by a connection or auth error; cleared by authentication.
    errored: bool,
    user: Option<UserRef>,
    torn_down: bool,
}

impl ChatView {
    pub(crate) fn new(session: AuthSession, transport: Transport) -> Self {
        // No observers yet: the queue reports closed until `attach` runs.
        let (_, events) = unbounded();
        Self {
            session,
            transport,
            reconciler: Reconciler::default(),
            events,
            error: None,
            errored: false,
            user: None,
            torn_down: false,
        }
    }

    pub(crate) fn load_history(&mut self, history: Vec<Message>) {
        self.reconciler.load_history(history);
    }

    pub(crate) fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    /// Register observers feeding this view, then open the socket.
    pub(crate) fn attach(&mut self, credential: &str) -> Result<(), TransportError> {
        let (tx, rx) = unbounded();
        self.events = rx;

        let on_auth = tx.clone();
        self.transport.on_auth(move |user| {
            let _ = on_auth.unbounded_send(ViewEvent::Authenticated(user));
        });
        let on_message = tx.clone();
        self.transport.on_message(move |inbound| {
            let _ = on_message.unbounded_send(ViewEvent::Message(inbound));
        });
        self.transport.on_error(move |error| {
            let _ = tx.unbounded_send(ViewEvent::Error(error));
        });

        let credential = if credential.starts_with(BEARER_PREFIX) {
            credential.to_string()
        } else {
            format!("{BEARER_PREFIX}{credential}")
        };
        self.transport.connect(&credential).map(|_| ())
    }

    /// Wait for the next socket event and apply it.
    ///
    /// Returns `None` once no further events can arrive.
    pub async fn next_update(&mut self) -> Option<ViewUpdate> {
        let event = self.events.next().await?;
        Some(self.apply(event))
    }

    /// Apply every event that has already arrived, without waiting.
    pub fn drain_updates(&mut self) -> Vec<ViewUpdate> {
        let mut updates = Vec::new();
        while let Ok(Some(event)) = self.events.try_next() {
            updates.push(self.apply(event));
        }
        updates
    }

    fn apply(&mut self, event: ViewEvent) -> ViewUpdate {
        if self.torn_down {
            return ViewUpdate::Ignored;
        }
        match event {
            ViewEvent::Authenticated(user) => {
                tracing::info!(user = %user.username, "chat session authenticated");
                self.user = Some(user.clone());
                self.errored = false;
                ViewUpdate::Authenticated(user)
            }
            ViewEvent::Message(inbound) => {
                let id = inbound.message.id;
                match self
                    .reconciler
                    .receive_confirmed(inbound.message.clone(), inbound.nonce.as_deref())
                {
                    Reconciled::Appended { .. } => ViewUpdate::MessageAppended(inbound.message),
                    Reconciled::Duplicate => ViewUpdate::DuplicateIgnored(id),
                }
            }
            ViewEvent::Error(InboundError { reason, nonce }) => {
                // A refusal names its send; any other error strands them all.
                let retracted = match nonce.as_deref() {
                    Some(nonce) => self.reconciler.retract_pending(nonce),
                    None => {
                        self.errored = true;
                        self.reconciler.retract_all_pending()
                    }
                };
                if retracted > 0 {
                    tracing::warn!(retracted, %reason, "pending sends failed");
                }
                self.error = Some(reason.clone());
                ViewUpdate::Error(reason)
            }
        }
    }

    /// Send over the socket, showing the message immediately.
    pub fn send(&mut self, content: &str) -> Result<PendingTicket, SendError> {
        let result = match self.transport.handle() {
            Some(handle) if !self.torn_down => self.reconciler.submit_outbound(content, &handle),
            _ => {
                tracing::error!("send attempted without a socket");
                Err(SendError::NotSent)
            }
        };
        match &result {
            Ok(_) => self.error = None,
            Err(SendError::NotSent) => self.error = Some(SEND_FAILED.to_string()),
            Err(SendError::Empty) => {}
        }
        result
    }

    /// Send through the REST endpoint instead of the socket.
    pub async fn send_via_rest(&mut self, content: &str) -> Result<Message, ApiError> {
        let content = content.trim();
        match self.session.client().send_message(content).await {
            Ok(message) => {
                if !self.torn_down {
                    self.reconciler.append_confirmed(message.clone());
                    self.error = None;
                }
                Ok(message)
            }
            Err(e) => {
                if !self.torn_down {
                    self.error = Some(e.user_message());
                }
                Err(e)
            }
        }
    }

    /// End the session and leave the view.
    pub fn logout(mut self) -> Route {
        self.teardown();
        self.session.logout();
        Route::Login
    }

    /// Detach observers and close the socket. Idempotent; also runs on drop.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.transport.detach_observers();
        self.transport.disconnect();
        self.events.close();
        tracing::debug!("chat view torn down");
    }

    pub fn entries(&self) -> &[DisplayMessage] {
        self.reconciler.entries()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Banner text, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    /// Transport state, or `Errored` after a connection or auth error.
    pub fn status(&self) -> ConnectionState {
        if self.errored {
            ConnectionState::Errored
        } else {
            self.transport.state()
        }
    }

    pub fn status_text(&self) -> &'static str {
        self.status().label()
    }

    /// The user the socket authenticated as.
    pub fn user(&self) -> Option<&UserRef> {
        self.user.as_ref()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl Drop for ChatView {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for ChatView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatView")
            .field("entries", &self.reconciler.len())
            .field("error", &self.error)
            .field("status", &self.status())
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

/// Timestamp as shown next to a message.
pub fn format_timestamp(entry: &DisplayMessage) -> String {
    if entry.is_pending() || entry.message.created_at.timestamp() <= 0 {
        return "Just now".to_string();
    }
    local_time(entry.message.created_at)
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%m/%d %H:%M").to_string()
}
