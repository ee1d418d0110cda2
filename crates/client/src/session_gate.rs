//! The gate in front of the chat view.
//!
//! Every entry attempt checks for a credential. Without one the caller is
//! sent to login. With one, the gate fetches history, wires the transport to
//! a fresh [`ChatView`] and opens the socket. The view is built before any
//! of that starts, so every way out of `enter` (including an early return
//! or a dropped future) runs its teardown.

use crate::auth_session::AuthSession;
use crate::routes::Route;
use crate::views::chat_view::{ChatView, CONNECT_FAILED};
use crate::ws::Transport;

#[derive(Debug)]
pub enum GateOutcome {
    /// No usable session; show this screen instead.
    Redirect(Route),
    /// The chat view, possibly carrying an initialization error banner.
    Entered(ChatView),
}

/// Sole owner of the session's transport.
#[derive(Debug, Clone)]
pub struct SessionGate {
    session: AuthSession,
    transport: Transport,
}

impl SessionGate {
    pub fn new(session: AuthSession, transport: Transport) -> Self {
        Self { session, transport }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Try to enter the chat view.
    ///
    /// Initialization failures other than a rejected credential do not
    /// redirect; they come back as a view with its error banner set, and the
    /// user retries by entering again.
    pub async fn enter(&self) -> GateOutcome {
        let Some(credential) = self.session.credential() else {
            tracing::info!("no session; redirecting to login");
            return GateOutcome::Redirect(Route::Login);
        };

        let mut view = ChatView::new(self.session.clone(), self.transport.clone());

        tracing::debug!("fetching message history");
        match self.session.client().get_messages().await {
            Ok(history) => view.load_history(history),
            Err(e) if e.is_unauthorized() => {
                tracing::warn!(error = %e, "credential rejected while entering chat");
                return GateOutcome::Redirect(Route::Login);
            }
            Err(e) => {
                tracing::error!(error = %e, "chat initialization failed");
                view.set_error(e.user_message());
                return GateOutcome::Entered(view);
            }
        }

        if let Err(e) = view.attach(&credential) {
            tracing::error!(error = %e, "chat initialization failed");
            view.set_error(CONNECT_FAILED);
        }

        GateOutcome::Entered(view)
    }
}
