//! Chat client
//!
//! The client side of the chat: a session that survives restarts, a REST
//! client, a single socket transport with a one-shot auth handshake, and
//! the reconciler that merges optimistic sends with server confirmations.

pub mod api_client;
pub mod auth_session;
pub mod config;
pub mod routes;
pub mod session_gate;
pub mod storage;
pub mod stores;
pub mod views;
pub mod ws;

pub use api_client::ApiClient;
pub use auth_session::AuthSession;
pub use config::ClientConfig;
pub use routes::Route;
pub use session_gate::{GateOutcome, SessionGate};
pub use storage::Storage;
pub use stores::Reconciler;
pub use views::{ChatView, ViewUpdate};
pub use ws::{ConnectionState, Transport, TransportConfig};
