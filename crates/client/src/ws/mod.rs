//! Socket transport for real-time chat.
//!
//! This module provides:
//! - A single owned [`Transport`] per session, with idempotent `connect`
//! - The one-shot auth handshake after the channel opens
//! - Inbound dispatch to single-slot observers and to any number of
//!   [`TransportEvent`] subscribers
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────┐  connect(credential)  ┌──────────────────────────┐
//!   │ SessionGate  │ ────────────────────▶ │        Transport         │
//!   └──────────────┘                       │ state / user / observers │
//!          ▲                               └────────────┬─────────────┘
//!          │ on_message / on_auth / on_error            │ spawns
//!          │                                            ▼
//!          │                               ┌──────────────────────────┐
//!          └────────────────────────────── │  channel task (tokio)    │
//!                                          │  handshake, read, write  │
//!                                          └──────────────────────────┘
//! ```
//!
//! There is no automatic reconnect. A closed or failed channel stays closed
//! until the owner calls `connect` again.

mod connection;
mod transport;

pub use connection::{ConnectionState, TransportHandle};
pub use transport::{
    InboundError, InboundMessage, Transport, TransportConfig, TransportError, TransportEvent,
};
