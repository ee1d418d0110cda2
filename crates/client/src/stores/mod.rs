//! Client-side state stores.

pub mod messages;

pub use messages::{
    is_placeholder_id, local_author, DeliveryState, DisplayMessage, OutboundSink, PendingTicket,
    Reconciled, Reconciler, SendError, PLACEHOLDER_ID_FLOOR,
};
