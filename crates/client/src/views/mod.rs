//! Views of the client.

pub mod chat_view;

pub use chat_view::{format_timestamp, ChatView, ViewUpdate};
