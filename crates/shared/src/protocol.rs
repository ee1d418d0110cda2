//! Socket envelope definitions.
//!
//! Every frame is a single JSON object discriminated by its `type` field.
//! Client frames carry their fields inline:
//!
//! ```json
//! {"type":"auth","token":"Bearer eyJ..."}
//! {"type":"message","content":"hello","nonce":"6f1c..."}
//! ```
//!
//! Server frames carry their payload under `data`, plus the sender's `nonce`
//! when the frame confirms or refuses a correlated send:
//!
//! ```json
//! {"type":"authenticated","data":{"user":{"id":1,"username":"alice"}}}
//! {"type":"new_message","data":{...},"nonce":"6f1c..."}
//! {"type":"error","data":"Invalid token"}
//! {"type":"error","data":"Not authenticated","nonce":"6f1c..."}
//! ```
//!
//! Decoding is forward-compatible: frames with an unrecognized `type` decode
//! to `None` rather than an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{Message, UserRef};

pub const TYPE_AUTH: &str = "auth";
pub const TYPE_MESSAGE: &str = "message";
pub const TYPE_AUTHENTICATED: &str = "authenticated";
pub const TYPE_NEW_MESSAGE: &str = "new_message";
pub const TYPE_ERROR: &str = "error";

/// Scheme prefix the client puts in front of its credential.
pub const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no `type` field")]
    MissingType,
    #[error("malformed `{kind}` frame: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Auth {
        token: String,
    },
    Message {
        content: String,
        /// Client-generated correlation id, echoed back on confirmation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nonce: Option<String>,
    },
}

impl ClientEnvelope {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Payload of an `authenticated` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthenticatedPayload {
    pub user: UserRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Authenticated(AuthenticatedPayload),
    NewMessage(Message),
    Error(String),
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Authenticated(_) => TYPE_AUTHENTICATED,
            ServerEvent::NewMessage(_) => TYPE_NEW_MESSAGE,
            ServerEvent::Error(_) => TYPE_ERROR,
        }
    }
}

/// A server frame: the event plus the correlation id it answers, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEnvelope {
    pub event: ServerEvent,
    pub nonce: Option<String>,
}

impl ServerEnvelope {
    pub fn new(event: ServerEvent) -> Self {
        Self { event, nonce: None }
    }

    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let data = match &self.event {
            ServerEvent::Authenticated(payload) => serde_json::to_value(payload)?,
            ServerEvent::NewMessage(message) => serde_json::to_value(message)?,
            ServerEvent::Error(reason) => Value::String(reason.clone()),
        };
        serde_json::to_string(&WireFrame {
            kind: self.event.kind(),
            data,
            nonce: self.nonce.as_deref(),
        })
    }
}

#[derive(Serialize)]
struct WireFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    nonce: Option<String>,
}

/// Decode a server frame. Unknown `type` values yield `Ok(None)`.
pub fn decode_server_frame(text: &str) -> Result<Option<ServerEnvelope>, ProtocolError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    let kind = raw.kind.ok_or(ProtocolError::MissingType)?;

    let payload_err = |source| ProtocolError::Payload {
        kind: kind.clone(),
        source,
    };

    let event = match kind.as_str() {
        TYPE_AUTHENTICATED => {
            ServerEvent::Authenticated(serde_json::from_value(raw.data).map_err(payload_err)?)
        }
        TYPE_NEW_MESSAGE => {
            ServerEvent::NewMessage(serde_json::from_value(raw.data).map_err(payload_err)?)
        }
        TYPE_ERROR => ServerEvent::Error(error_reason(raw.data)),
        _ => return Ok(None),
    };

    Ok(Some(ServerEnvelope {
        event,
        nonce: raw.nonce,
    }))
}

/// Decode a client frame. Unknown `type` values yield `Ok(None)`.
pub fn decode_client_frame(text: &str) -> Result<Option<ClientEnvelope>, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    if kind != TYPE_AUTH && kind != TYPE_MESSAGE {
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| ProtocolError::Payload { kind, source })
}

/// Strip an optional `Bearer ` prefix from a credential.
pub fn strip_bearer(token: &str) -> &str {
    token.strip_prefix(BEARER_PREFIX).unwrap_or(token)
}

// Servers in the wild send either a bare string or an object with a message.
fn error_reason(data: Value) -> String {
    match data {
        Value::String(reason) => reason,
        Value::Null => "Unknown error".to_string(),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(map).to_string()),
        other => other.to_string(),
    }
}
