//! Client configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_HANDSHAKE_DELAY_MS: u64 = 100;

/// Where the client talks to and where it keeps its session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL for REST calls, including the `/api` prefix.
    pub api_url: String,
    /// Fixed socket endpoint.
    pub ws_url: String,
    /// Pause between the socket opening and the auth envelope going out.
    pub handshake_delay: Duration,
    /// Directory for durable client state. `None` uses the platform config dir.
    pub storage_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            handshake_delay: Duration::from_millis(DEFAULT_HANDSHAKE_DELAY_MS),
            storage_dir: None,
        }
    }
}

impl ClientConfig {
    /// Build configuration from the environment.
    ///
    /// Environment variables:
    /// - `CHAT_API_URL`: REST base URL (default: "http://localhost:8080/api")
    /// - `CHAT_WS_URL`: socket URL (default: "ws://localhost:8080/ws")
    /// - `CHAT_HANDSHAKE_DELAY_MS`: auth grace delay in ms (default: 100)
    /// - `CHAT_STORAGE_DIR`: directory for the stored credential
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let handshake_delay = lookup("CHAT_HANDSHAKE_DELAY_MS")
            .and_then(|raw| match raw.trim().parse::<u64>() {
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring invalid CHAT_HANDSHAKE_DELAY_MS");
                    None
                }
            })
            .unwrap_or(defaults.handshake_delay);

        Self {
            api_url: lookup("CHAT_API_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.api_url),
            ws_url: lookup("CHAT_WS_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.ws_url),
            handshake_delay,
            storage_dir: lookup("CHAT_STORAGE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }

    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }
}
