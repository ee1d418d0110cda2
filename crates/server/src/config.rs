//! Server configuration from environment variables.

use std::net::SocketAddr;

use axum::http::{header, HeaderValue, Method};
use rand::RngCore;
use tower_http::cors::{Any, CorsLayer};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    /// `*` allows any origin.
    pub allowed_origin: String,
}

impl ServerConfig {
    /// Read the configuration.
    ///
    /// Environment variables:
    /// - `CHAT_BIND_ADDR` (default: "0.0.0.0:8080")
    /// - `CHAT_JWT_SECRET` (default: random per process, so tokens die with it)
    /// - `CHAT_TOKEN_TTL_HOURS` (default: 24)
    /// - `CHAT_ALLOWED_ORIGIN` (default: "http://localhost:3000")
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let bind_addr = lookup("CHAT_BIND_ADDR")
            .and_then(|raw| match raw.parse() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "ignoring invalid CHAT_BIND_ADDR");
                    None
                }
            })
            .unwrap_or_else(default_bind_addr);

        let jwt_secret = lookup("CHAT_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                tracing::warn!("CHAT_JWT_SECRET not set; tokens will not survive a restart");
                random_secret()
            });

        let token_ttl = lookup("CHAT_TOKEN_TTL_HOURS")
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|hours| *hours > 0)
            .unwrap_or(DEFAULT_TOKEN_TTL_HOURS);

        let allowed_origin =
            lookup("CHAT_ALLOWED_ORIGIN").unwrap_or_else(|| DEFAULT_ALLOWED_ORIGIN.to_string());

        Self {
            bind_addr,
            jwt_secret,
            token_ttl: chrono::Duration::hours(token_ttl),
            allowed_origin,
        }
    }

    pub fn cors(&self) -> CorsLayer {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::AUTHORIZATION]);

        if self.allowed_origin == "*" {
            return cors.allow_origin(Any);
        }
        match HeaderValue::from_str(&self.allowed_origin) {
            Ok(origin) => cors.allow_origin(origin).allow_credentials(true),
            Err(_) => {
                tracing::warn!(origin = %self.allowed_origin, "invalid allowed origin; cross-origin requests disabled");
                cors
            }
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
