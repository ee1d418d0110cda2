//! HTTP API client with bearer authentication.
//!
//! Every request made through a client attached to an [`AuthSession`]
//! carries `Authorization: Bearer <token>`. Any 401 answer clears the
//! session before the error is returned, so callers only need to route
//! back to the login screen.

use chat_shared::{
    try_error_detail, ApiError, AuthResponse, CreateMessageRequest, LoginRequest, Message,
    RegisterRequest,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth_session::AuthSession;

/// HTTP client for the chat REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Option<AuthSession>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            session: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Attach the session whose credential authorizes requests.
    pub fn with_session(mut self, session: AuthSession) -> Self {
        self.session = Some(session);
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match self.session.as_ref().and_then(AuthSession::credential) {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    /// Make a GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let rb = self.authorize(self.client.get(self.url(path)));
        self.execute(rb).await
    }

    /// Make a POST request with JSON body
    pub async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let rb = self.authorize(self.client.post(self.url(path)).json(body));
        self.execute(rb).await
    }

    async fn execute<TRes: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<TRes, ApiError> {
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if status == StatusCode::UNAUTHORIZED {
            let detail =
                try_error_detail(&text).unwrap_or_else(|| "Session expired".to_string());
            if let Some(session) = &self.session {
                tracing::warn!(%detail, "request rejected as unauthorized; clearing session");
                session.logout();
            }
            return Err(ApiError::Unauthorized(detail));
        }

        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let text = if text.is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    // --- Auth ---

    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        self.post_json("/auth/register", request).await
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError> {
        self.post_json("/auth/login", request).await
    }

    // --- Messages ---

    /// Fetch the message history.
    pub async fn get_messages(&self) -> Result<Vec<Message>, ApiError> {
        // Some backends answer `null` for an empty history.
        let messages: Option<Vec<Message>> = self.get_json("/messages").await?;
        Ok(messages.unwrap_or_default())
    }

    /// Send a message over REST instead of the socket.
    pub async fn send_message(&self, content: &str) -> Result<Message, ApiError> {
        self.post_json(
            "/messages",
            &CreateMessageRequest {
                content: content.to_string(),
                nonce: None,
            },
        )
        .await
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}
