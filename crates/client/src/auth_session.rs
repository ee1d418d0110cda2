//! Authentication session management with durable persistence.
//!
//! The session is nothing more than the credential issued at login or
//! register. Its presence is the only thing that decides whether the chat
//! view is reachable. Clones share one session, so a 401 seen by any
//! [`ApiClient`] logs every holder out at once.

use std::sync::{Arc, Mutex};

use chat_shared::{ApiError, AuthResponse, LoginRequest, RegisterRequest};

use crate::api_client::ApiClient;
use crate::config::ClientConfig;
use crate::storage::Storage;

const STORAGE_KEY: &str = "token";

#[derive(Debug, Clone)]
pub struct AuthSession {
    storage: Storage,
    api_url: String,
    token: Arc<Mutex<Option<String>>>,
}

impl AuthSession {
    /// Restore the session persisted in `storage`, if any.
    pub fn restore(config: &ClientConfig, storage: Storage) -> Self {
        let token = storage
            .load::<String>(STORAGE_KEY)
            .filter(|t| !t.trim().is_empty());
        if token.is_some() {
            tracing::debug!("restored stored session");
        }
        Self {
            storage,
            api_url: config.api_url.clone(),
            token: Arc::new(Mutex::new(token)),
        }
    }

    /// Check if user is authenticated
    pub fn is_authenticated(&self) -> bool {
        self.lock().is_some()
    }

    /// The current credential, if any.
    pub fn credential(&self) -> Option<String> {
        self.lock().clone()
    }

    /// Store a freshly issued credential.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        if let Err(e) = self.storage.save(STORAGE_KEY, &token) {
            // The session still works for this process; it just won't survive a restart.
            tracing::warn!(error = %e, "failed to persist session");
        }
        *self.lock() = Some(token);
    }

    /// Logout and clear session
    pub fn logout(&self) {
        self.storage.remove(STORAGE_KEY);
        if self.lock().take().is_some() {
            tracing::info!("session cleared");
        }
    }

    /// Create an API client configured for the current session
    pub fn client(&self) -> ApiClient {
        ApiClient::new()
            .with_base_url(self.api_url.clone())
            .with_session(self.clone())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let response = self
            .client()
            .login(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.set_token(response.token.clone());
        Ok(response)
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ApiError> {
        let response = self
            .client()
            .register(&RegisterRequest {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.set_token(response.token.clone());
        Ok(response)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Short, log-safe prefix of a credential.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(12).collect();
    format!("{prefix}...")
}
