//! Message routes.

use axum::{extract::State, http::StatusCode, Json};
use chat_shared::{CreateMessageRequest, Message};

use crate::error::AppError;
use crate::middleware::bearer::AuthUser;
use crate::state::AppState;

pub const CONTENT_REQUIRED: &str = "Message content is required";

/// The whole history, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Json<Vec<Message>> {
    Json(state.store.list_messages().await)
}

/// Store a message and push it to every socket.
pub async fn create_message(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(AppError::BadRequest(CONTENT_REQUIRED.into()));
    }

    let message = state.store.insert_message(user.user_id, content).await?;
    tracing::debug!(message_id = message.id, user_id = user.user_id, "message created over REST");

    // Every broadcast carries a nonce; REST posts without one get a fresh id.
    let nonce = payload
        .nonce
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    state.broadcast_message(message.clone(), Some(nonce));

    Ok((StatusCode::CREATED, Json(message)))
}
