//! Authentication routes (register, login).

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{extract::State, http::StatusCode, Json};
use chat_shared::{AuthResponse, LoginRequest, RegisterRequest};

use crate::error::AppError;
use crate::state::AppState;

pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Register a new user account
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    tracing::info!(username = %payload.username, "registering user");

    payload.validate().map_err(AppError::BadRequest)?;

    // Hash password
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let password_hash = Argon2::default()
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("hashing error: {e}")))?
        .to_string();

    let user = state
        .store
        .create_user(payload.username.trim(), payload.email.trim(), password_hash)
        .await?;
    let token = state.tokens.issue(user.id)?;

    tracing::info!(user_id = user.id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: Some(user),
        }),
    ))
}

/// Login to an existing account
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let record = state
        .store
        .find_user_by_email(payload.email.trim())
        .await
        .ok_or_else(|| AppError::Unauthorized(INVALID_CREDENTIALS.into()))?;

    // Verify password
    let parsed_hash = PasswordHash::new(&record.password_hash)
        .map_err(|e| AppError::Internal(format!("invalid hash: {e}")))?;
    Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::Unauthorized(INVALID_CREDENTIALS.into()))?;

    let token = state.tokens.issue(record.id)?;

    tracing::info!(user_id = record.id, "user logged in");
    Ok(Json(AuthResponse {
        token,
        user: Some(record.to_user()),
    }))
}
