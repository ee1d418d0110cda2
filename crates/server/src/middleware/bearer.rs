//! Bearer token verification for the `/api/messages` routes.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use chat_shared::BEARER_PREFIX;

use crate::error::AppError;
use crate::state::AppState;

pub const MISSING_HEADER: &str = "Authorization header is required";
pub const BAD_FORMAT: &str = "Invalid authorization header format";
pub const INVALID_TOKEN: &str = "Invalid or expired token";

/// The user id carried by a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: u64,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(&parts.headers);
        async move {
            let token = token?;
            let claims = app_state.tokens.verify(&token).map_err(|e| {
                tracing::debug!(error = %e, "rejected bearer token");
                AppError::Unauthorized(INVALID_TOKEN.into())
            })?;
            Ok(AuthUser {
                user_id: claims.user_id,
            })
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized(MISSING_HEADER.into()))?;
    let value = value
        .to_str()
        .map_err(|_| AppError::Unauthorized(BAD_FORMAT.into()))?;
    match value.strip_prefix(BEARER_PREFIX) {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(AppError::Unauthorized(BAD_FORMAT.into())),
    }
}
