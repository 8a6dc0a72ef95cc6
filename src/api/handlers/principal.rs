//! Session resolution for protected handlers.
//!
//! The session token comes from `Authorization: Bearer` or the session cookie.
//! Admin routes answer 404 to everyone else so their existence is not advertised.

use crate::{
    api::{error::ApiError, state::AppState},
    session::cookie::extract_session_token,
    store::User,
};
use axum::http::HeaderMap;

/// The live user behind the request, or 401.
pub(crate) async fn require_user(headers: &HeaderMap, state: &AppState) -> Result<User, ApiError> {
    let token = extract_session_token(headers);
    state
        .sessions
        .get_session(token.as_deref())
        .await
        .ok_or_else(ApiError::unauthorized)
}

/// The configured administrator, or 404.
pub(crate) async fn require_admin(headers: &HeaderMap, state: &AppState) -> Result<User, ApiError> {
    match require_user(headers, state).await {
        Ok(user) if state.is_admin(&user) => Ok(user),
        _ => Err(ApiError::not_found("Not found")),
    }
}
