pub mod admin;
pub mod auth;
pub mod clients;
pub mod endpoint;
pub mod health;
pub mod mfa;
pub mod oidc;
pub mod passkeys;
pub(crate) mod principal;
pub mod simulator;

use super::{error::ApiError, state::AppState};
use crate::{
    session::{
        Session,
        cookie::{SESSION_COOKIE_NAME, build_cookie},
    },
    store::User,
};
use axum::{
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{LOCATION, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;
use url::form_urlencoded;
use utoipa::ToSchema;

/// Public view of a local account.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub mfa_enabled: bool,
    pub disabled: bool,
    pub is_admin: bool,
    pub created_at: i64,
}

impl UserResponse {
    pub(crate) fn new(user: &User, state: &AppState) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username.clone(),
            email: user.email.clone(),
            mfa_enabled: user.mfa_enabled(),
            disabled: user.disabled,
            is_admin: state.is_admin(user),
            created_at: user.created_at,
        }
    }
}

/// `Set-Cookie` value carrying `session`.
pub(crate) fn session_cookie(state: &AppState, session: &Session) -> Result<HeaderValue, ApiError> {
    build_cookie(
        SESSION_COOKIE_NAME,
        &session.token,
        state.sessions.ttl_seconds(),
        state.secure_cookies(),
    )
    .map_err(|err| {
        ApiError::internal("Failed to build session cookie", &anyhow::Error::from(err))
    })
}

/// Headers that set the session cookie for `session`.
pub(crate) fn session_headers(state: &AppState, session: &Session) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, session_cookie(state, session)?);
    Ok(headers)
}

/// A 302 to `location`, keeping any headers already collected (cookies).
pub(crate) fn found(location: &str, mut headers: HeaderMap) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            headers.insert(LOCATION, value);
            (StatusCode::FOUND, headers).into_response()
        }
        Err(err) => {
            error!("Invalid redirect location {location}: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `path?key=value` with `value` form-encoded.
pub(crate) fn with_query(path: &str, key: &str, value: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
    format!("{path}?{key}={encoded}")
}
