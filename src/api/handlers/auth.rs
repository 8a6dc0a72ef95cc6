//! Password registration, login (with the optional TOTP step), session and logout.

use super::{UserResponse, principal::require_user, session_headers};
use crate::{
    api::{
        error::{ApiError, ErrorResponse},
        state::AppState,
    },
    auth::LoginOutcome,
    session::cookie::{SESSION_COOKIE_NAME, clear_cookie},
};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MfaLoginRequest {
    pub username: String,
    /// Ticket returned by the password step.
    pub ticket: String,
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub success: bool,
    pub user: UserResponse,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub mfa_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_ticket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserResponse>,
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created and logged in", body = AuthResponse),
        (status = 400, description = "Missing fields or passwords do not match", body = ErrorResponse),
        (status = 409, description = "Username already taken", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn register(
    state: Extension<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .auth
        .register(&request.username, &request.password, &request.confirm_password)
        .await?;
    let headers = session_headers(&state, &session)?;
    let body = AuthResponse {
        success: true,
        user: UserResponse::new(&session.user, &state),
    };
    Ok((StatusCode::CREATED, headers, Json(body)))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in, or a TOTP code is required", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Account or password login disabled", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn login(
    state: Extension<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    match state.auth.login(&request.username, &request.password).await? {
        LoginOutcome::Authenticated(session) => {
            let headers = session_headers(&state, &session)?;
            let body = LoginResponse {
                success: true,
                mfa_required: false,
                mfa_ticket: None,
                user: Some(UserResponse::new(&session.user, &state)),
            };
            Ok((headers, Json(body)))
        }
        LoginOutcome::MfaRequired { ticket } => {
            let body = LoginResponse {
                success: false,
                mfa_required: true,
                mfa_ticket: Some(ticket),
                user: None,
            };
            Ok((HeaderMap::new(), Json(body)))
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/login/mfa",
    request_body = MfaLoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid code or expired ticket", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn login_mfa(
    state: Extension<Arc<AppState>>,
    Json(request): Json<MfaLoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .auth
        .login_with_mfa(&request.username, &request.ticket, &request.code)
        .await?;
    let headers = session_headers(&state, &session)?;
    let body = AuthResponse {
        success: true,
        user: UserResponse::new(&session.user, &state),
    };
    Ok((headers, Json(body)))
}

#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "Session is active", body = UserResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    match require_user(&headers, &state).await {
        Ok(user) => (StatusCode::OK, Json(UserResponse::new(&user, &state))).into_response(),
        Err(_) => StatusCode::NO_CONTENT.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 204, description = "Session cookie cleared")
    ),
    tag = "auth"
)]
pub async fn logout(state: Extension<Arc<AppState>>) -> impl IntoResponse {
    // Sessions are stateless; clearing the cookie is all there is to do.
    let mut headers = HeaderMap::new();
    match clear_cookie(SESSION_COOKIE_NAME, state.secure_cookies()) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build logout cookie: {err}"),
    }
    (StatusCode::NO_CONTENT, headers)
}

#[utoipa::path(
    post,
    path = "/api/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "New passwords do not match", body = ErrorResponse),
        (status = 401, description = "Not authenticated or wrong current password", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&headers, &state).await?;
    state
        .auth
        .change_password(
            user.id,
            &request.current_password,
            &request.new_password,
            &request.confirm_password,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

