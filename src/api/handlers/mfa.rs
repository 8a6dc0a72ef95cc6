use super::principal::require_user;
use crate::{
    api::{
        error::{ApiError, ErrorResponse},
        state::AppState,
    },
    auth::TotpEnrollment,
};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmTotpRequest {
    /// Secret returned by the setup call.
    pub secret: String,
    pub code: String,
}

#[utoipa::path(
    post,
    path = "/api/mfa/totp/setup",
    responses(
        (status = 200, description = "Candidate secret and QR code; nothing is stored yet", body = TotpEnrollment),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    ),
    tag = "mfa"
)]
pub async fn setup(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<TotpEnrollment>, ApiError> {
    let user = require_user(&headers, &state).await?;
    Ok(Json(state.auth.generate_totp_secret(&user)?))
}

#[utoipa::path(
    post,
    path = "/api/mfa/totp/confirm",
    request_body = ConfirmTotpRequest,
    responses(
        (status = 204, description = "TOTP enabled"),
        (status = 400, description = "Code does not match the secret", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    ),
    tag = "mfa"
)]
pub async fn confirm(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<ConfirmTotpRequest>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&headers, &state).await?;
    if state
        .auth
        .confirm_totp_enrollment(user.id, &request.secret, &request.code)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::bad_request("Invalid MFA code"))
    }
}

#[utoipa::path(
    delete,
    path = "/api/mfa/totp",
    responses(
        (status = 204, description = "TOTP removed"),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    ),
    tag = "mfa"
)]
pub async fn disable(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&headers, &state).await?;
    state.auth.disable_totp(user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
