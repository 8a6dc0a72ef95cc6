//! Passkey enrollment for the session user and passwordless login.
//!
//! Flow Overview:
//! 1) `*/options` stores the ceremony state on the user record and returns
//!    `{ "publicKey": ... }` options.
//! 2) The browser runs `navigator.credentials.create()` or `.get()`.
//! 3) `*/verify` consumes the ceremony state and checks the response.

use super::{UserResponse, auth::AuthResponse, principal::require_user, session_headers};
use crate::{
    api::{
        error::{ApiError, ErrorResponse},
        state::AppState,
    },
    store::{Authenticator, DeviceType},
    webauthn::CeremonyOutcome,
};
use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;
use webauthn_rs::prelude::{
    CreationChallengeResponse, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse,
};

/// Options for `navigator.credentials.create()`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = Object)]
pub struct CreationOptions(pub CreationChallengeResponse);

/// Options for `navigator.credentials.get()`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = Object)]
pub struct RequestOptions(pub RequestChallengeResponse);

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyResponse {
    pub credential_id: String,
    pub device_type: DeviceType,
    pub backed_up: bool,
    pub transports: Vec<String>,
    pub counter: u32,
    pub created_at: i64,
}

impl From<Authenticator> for PasskeyResponse {
    fn from(authenticator: Authenticator) -> Self {
        Self {
            credential_id: authenticator.credential_id,
            device_type: authenticator.device_type,
            backed_up: authenticator.backed_up,
            transports: authenticator.transports,
            counter: authenticator.counter,
            created_at: authenticator.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginOptionsRequest {
    pub username: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginVerifyRequest {
    pub username: String,
    pub response: serde_json::Value,
}

/// The browser's `PublicKeyCredential` as JSON.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct RegisterVerifyRequest(pub serde_json::Value);

fn webauthn_response<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|err| ApiError::bad_request(format!("Invalid WebAuthn response: {err}")))
}

#[utoipa::path(
    post,
    path = "/api/passkeys/register/options",
    responses(
        (status = 200, description = "Creation options", body = CreationOptions),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    ),
    tag = "passkeys"
)]
pub async fn register_options(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<CreationOptions>, ApiError> {
    let user = require_user(&headers, &state).await?;
    Ok(Json(CreationOptions(
        state.passkeys.begin_registration(user.id).await?,
    )))
}

#[utoipa::path(
    post,
    path = "/api/passkeys/register/verify",
    request_body = RegisterVerifyRequest,
    responses(
        (status = 201, description = "Passkey registered", body = PasskeyResponse),
        (status = 400, description = "No ceremony in progress or verification failed", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    ),
    tag = "passkeys"
)]
pub async fn register_verify(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(RegisterVerifyRequest(body)): Json<RegisterVerifyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&headers, &state).await?;
    let response: RegisterPublicKeyCredential = webauthn_response(body)?;
    match state.passkeys.finish_registration(user.id, &response).await? {
        CeremonyOutcome::Verified(authenticator) => Ok((
            StatusCode::CREATED,
            Json(PasskeyResponse::from(authenticator)),
        )),
        CeremonyOutcome::Rejected(err) => Err(err.into()),
    }
}

#[utoipa::path(
    get,
    path = "/api/passkeys",
    responses(
        (status = 200, description = "Registered passkeys", body = [PasskeyResponse]),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    ),
    tag = "passkeys"
)]
pub async fn list(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<Vec<PasskeyResponse>>, ApiError> {
    let user = require_user(&headers, &state).await?;
    let passkeys = state.passkeys.list_passkeys(user.id).await?;
    Ok(Json(passkeys.into_iter().map(PasskeyResponse::from).collect()))
}

#[utoipa::path(
    delete,
    path = "/api/passkeys/{credential_id}",
    params(("credential_id" = String, Path, description = "Base64url credential id")),
    responses(
        (status = 204, description = "Passkey deleted"),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "No such passkey for this user", body = ErrorResponse),
    ),
    tag = "passkeys"
)]
pub async fn delete(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(credential_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&headers, &state).await?;
    if state.passkeys.delete_passkey(user.id, &credential_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Passkey not found"))
    }
}

#[utoipa::path(
    post,
    path = "/api/passkeys/login/options",
    request_body = LoginOptionsRequest,
    responses(
        (status = 200, description = "Request options", body = RequestOptions),
        (status = 400, description = "No passkeys registered", body = ErrorResponse),
        (status = 404, description = "Unknown user", body = ErrorResponse),
    ),
    tag = "passkeys"
)]
pub async fn login_options(
    state: Extension<Arc<AppState>>,
    Json(request): Json<LoginOptionsRequest>,
) -> Result<Json<RequestOptions>, ApiError> {
    Ok(Json(RequestOptions(
        state.passkeys.begin_authentication(&request.username).await?,
    )))
}

#[utoipa::path(
    post,
    path = "/api/passkeys/login/verify",
    request_body = LoginVerifyRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 400, description = "No ceremony in progress or malformed response", body = ErrorResponse),
        (status = 401, description = "Verification failed", body = ErrorResponse),
    ),
    tag = "passkeys"
)]
pub async fn login_verify(
    state: Extension<Arc<AppState>>,
    Json(request): Json<LoginVerifyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response: PublicKeyCredential = webauthn_response(request.response)?;
    let outcome = state
        .passkeys
        .finish_authentication(&request.username, &response)
        .await?;
    match outcome {
        CeremonyOutcome::Verified(session) => {
            let headers = session_headers(&state, &session)?;
            let body = AuthResponse {
                success: true,
                user: UserResponse::new(&session.user, &state),
            };
            Ok((headers, Json(body)))
        }
        CeremonyOutcome::Rejected(err) => {
            debug!(username = %request.username, "passkey login rejected: {err}");
            Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                "Passkey verification failed",
            ))
        }
    }
}
