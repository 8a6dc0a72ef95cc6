//! Grant execution against a stored client, plus token inspection helpers.
//!
//! Flow Overview (authorization code):
//! 1) `POST /api/clients/{id}/authorize` mints a random `state`, remembers which
//!    client it belongs to, and returns the provider URL.
//! 2) The provider redirects the browser to `GET /api/oauth/callback`.
//! 3) The callback resolves `state`, exchanges the code and redirects to the
//!    client page with the token set.

use super::{clients::load_client, found, principal::require_user, with_query};
use crate::{
    api::{
        error::{ApiError, ErrorResponse},
        state::AppState,
    },
    jwt::{DecodedToken, SignatureValidation, decode_token_for_display},
    simulator::{DisplayedToken, SimulatorError, TokenSet, display_tokens},
};
use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::HeaderMap,
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use url::form_urlencoded;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthorizeResponse {
    /// Provider authorization URL to open in the browser.
    pub url: String,
}

/// Raw token response plus the decoded view of each token.
#[derive(Debug, Serialize, ToSchema)]
pub struct SimulationResponse {
    #[schema(value_type = Object)]
    pub tokens: TokenSet,
    pub displayed: Vec<DisplayedToken>,
}

impl From<TokenSet> for SimulationResponse {
    fn from(tokens: TokenSet) -> Self {
        let displayed = display_tokens(&tokens);
        Self { tokens, displayed }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DecodeRequest {
    pub token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub token: String,
    pub jwks_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/clients/{id}/authorize",
    params(("id" = String, Path, description = "Client id (UUID)")),
    responses(
        (status = 200, description = "Authorization URL", body = AuthorizeResponse),
        (status = 400, description = "Client has an invalid authorize URL", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "Client not found", body = ErrorResponse),
    ),
    tag = "simulator"
)]
pub async fn authorize(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuthorizeResponse>, ApiError> {
    let user = require_user(&headers, &state).await?;
    let client = load_client(&state, user.id, id).await?;
    let url = state.simulator.begin_authorization(&client).await?;
    Ok(Json(AuthorizeResponse { url }))
}

fn callback_error(client_id: Option<Uuid>, message: &str) -> Response {
    let path = client_id.map_or_else(|| "/".to_string(), |id| format!("/client/{id}"));
    found(&with_query(&path, "error", message), HeaderMap::new())
}

#[utoipa::path(
    get,
    path = "/api/oauth/callback",
    params(
        ("code" = Option<String>, Query, description = "Authorization code"),
        ("state" = Option<String>, Query, description = "State minted by the authorize call"),
        ("error" = Option<String>, Query, description = "Error reported by the provider"),
    ),
    responses(
        (status = 302, description = "Redirect to the client page with tokens or an error")
    ),
    tag = "simulator"
)]
pub async fn oauth_callback(
    state: Extension<Arc<AppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Response {
    // Resolving the state consumes it, whatever happens next.
    let flow = match callback.state.as_deref() {
        Some(value) => state.simulator.pending().take(value).await,
        None => None,
    };
    let client_id = flow.map(|flow| flow.client_id);

    if let Some(err) = callback.error.as_deref() {
        warn!("provider returned an error to the simulator callback: {err}");
        return callback_error(client_id, err);
    }
    let (Some(code), Some(_)) = (callback.code.as_deref(), callback.state.as_deref()) else {
        return callback_error(client_id, "Missing code or state");
    };
    let Some(flow) = flow else {
        return callback_error(None, "Invalid or expired state");
    };

    let client = match state.store.get_client(flow.owner_id, flow.client_id).await {
        Ok(Some(client)) => client,
        Ok(None) => return callback_error(None, "Client not found"),
        Err(err) => {
            error!("Failed to load client for callback: {err:#}");
            return callback_error(client_id, "Internal server error");
        }
    };

    let tokens = match state.simulator.exchange_authorization_code(&client, code).await {
        Ok(tokens) => tokens,
        Err(SimulatorError::Internal(err)) => {
            error!("Token exchange failed: {err:#}");
            return callback_error(client_id, "Internal server error");
        }
        Err(err) => return callback_error(client_id, &err.to_string()),
    };

    match serde_json::to_string(&tokens) {
        Ok(json) => {
            let path = format!("/client/{}?success=true", client.id);
            let encoded: String = form_urlencoded::byte_serialize(json.as_bytes()).collect();
            found(&format!("{path}&tokens={encoded}"), HeaderMap::new())
        }
        Err(err) => {
            error!("Failed to serialize token set: {err}");
            callback_error(client_id, "Internal server error")
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/clients/{id}/client-credentials",
    params(("id" = String, Path, description = "Client id (UUID)")),
    responses(
        (status = 200, description = "Token response", body = SimulationResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "Client not found", body = ErrorResponse),
        (status = 502, description = "Token endpoint failure, verbatim", body = ErrorResponse),
    ),
    tag = "simulator"
)]
pub async fn client_credentials(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SimulationResponse>, ApiError> {
    let user = require_user(&headers, &state).await?;
    let client = load_client(&state, user.id, id).await?;
    let tokens = state.simulator.client_credentials_grant(&client).await?;
    Ok(Json(SimulationResponse::from(tokens)))
}

#[utoipa::path(
    post,
    path = "/api/clients/{id}/refresh",
    params(("id" = String, Path, description = "Client id (UUID)")),
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token response", body = SimulationResponse),
        (status = 400, description = "Missing refresh token", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "Client not found", body = ErrorResponse),
        (status = 502, description = "Token endpoint failure, verbatim", body = ErrorResponse),
    ),
    tag = "simulator"
)]
pub async fn refresh(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<SimulationResponse>, ApiError> {
    let user = require_user(&headers, &state).await?;
    let refresh_token = request.refresh_token.trim();
    if refresh_token.is_empty() {
        return Err(ApiError::bad_request("Refresh token is required"));
    }
    let client = load_client(&state, user.id, id).await?;
    let tokens = state
        .simulator
        .refresh_token_grant(&client, refresh_token)
        .await?;
    Ok(Json(SimulationResponse::from(tokens)))
}

#[utoipa::path(
    post,
    path = "/api/tokens/decode",
    request_body = DecodeRequest,
    responses(
        (status = 200, description = "Decoded header and payload", body = DecodedToken),
        (status = 400, description = "Not a JWT", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    ),
    tag = "simulator"
)]
pub async fn decode(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<DecodeRequest>,
) -> Result<Json<DecodedToken>, ApiError> {
    require_user(&headers, &state).await?;
    decode_token_for_display(request.token.trim())
        .map(Json)
        .ok_or_else(|| ApiError::bad_request("Invalid JWT format"))
}

#[utoipa::path(
    post,
    path = "/api/tokens/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Verification outcome; failures are reported in the body", body = SignatureValidation),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    ),
    tag = "simulator"
)]
pub async fn verify(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<SignatureValidation>, ApiError> {
    require_user(&headers, &state).await?;
    let outcome = state
        .jwks
        .verify_signature(request.token.trim(), request.jwks_url.trim())
        .await;
    Ok(Json(outcome))
}
