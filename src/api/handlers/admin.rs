//! Administrator endpoints: auth settings and user management.
//!
//! Only the configured admin username gets past [`require_admin`]; everyone else
//! sees 404. The OIDC client secret is write-only.

use super::{UserResponse, principal::require_admin};
use crate::{
    api::{
        error::{ApiError, ErrorResponse},
        state::AppState,
    },
    store::{AuthSettings, AuthSettingsUpdate, MergeSummary},
};
use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub enable_password_login: bool,
    pub enable_oidc_login: bool,
    pub enable_oidc_auto_provision: bool,
    pub oidc_username_claim: String,
    pub oidc_group_claim: String,
    pub oidc_required_groups: Vec<String>,
    pub oidc_issuer: Option<String>,
    pub oidc_client_id: Option<String>,
    pub oidc_client_secret_set: bool,
    /// Redirect URI to register with the provider.
    pub oidc_redirect_uri: String,
}

impl SettingsResponse {
    fn new(settings: AuthSettings, redirect_uri: &str) -> Self {
        Self {
            enable_password_login: settings.enable_password_login,
            enable_oidc_login: settings.enable_oidc_login,
            enable_oidc_auto_provision: settings.enable_oidc_auto_provision,
            oidc_username_claim: settings.oidc_username_claim,
            oidc_group_claim: settings.oidc_group_claim,
            oidc_required_groups: settings.oidc_required_groups,
            oidc_issuer: settings.oidc_issuer,
            oidc_client_id: settings.oidc_client_id,
            oidc_client_secret_set: settings.oidc_client_secret.is_some(),
            oidc_redirect_uri: redirect_uri.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    #[schema(value_type = String)]
    pub source_user_id: Uuid,
    #[schema(value_type = String)]
    pub target_user_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/api/admin/settings",
    responses(
        (status = 200, description = "Current settings; the client secret is never returned", body = SettingsResponse),
        (status = 404, description = "Not an administrator", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn get_settings(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<SettingsResponse>, ApiError> {
    require_admin(&headers, &state).await?;
    let settings = state.store.get_auth_settings().await?;
    Ok(Json(SettingsResponse::new(
        settings,
        state.oidc.redirect_uri(),
    )))
}

#[utoipa::path(
    put,
    path = "/api/admin/settings",
    request_body = AuthSettingsUpdate,
    responses(
        (status = 200, description = "Updated settings", body = SettingsResponse),
        (status = 400, description = "Invalid issuer URL", body = ErrorResponse),
        (status = 404, description = "Not an administrator", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn update_settings(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(update): Json<AuthSettingsUpdate>,
) -> Result<Json<SettingsResponse>, ApiError> {
    let admin = require_admin(&headers, &state).await?;
    if let Some(issuer) = update.oidc_issuer.as_deref().map(str::trim)
        && !issuer.is_empty()
        && Url::parse(issuer).is_err()
    {
        return Err(ApiError::bad_request("Invalid issuer URL"));
    }

    let previous = state.store.get_auth_settings().await?;
    let settings = state.store.update_auth_settings(&update).await?;
    if previous.oidc_issuer != settings.oidc_issuer
        && let Some(issuer) = previous.oidc_issuer.as_deref()
    {
        state.discovery.invalidate(issuer).await;
    }
    info!(admin = %admin.id, "auth settings updated");
    Ok(Json(SettingsResponse::new(
        settings,
        state.oidc.redirect_uri(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    responses(
        (status = 200, description = "All local accounts", body = [UserResponse]),
        (status = 404, description = "Not an administrator", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn list_users(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    require_admin(&headers, &state).await?;
    let users = state.store.list_users().await?;
    Ok(Json(
        users
            .iter()
            .map(|user| UserResponse::new(user, &state))
            .collect(),
    ))
}

async fn set_disabled(
    headers: &HeaderMap,
    state: &AppState,
    id: Uuid,
    disabled: bool,
) -> Result<StatusCode, ApiError> {
    let admin = require_admin(headers, state).await?;
    if disabled && admin.id == id {
        return Err(ApiError::bad_request("You cannot disable your own account"));
    }
    if state.store.update_user_status(id, disabled).await? {
        info!(admin = %admin.id, user = %id, disabled, "user status changed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("User not found"))
    }
}

#[utoipa::path(
    post,
    path = "/api/admin/users/{id}/disable",
    params(("id" = String, Path, description = "User id (UUID)")),
    responses(
        (status = 204, description = "User disabled; existing sessions stop resolving"),
        (status = 400, description = "Attempt to disable yourself", body = ErrorResponse),
        (status = 404, description = "Unknown user or not an administrator", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn disable_user(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    set_disabled(&headers, &state, id, true).await
}

#[utoipa::path(
    post,
    path = "/api/admin/users/{id}/enable",
    params(("id" = String, Path, description = "User id (UUID)")),
    responses(
        (status = 204, description = "User enabled"),
        (status = 404, description = "Unknown user or not an administrator", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn enable_user(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    set_disabled(&headers, &state, id, false).await
}

#[utoipa::path(
    delete,
    path = "/api/admin/users/{id}",
    params(("id" = String, Path, description = "User id (UUID)")),
    responses(
        (status = 204, description = "User and everything they own deleted"),
        (status = 400, description = "Attempt to delete yourself", body = ErrorResponse),
        (status = 404, description = "Unknown user or not an administrator", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn delete_user(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let admin = require_admin(&headers, &state).await?;
    if admin.id == id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }
    if state.store.delete_user(id).await? {
        info!(admin = %admin.id, user = %id, "user deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("User not found"))
    }
}

#[utoipa::path(
    post,
    path = "/api/admin/users/merge",
    request_body = MergeRequest,
    responses(
        (status = 200, description = "Clients and passkeys moved; source deleted", body = MergeSummary),
        (status = 400, description = "Source and target are the same user", body = ErrorResponse),
        (status = 404, description = "Unknown user or not an administrator", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn merge_users(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<MergeRequest>,
) -> Result<Json<MergeSummary>, ApiError> {
    let admin = require_admin(&headers, &state).await?;
    if request.source_user_id == request.target_user_id {
        return Err(ApiError::bad_request("Cannot merge a user into itself"));
    }
    if request.source_user_id == admin.id {
        return Err(ApiError::bad_request("You cannot merge away your own account"));
    }
    let summary = state
        .store
        .merge_users(request.source_user_id, request.target_user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    info!(
        admin = %admin.id,
        source = %request.source_user_id,
        target = %request.target_user_id,
        moved_clients = summary.moved_clients,
        moved_authenticators = summary.moved_authenticators,
        "users merged"
    );
    Ok(Json(summary))
}
