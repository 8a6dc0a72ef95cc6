//! CRUD for the session user's simulated OAuth clients. A client owned by
//! someone else is indistinguishable from a missing one.

use super::principal::require_user;
use crate::{
    api::{
        error::{ApiError, ErrorResponse},
        state::AppState,
    },
    store::{ClientDraft, OAuthClient},
};
use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientResponse {
    pub id: String,
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub end_session_url: Option<String>,
    pub jwks_url: Option<String>,
    pub redirect_uri: String,
    pub scope: Option<String>,
    #[schema(value_type = Object)]
    pub custom_attributes: IndexMap<String, String>,
    pub created_at: i64,
}

impl From<OAuthClient> for ClientResponse {
    fn from(client: OAuthClient) -> Self {
        Self {
            id: client.id.to_string(),
            name: client.name,
            client_id: client.client_id,
            client_secret: client.client_secret,
            authorize_url: client.authorize_url,
            token_url: client.token_url,
            end_session_url: client.end_session_url,
            jwks_url: client.jwks_url,
            redirect_uri: client.redirect_uri,
            scope: client.scope,
            custom_attributes: client.custom_attributes,
            created_at: client.created_at,
        }
    }
}

/// The client `id` owned by `owner_id`, or 404.
pub(crate) async fn load_client(
    state: &AppState,
    owner_id: Uuid,
    id: Uuid,
) -> Result<OAuthClient, ApiError> {
    state
        .store
        .get_client(owner_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Client not found"))
}

#[utoipa::path(
    get,
    path = "/api/clients",
    responses(
        (status = 200, description = "Clients owned by the session user", body = [ClientResponse]),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    ),
    tag = "clients"
)]
pub async fn list(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<Vec<ClientResponse>>, ApiError> {
    let user = require_user(&headers, &state).await?;
    let clients = state.store.list_clients(user.id).await?;
    Ok(Json(clients.into_iter().map(ClientResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/clients",
    request_body = ClientDraft,
    responses(
        (status = 201, description = "Client created", body = ClientResponse),
        (status = 400, description = "Missing field or relative URL", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    ),
    tag = "clients"
)]
pub async fn create(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(draft): Json<ClientDraft>,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&headers, &state).await?;
    let draft = draft.validate()?;
    let client = state.store.create_client(user.id, &draft).await?;
    info!(client = %client.id, owner = %user.id, "client created");
    Ok((StatusCode::CREATED, Json(ClientResponse::from(client))))
}

#[utoipa::path(
    get,
    path = "/api/clients/{id}",
    params(("id" = String, Path, description = "Client id (UUID)")),
    responses(
        (status = 200, description = "Client", body = ClientResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "Client not found", body = ErrorResponse),
    ),
    tag = "clients"
)]
pub async fn get(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClientResponse>, ApiError> {
    let user = require_user(&headers, &state).await?;
    let client = load_client(&state, user.id, id).await?;
    Ok(Json(ClientResponse::from(client)))
}

#[utoipa::path(
    put,
    path = "/api/clients/{id}",
    params(("id" = String, Path, description = "Client id (UUID)")),
    request_body = ClientDraft,
    responses(
        (status = 200, description = "Client updated", body = ClientResponse),
        (status = 400, description = "Missing field or relative URL", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "Client not found", body = ErrorResponse),
    ),
    tag = "clients"
)]
pub async fn update(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(draft): Json<ClientDraft>,
) -> Result<Json<ClientResponse>, ApiError> {
    let user = require_user(&headers, &state).await?;
    let draft = draft.validate()?;
    let client = state
        .store
        .update_client(user.id, id, &draft)
        .await?
        .ok_or_else(|| ApiError::not_found("Client not found"))?;
    Ok(Json(ClientResponse::from(client)))
}

#[utoipa::path(
    delete,
    path = "/api/clients/{id}",
    params(("id" = String, Path, description = "Client id (UUID)")),
    responses(
        (status = 204, description = "Client deleted"),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "Client not found", body = ErrorResponse),
    ),
    tag = "clients"
)]
pub async fn delete(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&headers, &state).await?;
    if state.store.delete_client(user.id, id).await? {
        info!(client = %id, owner = %user.id, "client deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Client not found"))
    }
}
