//! A protected resource for exercising access tokens minted by a provider.
//!
//! The bearer token is decoded, rejected if expired, and its signature checked
//! against the JWKS advertised by the `iss` claim's discovery document. The
//! request is then echoed back.

use crate::{
    api::state::AppState,
    jwt::{self, SignatureValidation, decode_claims_unverified},
    session::cookie::extract_bearer_token,
    unix_now,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Query},
    http::{
        HeaderMap, Method, StatusCode,
        header::{AUTHORIZATION, COOKIE},
    },
    response::{IntoResponse, Response},
};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

/// Outcome of the signature check, as shown to the caller.
#[derive(Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct EndpointSignature {
    pub validated: bool,
    pub message: String,
}

impl EndpointSignature {
    fn skipped() -> Self {
        Self {
            validated: false,
            message: "Signature validation skipped".to_string(),
        }
    }

    fn from_validation(validation: &SignatureValidation) -> Self {
        if validation.valid {
            return Self {
                validated: true,
                message: "Signature verified successfully".to_string(),
            };
        }
        let error = validation.error.clone().unwrap_or_default();
        let message = if error == jwt::Error::UnknownKid.to_string() {
            "No matching key found in JWKS".to_string()
        } else {
            format!("Signature validation failed: {error}")
        };
        Self {
            validated: false,
            message,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: i64,
    pub method: String,
    #[schema(value_type = Object)]
    pub token_claims: Value,
    pub signature_validation: EndpointSignature,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub received_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub query_parameters: Option<IndexMap<String, String>>,
    #[schema(value_type = Object)]
    pub received_headers: IndexMap<String, String>,
}

fn unauthorized(body: Value) -> Response {
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Request headers minus credentials. Repeated headers are joined with `, `.
fn echoed_headers(headers: &HeaderMap) -> IndexMap<String, String> {
    let mut echoed: IndexMap<String, String> = IndexMap::new();
    for (name, value) in headers {
        if name == AUTHORIZATION || name == COOKIE {
            continue;
        }
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        echoed
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    echoed
}

async fn check_signature(state: &AppState, token: &str, claims: &Value) -> EndpointSignature {
    let Some(issuer) = claims.get("iss").and_then(Value::as_str) else {
        return EndpointSignature::skipped();
    };
    match state.discovery.discover(issuer).await {
        Ok(metadata) => {
            let validation = state.jwks.verify_signature(token, &metadata.jwks_uri).await;
            EndpointSignature::from_validation(&validation)
        }
        Err(err) => {
            debug!(issuer = %issuer, "discovery for endpoint token failed: {err}");
            EndpointSignature {
                validated: false,
                message: format!("Signature validation failed: {err}"),
            }
        }
    }
}

async fn handle(
    method: Method,
    headers: &HeaderMap,
    state: &AppState,
    received_payload: Option<Value>,
    query_parameters: Option<IndexMap<String, String>>,
) -> Response {
    let Some(token) = extract_bearer_token(headers) else {
        return unauthorized(json!({
            "success": false,
            "error": "Missing or invalid Authorization header",
            "message": "Expected: Authorization: Bearer <token>",
        }));
    };
    let Ok(claims) = decode_claims_unverified(&token) else {
        return unauthorized(json!({
            "success": false,
            "error": "Invalid JWT format",
            "message": "Token could not be decoded",
        }));
    };
    if let Some(exp) = claims.get("exp").and_then(Value::as_i64)
        && exp < unix_now()
    {
        return unauthorized(json!({
            "success": false,
            "error": "Token expired",
            "message": "The provided token has expired",
            "tokenClaims": claims,
        }));
    }

    let signature_validation = check_signature(state, &token, &claims).await;
    let body = EndpointResponse {
        success: true,
        message: "Request received and token validated".to_string(),
        timestamp: unix_now(),
        method: method.to_string(),
        token_claims: claims,
        signature_validation,
        received_payload,
        query_parameters,
        received_headers: echoed_headers(headers),
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[utoipa::path(
    get,
    path = "/api/endpoint",
    responses(
        (status = 200, description = "Token accepted; request echoed", body = EndpointResponse),
        (status = 401, description = "Missing, malformed or expired bearer token"),
    ),
    tag = "endpoint"
)]
pub async fn endpoint_get(
    method: Method,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Query(query): Query<IndexMap<String, String>>,
) -> Response {
    let query = (!query.is_empty()).then_some(query);
    handle(method, &headers, &state, None, query).await
}

#[utoipa::path(
    post,
    path = "/api/endpoint",
    request_body(content = Object, content_type = "application/json"),
    responses(
        (status = 200, description = "Token accepted; JSON body echoed as receivedPayload", body = EndpointResponse),
        (status = 401, description = "Missing, malformed or expired bearer token"),
    ),
    tag = "endpoint"
)]
pub async fn endpoint_post(
    method: Method,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let payload = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| json!({ "error": "Could not parse JSON body" }))
    };
    handle(method, &headers, &state, Some(payload), None).await
}
