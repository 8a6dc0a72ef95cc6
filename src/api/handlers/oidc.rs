//! Browser redirects for delegated OIDC login.
//!
//! `state` and `nonce` travel in short-lived `HttpOnly` cookies between the two
//! legs. The callback clears both on every outcome.

use super::{found, session_cookie, with_query};
use crate::{
    api::state::AppState,
    oidc::{OidcCallback, OidcError},
    session::cookie::{
        OIDC_COOKIE_MAX_AGE, OIDC_NONCE_COOKIE, OIDC_STATE_COOKIE, build_cookie, clear_cookie,
        cookie_value,
    },
};
use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, header::SET_COOKIE},
    response::Response,
};
use std::sync::Arc;
use tracing::{error, warn};

const LOGIN_PAGE: &str = "/login";

fn log_failure(err: &OidcError) {
    match err {
        OidcError::Internal(inner) => error!("OIDC login failed: {inner:#}"),
        other => warn!("OIDC login failed: {other}"),
    }
}

fn login_error(err: &OidcError) -> Response {
    log_failure(err);
    found(&with_query(LOGIN_PAGE, "error", &err.to_string()), HeaderMap::new())
}

#[utoipa::path(
    get,
    path = "/api/auth/oidc/login",
    responses(
        (status = 302, description = "Redirect to the provider, or back to /login with an error")
    ),
    tag = "oidc"
)]
pub async fn login(state: Extension<Arc<AppState>>) -> Response {
    let redirect = match state.oidc.begin_login().await {
        Ok(redirect) => redirect,
        Err(err) => return login_error(&err),
    };

    let secure = state.secure_cookies();
    let cookies = [
        (OIDC_STATE_COOKIE, redirect.state.as_str()),
        (OIDC_NONCE_COOKIE, redirect.nonce.as_str()),
    ];
    let mut headers = HeaderMap::new();
    for (name, value) in cookies {
        match build_cookie(name, value, OIDC_COOKIE_MAX_AGE, secure) {
            Ok(cookie) => {
                headers.append(SET_COOKIE, cookie);
            }
            Err(err) => return login_error(&OidcError::Internal(err.into())),
        }
    }
    found(&redirect.url, headers)
}

#[utoipa::path(
    get,
    path = "/api/auth/oidc/callback",
    params(
        ("code" = Option<String>, Query, description = "Authorization code"),
        ("state" = Option<String>, Query, description = "Anti-CSRF state"),
        ("error" = Option<String>, Query, description = "Error reported by the provider"),
    ),
    responses(
        (status = 302, description = "Redirect to / with a session, or to /login with an error")
    ),
    tag = "oidc"
)]
pub async fn callback(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Query(callback): Query<OidcCallback>,
) -> Response {
    let stored_state = cookie_value(&headers, OIDC_STATE_COOKIE);
    let stored_nonce = cookie_value(&headers, OIDC_NONCE_COOKIE);

    let result = state
        .oidc
        .complete_login(&callback, stored_state.as_deref(), stored_nonce.as_deref())
        .await;

    let mut response_headers = HeaderMap::new();
    for name in [OIDC_STATE_COOKIE, OIDC_NONCE_COOKIE] {
        if let Ok(cookie) = clear_cookie(name, state.secure_cookies()) {
            response_headers.append(SET_COOKIE, cookie);
        }
    }

    let session = match result {
        Ok(session) => session,
        Err(err) => {
            log_failure(&err);
            let location = with_query(LOGIN_PAGE, "error", &err.to_string());
            return found(&location, response_headers);
        }
    };
    match session_cookie(&state, &session) {
        Ok(cookie) => {
            response_headers.append(SET_COOKIE, cookie);
        }
        Err(_) => {
            let location = with_query(LOGIN_PAGE, "error", "Failed to create session");
            return found(&location, response_headers);
        }
    }
    found("/", response_headers)
}
