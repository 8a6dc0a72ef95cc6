//! Cookie helpers for the session and the OIDC `state`/`nonce` pair.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, COOKIE, InvalidHeaderValue},
};

pub const SESSION_COOKIE_NAME: &str = "oauthsim_session";
pub const OIDC_STATE_COOKIE: &str = "oidc_state";
pub const OIDC_NONCE_COOKIE: &str = "oidc_nonce";
/// Lifetime of the OIDC `state`/`nonce` cookies.
pub const OIDC_COOKIE_MAX_AGE: i64 = 5 * 60;

/// Build an `HttpOnly`, `SameSite=Lax` cookie scoped to `/`.
///
/// # Errors
/// Returns an error if `value` contains characters not allowed in a header.
pub fn build_cookie(
    name: &str,
    value: &str,
    max_age_seconds: i64,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Expire a cookie previously set with [`build_cookie`].
///
/// # Errors
/// Returns an error if `name` is not a valid header token.
pub fn clear_cookie(name: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(name, "", 0, secure)
}

/// Read a cookie value from the request headers.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Session token from `Authorization: Bearer` or the session cookie.
#[must_use]
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    extract_bearer_token(headers).or_else(|| cookie_value(headers, SESSION_COOKIE_NAME))
}

#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
