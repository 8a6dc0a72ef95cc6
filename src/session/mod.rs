//! Stateless session credentials.
//!
//! A session token is `base64url(claims) "." base64url(HMAC-SHA256(claims))`.
//! Claims carry only the user id, username, and issue/expiry times; nothing
//! secret is ever embedded. Verification failures of any kind are reported as
//! "no session" rather than as errors.

use crate::store::{CredentialStore, User};
use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::hmac;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

pub mod cookie;

/// Hard upper bound on session lifetime.
pub const MAX_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum SessionConfigError {
    #[error("session secret must be at least {MIN_SECRET_LEN} bytes")]
    SecretTooShort,
    #[error("session ttl must be positive")]
    InvalidTtl,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly minted session for `user`.
#[derive(Clone, Debug)]
pub struct Session {
    pub user: User,
    pub token: String,
    pub expires_at: i64,
}

pub struct SessionCodec {
    key: hmac::Key,
    ttl_seconds: i64,
}

impl SessionCodec {
    /// Build a codec. TTLs above 24 hours are clamped.
    ///
    /// # Errors
    /// Returns an error if the secret is shorter than 32 bytes or the TTL is not positive.
    pub fn new(secret: &SecretString, ttl_seconds: i64) -> Result<Self, SessionConfigError> {
        let secret = secret.expose_secret().as_bytes();
        if secret.len() < MIN_SECRET_LEN {
            return Err(SessionConfigError::SecretTooShort);
        }
        if ttl_seconds <= 0 {
            return Err(SessionConfigError::InvalidTtl);
        }
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            ttl_seconds: ttl_seconds.min(MAX_SESSION_TTL_SECONDS),
        })
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Sign a token for `user` valid from `now` for the configured TTL.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be serialized.
    pub fn issue(&self, user: &User, now: i64) -> Result<(String, SessionClaims)> {
        let claims = SessionClaims {
            sub: user.id,
            username: user.username.clone(),
            iat: now,
            exp: now + self.ttl_seconds,
        };
        let payload = serde_json::to_vec(&claims).context("failed to encode session claims")?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
        let tag = hmac::sign(&self.key, payload_b64.as_bytes());
        let token = format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(tag.as_ref()));
        Ok((token, claims))
    }

    /// Verify signature and expiry. Any failure yields `None`.
    #[must_use]
    pub fn verify(&self, token: &str, now: i64) -> Option<SessionClaims> {
        let (payload_b64, tag_b64) = token.split_once('.')?;
        let tag = URL_SAFE_NO_PAD.decode(tag_b64).ok()?;
        hmac::verify(&self.key, payload_b64.as_bytes(), &tag).ok()?;
        let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let claims: SessionClaims = serde_json::from_slice(&payload).ok()?;
        if claims.exp <= now || claims.exp - claims.iat > MAX_SESSION_TTL_SECONDS {
            return None;
        }
        Some(claims)
    }
}

/// Mints sessions and resolves presented tokens back to live users.
pub struct SessionService {
    codec: SessionCodec,
    store: Arc<dyn CredentialStore>,
}

impl SessionService {
    #[must_use]
    pub fn new(codec: SessionCodec, store: Arc<dyn CredentialStore>) -> Self {
        Self { codec, store }
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.codec.ttl_seconds()
    }

    /// Mint a session credential for an authenticated user.
    ///
    /// # Errors
    /// Returns an error if the token cannot be encoded.
    pub fn create_session(&self, user: &User) -> Result<Session> {
        let (token, claims) = self.codec.issue(user, crate::unix_now())?;
        Ok(Session {
            user: user.clone(),
            token,
            expires_at: claims.exp,
        })
    }

    /// Resolve a presented token. The user is re-read from the store so a
    /// deleted or disabled account has no session even if its token is intact.
    pub async fn get_session(&self, token: Option<&str>) -> Option<User> {
        let claims = self.codec.verify(token?, crate::unix_now())?;
        match self.store.get_user_by_id(claims.sub).await {
            Ok(Some(user)) if !user.disabled && user.username == claims.username => Some(user),
            Ok(_) => {
                debug!(user_id = %claims.sub, "session refers to a missing or disabled user");
                None
            }
            Err(err) => {
                error!("Failed to resolve session user: {err:#}");
                None
            }
        }
    }

    pub async fn is_authenticated(&self, token: Option<&str>) -> bool {
        self.get_session(token).await.is_some()
    }
}
