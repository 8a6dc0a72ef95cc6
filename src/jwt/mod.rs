//! Compact JWS handling: key sets, signature checks, ID-token claim validation,
//! and a best-effort display decoder.

use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::errors::Error as RsaError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod jwks;
pub mod token;
pub mod validator;

pub use jwks::{Jwk, Jwks};
pub use token::{
    DecodedToken, JwtHeader, decode_claims_unverified, decode_token_for_display, sign_rs256,
    verify_id_token, verify_jws,
};
pub use validator::{JwksCache, JwksValidator, SignatureValidation};

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("no matching key in JWKS")]
    UnknownKid,
    #[error("failed to parse key")]
    KeyParse,
    #[error("rsa error")]
    Rsa(#[from] RsaError),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("missing exp claim")]
    MissingExpiry,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("failed to fetch JWKS: {0}")]
    Fetch(String),
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d(s: &str) -> Result<Vec<u8>, Error> {
    Base64UrlUnpadded::decode_vec(s.trim_end_matches('=')).map_err(|_| Error::Base64)
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    Ok(serde_json::from_slice(&b64d(s)?)?)
}

/// Split a compact token into exactly three segments.
fn segments(token: &str) -> Result<(&str, &str, &str), Error> {
    let mut parts = token.trim().split('.');
    let header = parts.next().ok_or(Error::TokenFormat)?;
    let claims = parts.next().ok_or(Error::TokenFormat)?;
    let signature = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() || header.is_empty() || claims.is_empty() {
        return Err(Error::TokenFormat);
    }
    Ok((header, claims, signature))
}
