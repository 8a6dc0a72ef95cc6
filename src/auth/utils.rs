//! Small helpers for random tokens and identifier checks.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

/// 32 random bytes, base64url encoded without padding.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn random_token() -> Result<String> {
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes::<32>()?))
}

/// Fill a fixed-size buffer from the OS random source.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to read from OS random source")?;
    Ok(bytes)
}

/// Hash a bearer-style token so raw values are never used as map keys.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Basic email shape check used when provisioning from an external identity.
#[must_use]
pub fn looks_like_email(value: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(value))
}
