//! # OAuthSim (OAuth 2.0 / OIDC Client Simulator)
//!
//! `oauthsim` lets an operator register relying-party client definitions and
//! drive authorization-code, client-credentials and refresh-token grants
//! against a real or test identity provider, then inspect the resulting tokens.
//!
//! ## Local Authentication
//!
//! Access to the simulator itself is gated by a local session. A session can be
//! obtained through:
//!
//! - **Password + TOTP:** passwords are hashed with Argon2id. When a TOTP secret is
//!   enrolled, the password step returns a short-lived server-side MFA ticket that
//!   must be redeemed with a valid code.
//! - **Passkeys:** WebAuthn registration and authentication ceremonies with a
//!   single-use challenge stored on the user record and a monotonic signature counter.
//! - **Delegated OIDC login:** discovery, `state`/`nonce` binding, code exchange and
//!   ID-token verification against the provider's JWKS, with optional auto-provisioning.
//!
//! Sessions are stateless HMAC-signed tokens (at most 24 hours) carried in an
//! `HttpOnly`, `SameSite=Lax` cookie. Every read re-checks the user record so a
//! disabled or deleted account loses access immediately.
//!
//! ## Flow Simulation
//!
//! The simulator never overloads the OAuth `state` parameter: it is a random
//! anti-CSRF token, and the simulated client is correlated server-side.

pub mod api;
pub mod auth;
pub mod cli;
pub mod http;
pub mod jwt;
pub mod oidc;
pub mod session;
pub mod simulator;
pub mod store;
pub mod webauthn;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Current UNIX time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn unix_now_is_after_2023() {
        assert!(unix_now() > 1_700_000_000);
    }
}
