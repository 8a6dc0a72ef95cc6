//! Drives OAuth 2.0 grants on behalf of a configured [`crate::store::OAuthClient`]
//! and exposes the raw provider responses for inspection.
//!
//! The `state` sent to the provider is a random anti-CSRF value. The client it
//! belongs to is remembered server-side in [`PendingFlows`].

use thiserror::Error;

mod engine;
pub mod pending;
pub mod tokens;

pub use engine::{Simulator, build_authorization_url};
pub use pending::{DEFAULT_FLOW_TTL, PendingFlow, PendingFlows};
pub use tokens::{DisplayedToken, GrantType, TokenResponse, TokenSet, display_tokens};

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("invalid authorize URL: {0}")]
    InvalidAuthorizeUrl(String),
    /// Non-2xx answer from the token endpoint, kept verbatim for display.
    #[error("{flow} failed: {status} {reason} - {body}")]
    Upstream {
        flow: &'static str,
        status: u16,
        reason: String,
        body: String,
    },
    #[error("{flow} failed: {message}")]
    Transport { flow: &'static str, message: String },
    #[error("{flow} returned an invalid token response: {message}")]
    InvalidResponse { flow: &'static str, message: String },
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}
