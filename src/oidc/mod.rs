//! Delegated login through an external OpenID Provider.
//!
//! The callback is checked in a fixed order: `state`, stored nonce, code
//! exchange, ID-token signature/issuer/audience, `nonce` claim, username claim,
//! group gate, then local user resolution. A failing step stops the login and
//! nothing after it runs.

use thiserror::Error;

pub mod discovery;
mod engine;

pub use discovery::{DEFAULT_DISCOVERY_TTL, DiscoveryCache, ProviderMetadata, discovery_url};
pub use engine::{OIDC_CALLBACK_PATH, OIDC_SCOPE, OidcCallback, OidcEngine, OidcLoginRedirect};

#[derive(Debug, Error)]
pub enum OidcError {
    /// The provider redirected back with an `error` parameter.
    #[error("{0}")]
    Provider(String),
    #[error("Missing OIDC configuration. Please configure it in the Admin Settings.")]
    NotConfigured,
    #[error("OIDC login is disabled")]
    Disabled,
    #[error("Invalid request")]
    InvalidRequest,
    #[error("Invalid state")]
    InvalidState,
    #[error("Invalid session")]
    InvalidSession,
    /// Safe to show to the user; upstream detail is only logged.
    #[error("{0}")]
    Discovery(String),
    #[error("Failed to exchange code for tokens")]
    TokenExchange,
    #[error("Token response did not include an ID token")]
    MissingIdToken,
    #[error("ID token verification failed: {0}")]
    IdToken(#[from] crate::jwt::Error),
    #[error("Invalid nonce")]
    InvalidNonce,
    #[error("ID token missing {0} claim")]
    MissingClaim(String),
    #[error("User is not in an allowed group")]
    GroupDenied,
    #[error("User registration is disabled")]
    RegistrationDisabled,
    #[error("Account is disabled")]
    AccountDisabled,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}
