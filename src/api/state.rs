//! Shared application state, built once at startup and handed to every handler
//! through an `Extension<Arc<AppState>>` layer.

use crate::{
    auth::{MfaTickets, PasswordAuth, TotpConfig},
    http,
    jwt::{JwksCache, JwksValidator},
    oidc::{DiscoveryCache, OidcEngine},
    session::{SessionCodec, SessionService},
    simulator::{PendingFlows, Simulator},
    store::{CredentialStore, User},
    webauthn::{PasskeyConfig, PasskeyEngine, WebauthnVerifier},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};

/// Runtime settings resolved from the command line and environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub public_url: String,
    pub session_secret: SecretString,
    pub session_ttl_seconds: i64,
    pub mfa_ticket_ttl: Duration,
    pub totp_issuer: String,
    pub rp_id: Option<String>,
    pub rp_name: Option<String>,
    pub discovery_ttl: Duration,
    pub jwks_ttl: Duration,
    pub http_timeout: Duration,
    pub admin_username: String,
}

pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    pub sessions: Arc<SessionService>,
    pub auth: PasswordAuth,
    pub passkeys: PasskeyEngine,
    pub oidc: OidcEngine,
    pub simulator: Simulator,
    pub discovery: Arc<DiscoveryCache>,
    pub jwks: JwksValidator,
    public_url: String,
    secure_cookies: bool,
    admin_username: String,
}

impl AppState {
    /// Wire every engine against `store`, sharing one outbound HTTP client.
    ///
    /// # Errors
    /// Returns an error if the session secret is too short, the public URL is
    /// invalid, or the HTTP client cannot be built.
    pub fn new(config: AppConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let codec = SessionCodec::new(&config.session_secret, config.session_ttl_seconds)
            .context("Invalid session configuration")?;
        let sessions = Arc::new(SessionService::new(codec, store.clone()));

        let client = http::client(config.http_timeout)?;
        let discovery = Arc::new(DiscoveryCache::new(client.clone(), config.discovery_ttl));
        let jwks_cache = Arc::new(JwksCache::new(client.clone(), config.jwks_ttl));

        let auth = PasswordAuth::new(
            store.clone(),
            sessions.clone(),
            TotpConfig::new(config.totp_issuer),
            MfaTickets::new(config.mfa_ticket_ttl),
        );

        let passkey_config =
            PasskeyConfig::from_public_url(&config.public_url, config.rp_id, config.rp_name)?;
        let verifier = WebauthnVerifier::new(
            passkey_config.rp_id(),
            passkey_config.rp_name(),
            passkey_config.origin(),
        )?;
        let passkeys = PasskeyEngine::new(
            passkey_config,
            store.clone(),
            sessions.clone(),
            Arc::new(verifier),
        );

        let oidc = OidcEngine::new(
            store.clone(),
            sessions.clone(),
            discovery.clone(),
            jwks_cache.clone(),
            client.clone(),
            &config.public_url,
        );

        let public_url = config.public_url.trim_end_matches('/').to_string();
        Ok(Self {
            store,
            sessions,
            auth,
            passkeys,
            oidc,
            simulator: Simulator::new(client, PendingFlows::default()),
            discovery,
            jwks: JwksValidator::new(jwks_cache),
            secure_cookies: public_url.starts_with("https://"),
            public_url,
            admin_username: config.admin_username,
        })
    }

    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Cookies carry `Secure` only when the public URL is served over HTTPS.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }

    #[must_use]
    pub fn admin_username(&self) -> &str {
        &self.admin_username
    }

    #[must_use]
    pub fn is_admin(&self, user: &User) -> bool {
        user.username == self.admin_username
    }
}
