use super::{DiscoveryCache, OidcError, ProviderMetadata};
use crate::auth::password::hash_password;
use crate::auth::utils::{looks_like_email, random_token};
use crate::http::snippet;
use crate::jwt::{self, JwksCache, verify_id_token};
use crate::session::{Session, SessionService};
use crate::store::{AuthSettings, CredentialStore, User, UserInsert};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use url::Url;

pub const OIDC_CALLBACK_PATH: &str = "/api/auth/oidc/callback";
pub const OIDC_SCOPE: &str = "openid email profile";

/// Where to send the browser, plus the values to park in short-lived cookies.
#[derive(Debug, Clone)]
pub struct OidcLoginRedirect {
    pub url: String,
    pub state: String,
    pub nonce: String,
}

/// Query parameters of the provider's redirect back to us.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OidcCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

struct ClientConfig {
    issuer: String,
    client_id: String,
    client_secret: String,
}

impl ClientConfig {
    fn from_settings(settings: &AuthSettings) -> Result<Self, OidcError> {
        match (
            &settings.oidc_issuer,
            &settings.oidc_client_id,
            &settings.oidc_client_secret,
        ) {
            (Some(issuer), Some(client_id), Some(client_secret)) => Ok(Self {
                issuer: issuer.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => Err(OidcError::NotConfigured),
        }
    }
}

pub struct OidcEngine {
    store: Arc<dyn CredentialStore>,
    sessions: Arc<SessionService>,
    discovery: Arc<DiscoveryCache>,
    jwks: Arc<JwksCache>,
    http: reqwest::Client,
    redirect_uri: String,
}

impl OidcEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        sessions: Arc<SessionService>,
        discovery: Arc<DiscoveryCache>,
        jwks: Arc<JwksCache>,
        http: reqwest::Client,
        public_url: &str,
    ) -> Self {
        Self {
            store,
            sessions,
            discovery,
            jwks,
            http,
            redirect_uri: format!("{}{OIDC_CALLBACK_PATH}", public_url.trim_end_matches('/')),
        }
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub fn discovery(&self) -> &DiscoveryCache {
        &self.discovery
    }

    /// Mint `state` and `nonce` and build the provider authorization URL.
    ///
    /// # Errors
    /// `Disabled` or `NotConfigured` before any network call, `Discovery` when the
    /// provider metadata cannot be loaded.
    #[instrument(skip(self))]
    pub async fn begin_login(&self) -> Result<OidcLoginRedirect, OidcError> {
        let settings = self.store.get_auth_settings().await?;
        if !settings.enable_oidc_login {
            return Err(OidcError::Disabled);
        }
        let config = ClientConfig::from_settings(&settings)?;
        let metadata = self.discovery.discover(&config.issuer).await?;

        let state = random_token()?;
        let nonce = random_token()?;
        let mut url = Url::parse(&metadata.authorization_endpoint).map_err(|e| {
            warn!(endpoint = %metadata.authorization_endpoint, "invalid authorization_endpoint: {e}");
            OidcError::Discovery("Provider discovery failed (invalid authorization_endpoint)".to_string())
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", OIDC_SCOPE)
            .append_pair("state", &state)
            .append_pair("nonce", &nonce);

        Ok(OidcLoginRedirect {
            url: url.into(),
            state,
            nonce,
        })
    }

    /// Finish the login started by [`Self::begin_login`].
    ///
    /// `stored_state` and `stored_nonce` are the values parked at `begin_login`;
    /// the caller discards them whatever the outcome.
    ///
    /// # Errors
    /// The first failing step, in callback order.
    #[instrument(skip_all)]
    pub async fn complete_login(
        &self,
        callback: &OidcCallback,
        stored_state: Option<&str>,
        stored_nonce: Option<&str>,
    ) -> Result<Session, OidcError> {
        if let Some(error) = &callback.error {
            return Err(OidcError::Provider(error.clone()));
        }
        let (Some(code), Some(state)) = (&callback.code, &callback.state) else {
            return Err(OidcError::InvalidRequest);
        };
        if stored_state != Some(state.as_str()) {
            warn!("OIDC callback state mismatch");
            return Err(OidcError::InvalidState);
        }
        let Some(stored_nonce) = stored_nonce else {
            return Err(OidcError::InvalidSession);
        };

        let settings = self.store.get_auth_settings().await?;
        let config = ClientConfig::from_settings(&settings)?;
        let metadata = self.discovery.discover(&config.issuer).await?;

        let id_token = self.exchange_code(&metadata, &config, code).await?;
        let claims = self.verify(&id_token, &metadata, &config).await?;

        if claims.get("nonce").and_then(Value::as_str) != Some(stored_nonce) {
            warn!("ID token nonce mismatch");
            return Err(OidcError::InvalidNonce);
        }

        let identifier = claims
            .get(&settings.oidc_username_claim)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| OidcError::MissingClaim(settings.oidc_username_claim.clone()))?;

        if !in_required_group(&claims, &settings) {
            info!(identifier = %identifier, "OIDC login rejected by group gate");
            return Err(OidcError::GroupDenied);
        }

        self.login_as(identifier, &settings).await
    }

    /// Sign in the local user named `identifier`, provisioning it when settings allow.
    ///
    /// # Errors
    /// `RegistrationDisabled` when the user is unknown and auto-provisioning is off,
    /// `AccountDisabled` for a disabled account.
    pub async fn login_with_oidc(&self, identifier: &str) -> Result<Session, OidcError> {
        let settings = self.store.get_auth_settings().await?;
        self.login_as(identifier, &settings).await
    }

    async fn login_as(
        &self,
        identifier: &str,
        settings: &AuthSettings,
    ) -> Result<Session, OidcError> {
        let user = match self.store.get_user_by_username(identifier).await? {
            Some(user) => user,
            None if settings.enable_oidc_auto_provision => self.provision(identifier).await?,
            None => return Err(OidcError::RegistrationDisabled),
        };
        if user.disabled {
            return Err(OidcError::AccountDisabled);
        }
        info!(user_id = %user.id, "OIDC login succeeded");
        Ok(self.sessions.create_session(&user)?)
    }

    async fn provision(&self, identifier: &str) -> Result<User, OidcError> {
        // Random password: the account can only be reached through the provider.
        let hash = hash_password(&random_token()?)?;
        let email = looks_like_email(identifier).then_some(identifier);
        match self.store.create_user(identifier, &hash, email).await? {
            UserInsert::Created(user) => {
                info!(user_id = %user.id, "user provisioned from OIDC login");
                Ok(user)
            }
            // Lost a race with a concurrent first login.
            UserInsert::UsernameTaken => self
                .store
                .get_user_by_username(identifier)
                .await?
                .ok_or(OidcError::RegistrationDisabled),
        }
    }

    async fn exchange_code(
        &self,
        metadata: &ProviderMetadata,
        config: &ClientConfig,
        code: &str,
    ) -> Result<String, OidcError> {
        let span = info_span!(
            "http.client",
            http.method = "POST",
            url = %metadata.token_endpoint
        );
        async {
            let response = self
                .http
                .post(&metadata.token_endpoint)
                .header(reqwest::header::ACCEPT, "application/json")
                .form(&[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", self.redirect_uri.as_str()),
                    ("client_id", config.client_id.as_str()),
                    ("client_secret", config.client_secret.as_str()),
                ])
                .send()
                .await
                .map_err(|e| {
                    warn!("token request failed: {e}");
                    OidcError::TokenExchange
                })?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    status = %status,
                    body = %snippet(&body),
                    "token endpoint rejected the code"
                );
                return Err(OidcError::TokenExchange);
            }
            let tokens: TokenResponse = response.json().await.map_err(|e| {
                warn!("token response is not valid JSON: {e}");
                OidcError::TokenExchange
            })?;
            tokens.id_token.ok_or(OidcError::MissingIdToken)
        }
        .instrument(span)
        .await
    }

    async fn verify(
        &self,
        id_token: &str,
        metadata: &ProviderMetadata,
        config: &ClientConfig,
    ) -> Result<Value, OidcError> {
        let now = crate::unix_now();
        let jwks = self.jwks.get(&metadata.jwks_uri).await?;
        match verify_id_token(id_token, &jwks, &config.issuer, &config.client_id, now) {
            Err(jwt::Error::UnknownKid) => {
                debug!("ID token key not in cached JWKS, refetching");
                let jwks = self.jwks.refresh(&metadata.jwks_uri).await?;
                Ok(verify_id_token(
                    id_token,
                    &jwks,
                    &config.issuer,
                    &config.client_id,
                    now,
                )?)
            }
            result => Ok(result?),
        }
    }
}

/// With no required groups configured everyone passes. Otherwise the group
/// claim (an array, or a single string) must name at least one of them.
fn in_required_group(claims: &Value, settings: &AuthSettings) -> bool {
    if settings.oidc_required_groups.is_empty() {
        return true;
    }
    let groups: Vec<&str> = match claims.get(&settings.oidc_group_claim) {
        Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(value)) => vec![value.as_str()],
        _ => Vec::new(),
    };
    settings
        .oidc_required_groups
        .iter()
        .any(|required| groups.contains(&required.as_str()))
}
