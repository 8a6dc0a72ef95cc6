use super::{GrantType, PendingFlow, PendingFlows, SimulatorError, TokenResponse, TokenSet};
use crate::http::snippet;
use crate::store::OAuthClient;
use tracing::{Instrument, info, info_span, warn};
use url::Url;

const AUTHORIZATION_CODE_FLOW: &str = "Token exchange";
const CLIENT_CREDENTIALS_FLOW: &str = "Client credentials flow";
const REFRESH_TOKEN_FLOW: &str = "Refresh token flow";

/// Authorization request URL for `client`.
///
/// Parameters are appended in a fixed order: `response_type`, `client_id`,
/// `redirect_uri`, `scope` (only when set), custom attributes in insertion
/// order, then `state`.
///
/// # Errors
/// `InvalidAuthorizeUrl` if the stored authorize URL does not parse.
pub fn build_authorization_url(
    client: &OAuthClient,
    state: &str,
) -> Result<String, SimulatorError> {
    let mut url = Url::parse(&client.authorize_url)
        .map_err(|e| SimulatorError::InvalidAuthorizeUrl(e.to_string()))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &client.client_id)
            .append_pair("redirect_uri", &client.redirect_uri);
        if let Some(scope) = client.scope.as_deref().filter(|s| !s.is_empty()) {
            query.append_pair("scope", scope);
        }
        for (key, value) in &client.custom_attributes {
            query.append_pair(key, value);
        }
        query.append_pair("state", state);
    }
    Ok(url.into())
}

pub struct Simulator {
    http: reqwest::Client,
    pending: PendingFlows,
}

impl Simulator {
    #[must_use]
    pub fn new(http: reqwest::Client, pending: PendingFlows) -> Self {
        Self { http, pending }
    }

    #[must_use]
    pub fn pending(&self) -> &PendingFlows {
        &self.pending
    }

    /// Register a pending flow for `client` and return the URL to send the browser to.
    ///
    /// # Errors
    /// `InvalidAuthorizeUrl`, or `Internal` if no state could be minted.
    pub async fn begin_authorization(
        &self,
        client: &OAuthClient,
    ) -> Result<String, SimulatorError> {
        let state = self
            .pending
            .register(PendingFlow {
                owner_id: client.owner_id,
                client_id: client.id,
            })
            .await?;
        build_authorization_url(client, &state)
    }

    /// Redeem an authorization code at the client's token endpoint.
    ///
    /// # Errors
    /// `Upstream` for a non-2xx answer, `Transport` or `InvalidResponse` otherwise.
    pub async fn exchange_authorization_code(
        &self,
        client: &OAuthClient,
        code: &str,
    ) -> Result<TokenSet, SimulatorError> {
        let form = [
            ("grant_type", GrantType::AuthorizationCode.as_str()),
            ("code", code),
            ("redirect_uri", client.redirect_uri.as_str()),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
        ];
        self.token_request(client, GrantType::AuthorizationCode, &form)
            .await
    }

    /// # Errors
    /// `Upstream` for a non-2xx answer, `Transport` or `InvalidResponse` otherwise.
    pub async fn client_credentials_grant(
        &self,
        client: &OAuthClient,
    ) -> Result<TokenSet, SimulatorError> {
        let mut form = vec![
            ("grant_type", GrantType::ClientCredentials.as_str()),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
        ];
        if let Some(scope) = client.scope.as_deref().filter(|s| !s.is_empty()) {
            form.push(("scope", scope));
        }
        self.token_request(client, GrantType::ClientCredentials, &form)
            .await
    }

    /// # Errors
    /// `Upstream` for a non-2xx answer, `Transport` or `InvalidResponse` otherwise.
    pub async fn refresh_token_grant(
        &self,
        client: &OAuthClient,
        refresh_token: &str,
    ) -> Result<TokenSet, SimulatorError> {
        let form = [
            ("grant_type", GrantType::RefreshToken.as_str()),
            ("refresh_token", refresh_token),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
        ];
        self.token_request(client, GrantType::RefreshToken, &form)
            .await
    }

    async fn token_request(
        &self,
        client: &OAuthClient,
        grant_type: GrantType,
        form: &[(&str, &str)],
    ) -> Result<TokenSet, SimulatorError> {
        let flow = match grant_type {
            GrantType::AuthorizationCode => AUTHORIZATION_CODE_FLOW,
            GrantType::ClientCredentials => CLIENT_CREDENTIALS_FLOW,
            GrantType::RefreshToken => REFRESH_TOKEN_FLOW,
        };
        let span = info_span!(
            "http.client",
            http.method = "POST",
            url = %client.token_url,
            grant_type = grant_type.as_str()
        );
        async {
            let response = self
                .http
                .post(&client.token_url)
                .header(reqwest::header::ACCEPT, "application/json")
                .form(form)
                .send()
                .await
                .map_err(|e| SimulatorError::Transport {
                    flow,
                    message: e.to_string(),
                })?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| SimulatorError::Transport {
                    flow,
                    message: e.to_string(),
                })?;

            if !status.is_success() {
                warn!(status = %status, client_id = %client.id, "{flow} rejected");
                return Err(SimulatorError::Upstream {
                    flow,
                    status: status.as_u16(),
                    reason: status.canonical_reason().unwrap_or_default().to_string(),
                    body: snippet(&body),
                });
            }

            let tokens: TokenResponse =
                serde_json::from_str(&body).map_err(|e| SimulatorError::InvalidResponse {
                    flow,
                    message: e.to_string(),
                })?;
            info!(client_id = %client.id, "{flow} succeeded");
            Ok(TokenSet { grant_type, tokens })
        }
        .instrument(span)
        .await
    }
}
