//! OpenID Provider metadata discovery with an explicit TTL cache.

use super::OidcError;
use crate::http::{Fetched, cache_insert, snippet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{Instrument, debug, info_span, warn};

pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";
pub const DEFAULT_DISCOVERY_TTL: Duration = Duration::from_secs(60 * 60);
/// Issuers can come from unauthenticated input, so the cache is bounded.
pub const MAX_CACHED_ISSUERS: usize = 128;
/// Upstream bodies are logged, never shown to the user.
const DISCOVERY_FAILED: &str = "Provider discovery failed";

/// The subset of provider metadata the simulator uses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
}

/// Discovery document URL for an issuer. A URL already ending in the
/// well-known path is used as is.
#[must_use]
pub fn discovery_url(issuer: &str) -> String {
    let issuer = issuer.trim();
    if issuer.ends_with(WELL_KNOWN_PATH) {
        issuer.to_string()
    } else {
        format!("{}{WELL_KNOWN_PATH}", issuer.trim_end_matches('/'))
    }
}

/// Provider metadata keyed by issuer URL.
pub struct DiscoveryCache {
    http: reqwest::Client,
    ttl: Duration,
    entries: RwLock<HashMap<String, Fetched<ProviderMetadata>>>,
}

impl DiscoveryCache {
    #[must_use]
    pub fn new(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            http,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Metadata for `issuer`, fetched when absent or older than the TTL.
    ///
    /// # Errors
    /// `OidcError::Discovery` on transport failure, non-2xx, or an invalid document.
    pub async fn discover(&self, issuer: &str) -> Result<ProviderMetadata, OidcError> {
        if let Some(cached) = self.entries.read().await.get(issuer)
            && cached.is_fresh(self.ttl)
        {
            return Ok(cached.value.clone());
        }

        let metadata = self.fetch(issuer).await?;
        cache_insert(
            &mut *self.entries.write().await,
            issuer,
            metadata.clone(),
            self.ttl,
            MAX_CACHED_ISSUERS,
        );
        Ok(metadata)
    }

    /// Drop the cached document for `issuer`.
    pub async fn invalidate(&self, issuer: &str) {
        if self.entries.write().await.remove(issuer).is_some() {
            debug!(issuer = %issuer, "discovery cache entry invalidated");
        }
    }

    async fn fetch(&self, issuer: &str) -> Result<ProviderMetadata, OidcError> {
        let url = discovery_url(issuer);
        let span = info_span!("http.client", http.method = "GET", url = %url);
        async {
            let response = self
                .http
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| {
                    warn!(url = %url, "discovery request failed: {e}");
                    OidcError::Discovery(DISCOVERY_FAILED.to_string())
                })?;
            let status = response.status();
            let body = response.text().await.map_err(|e| {
                warn!(url = %url, "discovery response unreadable: {e}");
                OidcError::Discovery(DISCOVERY_FAILED.to_string())
            })?;
            if !status.is_success() {
                warn!(url = %url, status = %status, body = %snippet(&body), "discovery returned an error");
                return Err(OidcError::Discovery(format!("{DISCOVERY_FAILED} ({status})")));
            }
            serde_json::from_str(&body).map_err(|e| {
                warn!(url = %url, body = %snippet(&body), "invalid discovery document: {e}");
                OidcError::Discovery(format!("{DISCOVERY_FAILED} (invalid document)"))
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn discovery_url_normalization() {
        assert_eq!(
            discovery_url("https://idp.example.com"),
            "https://idp.example.com/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery_url("https://idp.example.com/realms/dev/"),
            "https://idp.example.com/realms/dev/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery_url("https://idp.example.com/.well-known/openid-configuration"),
            "https://idp.example.com/.well-known/openid-configuration"
        );
    }

    fn document(base: &str) -> String {
        json!({
            "issuer": base,
            "authorization_endpoint": format!("{base}/authorize"),
            "token_endpoint": format!("{base}/token"),
            "jwks_uri": format!("{base}/jwks"),
            "response_types_supported": ["code"]
        })
        .to_string()
    }

    #[tokio::test]
    async fn caches_until_invalidated() -> Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", WELL_KNOWN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(document(&server.url()))
            .expect(2)
            .create_async()
            .await;
        let cache = DiscoveryCache::new(reqwest::Client::new(), DEFAULT_DISCOVERY_TTL);

        let first = cache.discover(&server.url()).await?;
        let second = cache.discover(&server.url()).await?;
        assert_eq!(first, second);
        assert_eq!(first.token_endpoint, format!("{}/token", server.url()));

        cache.invalidate(&server.url()).await;
        cache.discover(&server.url()).await?;
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn zero_ttl_always_refetches() -> Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", WELL_KNOWN_PATH)
            .with_status(200)
            .with_body(document(&server.url()))
            .expect(2)
            .create_async()
            .await;
        let cache = DiscoveryCache::new(reqwest::Client::new(), Duration::ZERO);
        cache.discover(&server.url()).await?;
        cache.discover(&server.url()).await?;
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn non_success_is_a_discovery_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", WELL_KNOWN_PATH)
            .with_status(404)
            .with_body("not here")
            .create_async()
            .await;
        let cache = DiscoveryCache::new(reqwest::Client::new(), DEFAULT_DISCOVERY_TTL);
        let err = cache.discover(&server.url()).await;
        assert!(matches!(err, Err(OidcError::Discovery(msg)) if msg.contains("404")));
    }

    #[tokio::test]
    async fn upstream_body_stays_out_of_the_error() {
        let mut server = mockito::Server::new_async().await;
        let _error = server
            .mock("GET", "/broken/.well-known/openid-configuration")
            .with_status(500)
            .with_body("<script>alert('internal stack trace')</script>")
            .create_async()
            .await;
        let _garbage = server
            .mock("GET", "/garbage/.well-known/openid-configuration")
            .with_status(200)
            .with_body("{\"secret\": \"upstream detail\"}")
            .create_async()
            .await;
        let cache = DiscoveryCache::new(reqwest::Client::new(), DEFAULT_DISCOVERY_TTL);

        for issuer in ["broken", "garbage"] {
            let err = cache.discover(&format!("{}/{issuer}", server.url())).await;
            let Err(OidcError::Discovery(message)) = err else {
                panic!("expected a discovery error for {issuer}");
            };
            assert!(message.starts_with(DISCOVERY_FAILED));
            assert!(!message.contains("script"));
            assert!(!message.contains("upstream detail"));
        }
    }

    #[tokio::test]
    async fn cache_stays_bounded_for_many_issuers() -> Result<()> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock(
                "GET",
                mockito::Matcher::Regex(r"^/tenant/\d+/\.well-known/openid-configuration$".to_string()),
            )
            .with_status(200)
            .with_body(document(&server.url()))
            .expect_at_least(1)
            .create_async()
            .await;

        let expiring = DiscoveryCache::new(reqwest::Client::new(), Duration::ZERO);
        let lasting = DiscoveryCache::new(reqwest::Client::new(), DEFAULT_DISCOVERY_TTL);
        for i in 0..200 {
            let issuer = format!("{}/tenant/{i}", server.url());
            expiring.discover(&issuer).await?;
            lasting.discover(&issuer).await?;
        }
        assert!(expiring.entries.read().await.len() < 200);
        assert_eq!(lasting.entries.read().await.len(), MAX_CACHED_ISSUERS);
        Ok(())
    }
}
