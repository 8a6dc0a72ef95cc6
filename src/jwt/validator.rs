//! Remote key sets with a TTL cache, and the display-path signature check.

use super::{Error, Jwks, JwtHeader, token::verify_jws};
use crate::http::{Fetched, cache_insert, snippet};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{Instrument, debug, info_span, warn};
use utoipa::ToSchema;

pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(60 * 60);
pub const MAX_CACHED_KEY_SETS: usize = 128;

/// JWKS documents keyed by URL.
pub struct JwksCache {
    http: reqwest::Client,
    ttl: Duration,
    entries: RwLock<HashMap<String, Fetched<Jwks>>>,
}

impl JwksCache {
    #[must_use]
    pub fn new(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            http,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached key set for `url`, fetched when absent or older than the TTL.
    ///
    /// # Errors
    /// Returns `Error::Fetch` on transport failure, non-2xx, or an invalid document.
    pub async fn get(&self, url: &str) -> Result<Jwks, Error> {
        if let Some(cached) = self.entries.read().await.get(url)
            && cached.is_fresh(self.ttl)
        {
            return Ok(cached.value.clone());
        }
        self.refresh(url).await
    }

    /// Fetch `url` now and replace the cached entry.
    ///
    /// # Errors
    /// Returns `Error::Fetch` on transport failure, non-2xx, or an invalid document.
    pub async fn refresh(&self, url: &str) -> Result<Jwks, Error> {
        let jwks = self.fetch(url).await?;
        cache_insert(
            &mut *self.entries.write().await,
            url,
            jwks.clone(),
            self.ttl,
            MAX_CACHED_KEY_SETS,
        );
        Ok(jwks)
    }

    pub async fn invalidate(&self, url: &str) {
        self.entries.write().await.remove(url);
    }

    async fn fetch(&self, url: &str) -> Result<Jwks, Error> {
        let span = info_span!("http.client", http.method = "GET", url = %url);
        async {
            let response = self
                .http
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| Error::Fetch(e.to_string()))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| Error::Fetch(e.to_string()))?;
            if !status.is_success() {
                return Err(Error::Fetch(format!("{status} - {}", snippet(&body))));
            }
            Jwks::from_json(&body).map_err(|e| Error::Fetch(format!("invalid JWKS document: {e}")))
        }
        .instrument(span)
        .await
    }

    /// Verify a token against the key set at `url`. When the cached set has no
    /// matching key, the set is refetched once in case the provider rotated keys.
    ///
    /// # Errors
    /// Any fetch or verification failure.
    pub async fn verify(&self, token: &str, url: &str) -> Result<(JwtHeader, Value), Error> {
        let jwks = self.get(url).await?;
        match verify_jws(token, &jwks) {
            Err(Error::UnknownKid) => {
                debug!(url = %url, "no matching key in cached JWKS, refetching");
                let jwks = self.refresh(url).await?;
                verify_jws(token, &jwks)
            }
            result => result,
        }
    }
}

/// Outcome of a display-time signature check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignatureValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SignatureValidation {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            key_id: None,
            algorithm: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone)]
pub struct JwksValidator {
    cache: Arc<JwksCache>,
}

impl JwksValidator {
    #[must_use]
    pub fn new(cache: Arc<JwksCache>) -> Self {
        Self { cache }
    }

    /// Check `token` against the key set at `jwks_url`. Every failure is folded
    /// into a `valid: false` result.
    pub async fn verify_signature(&self, token: &str, jwks_url: &str) -> SignatureValidation {
        if url::Url::parse(jwks_url).is_err() {
            return SignatureValidation::failed("invalid JWKS URL");
        }
        match self.cache.verify(token, jwks_url).await {
            Ok((header, _)) => SignatureValidation {
                valid: true,
                key_id: header.kid,
                algorithm: Some(header.alg),
                error: None,
            },
            Err(err) => {
                warn!(jwks_url = %jwks_url, "signature validation failed: {err}");
                SignatureValidation::failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::sign_rs256;
    use crate::jwt::token::tests::TEST_PRIVATE_KEY_PEM;
    use anyhow::Result;
    use serde_json::json;

    fn jwks_body(kid: &str) -> Result<String> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_PRIVATE_KEY_PEM.as_bytes(), kid)?;
        Ok(serde_json::to_string(&jwks)?)
    }

    fn token(kid: &str) -> Result<String> {
        Ok(sign_rs256(
            TEST_PRIVATE_KEY_PEM.as_bytes(),
            kid,
            &json!({"sub": "svc", "exp": 4_000_000_000_i64}),
        )?)
    }

    fn validator(ttl: Duration) -> JwksValidator {
        JwksValidator::new(Arc::new(JwksCache::new(reqwest::Client::new(), ttl)))
    }

    #[tokio::test]
    async fn valid_signature_reports_kid_and_alg() -> Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(jwks_body("k1")?)
            .expect(1)
            .create_async()
            .await;
        let validator = validator(DEFAULT_JWKS_TTL);
        let url = format!("{}/jwks", server.url());

        for _ in 0..2 {
            let result = validator.verify_signature(&token("k1")?, &url).await;
            assert!(result.valid);
            assert_eq!(result.key_id.as_deref(), Some("k1"));
            assert_eq!(result.algorithm.as_deref(), Some("RS256"));
        }
        // second call served from cache
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn unknown_kid_triggers_one_refetch() -> Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_body(jwks_body("k1")?)
            .expect(2)
            .create_async()
            .await;
        let validator = validator(DEFAULT_JWKS_TTL);
        let url = format!("{}/jwks", server.url());

        let result = validator.verify_signature(&token("rotated")?, &url).await;
        assert!(!result.valid);
        assert_eq!(result.error.as_deref(), Some("no matching key in JWKS"));
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn upstream_failure_is_a_result_not_an_error() -> Result<()> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/jwks")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;
        let validator = validator(DEFAULT_JWKS_TTL);

        let result = validator
            .verify_signature(&token("k1")?, &format!("{}/jwks", server.url()))
            .await;
        assert!(!result.valid);
        assert!(
            result
                .error
                .is_some_and(|e| e.contains("503") && e.contains("maintenance"))
        );

        let result = validator.verify_signature("garbage", "not a url").await;
        assert_eq!(result.error.as_deref(), Some("invalid JWKS URL"));
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() -> Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_body(jwks_body("k1")?)
            .expect(2)
            .create_async()
            .await;
        let cache = JwksCache::new(reqwest::Client::new(), DEFAULT_JWKS_TTL);
        let url = format!("{}/jwks", server.url());
        cache.get(&url).await?;
        cache.invalidate(&url).await;
        cache.get(&url).await?;
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn key_set_cache_stays_bounded() -> Result<()> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/jwks/\d+$".to_string()))
            .with_status(200)
            .with_body(jwks_body("k1")?)
            .create_async()
            .await;

        let expiring = JwksCache::new(reqwest::Client::new(), Duration::ZERO);
        let lasting = JwksCache::new(reqwest::Client::new(), DEFAULT_JWKS_TTL);
        for i in 0..200 {
            let url = format!("{}/jwks/{i}", server.url());
            expiring.get(&url).await?;
            lasting.get(&url).await?;
        }
        assert!(expiring.entries.read().await.len() < 200);
        assert_eq!(lasting.entries.read().await.len(), MAX_CACHED_KEY_SETS);
        Ok(())
    }
}
