//! Router tests: the full middleware stack over an in-memory store.

use super::{AppConfig, AppState, app};
use crate::{
    store::{CredentialStore, MemoryStore},
    unix_now,
    webauthn::test_support::soft_passkey,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        Method, Request, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
    },
    response::Response,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    store: Arc<MemoryStore>,
}

fn config() -> AppConfig {
    AppConfig {
        public_url: "http://localhost:3000".to_string(),
        session_secret: SecretString::from("0123456789abcdef0123456789abcdef"),
        session_ttl_seconds: 3600,
        mfa_ticket_ttl: Duration::from_secs(300),
        totp_issuer: "OAuth Simulator".to_string(),
        rp_id: None,
        rp_name: None,
        discovery_ttl: Duration::from_secs(60),
        jwks_ttl: Duration::from_secs(60),
        http_timeout: Duration::from_secs(5),
        admin_username: "admin".to_string(),
    }
}

impl TestApp {
    fn new() -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(AppState::new(config(), store.clone())?);
        Ok(Self {
            router: app(state.clone())?,
            state,
            store,
        })
    }

    async fn send(&self, request: Request<Body>) -> Result<Response> {
        Ok(self.router.clone().oneshot(request).await?)
    }

    async fn json(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value, Response)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };
        let response = self.send(request).await?;
        let status = response.status();
        let (parts, body) = response.into_parts();
        let bytes = to_bytes(body, usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value, Response::from_parts(parts, Body::empty())))
    }

    /// Register `username` and return the `name=value` session cookie.
    async fn register(&self, username: &str) -> Result<String> {
        let (status, _, response) = self
            .json(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "username": username,
                    "password": "hunter22",
                    "confirmPassword": "hunter22",
                })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED);
        session_cookie(&response)
    }
}

fn session_cookie(response: &Response) -> Result<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("oauthsim_session="))
        .and_then(|value| value.split(';').next())
        .map(str::to_string)
        .context("no session cookie")
}

fn location(response: &Response) -> Result<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .context("no location header")
}

fn client_body(token_url: &str) -> Value {
    json!({
        "name": "Demo",
        "clientId": "demo-client",
        "clientSecret": "demo-secret",
        "authorizeUrl": "https://idp.example.test/authorize",
        "tokenUrl": token_url,
        "redirectUri": "http://localhost:3000/api/oauth/callback",
        "scope": "openid profile",
    })
}

fn unsigned_token(claims: &Value) -> Result<String> {
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json!({"alg": "none"}))?);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    Ok(format!("{header}.{payload}."))
}

#[tokio::test]
async fn health_reports_store_and_app_header() -> Result<()> {
    let app = TestApp::new()?;
    let (status, body, response) = app.json(Method::GET, "/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "ok");
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    assert!(response.headers().contains_key("x-app"));
    assert!(response.headers().contains_key("x-request-id"));
    Ok(())
}

#[tokio::test]
async fn register_mismatch_touches_nothing() -> Result<()> {
    let app = TestApp::new()?;
    let (status, body, response) = app
        .json(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "username": "alice",
                "password": "one",
                "confirmPassword": "two",
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"success": false, "error": "Passwords do not match"}));
    assert!(response.headers().get(SET_COOKIE).is_none());
    assert!(app.store.list_users().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn register_session_logout() -> Result<()> {
    let app = TestApp::new()?;
    let cookie = app.register("alice").await?;

    let (status, body, _) = app
        .json(Method::GET, "/api/auth/session", Some(&cookie), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["isAdmin"], false);

    let (status, _, _) = app.json(Method::GET, "/api/auth/session", None, None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, response) = app
        .json(Method::POST, "/api/auth/logout", Some(&cookie), None)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let cleared = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(cleared.starts_with("oauthsim_session=;"));
    assert!(cleared.contains("Max-Age=0"));
    Ok(())
}

#[tokio::test]
async fn login_failures_share_a_message() -> Result<()> {
    let app = TestApp::new()?;
    app.register("alice").await?;

    for (username, password) in [("alice", "wrong"), ("nobody", "hunter22")] {
        let (status, body, _) = app
            .json(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({"username": username, "password": password})),
            )
            .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");
    }
    Ok(())
}

#[tokio::test]
async fn login_with_totp_requires_ticket_and_code() -> Result<()> {
    let app = TestApp::new()?;
    app.register("alice").await?;
    let user = app
        .store
        .get_user_by_username("alice")
        .await?
        .context("user")?;
    let enrollment = app.state.auth.generate_totp_secret(&user)?;
    app.store
        .update_user_totp_secret(user.id, Some(&enrollment.secret))
        .await?;

    let (status, body, response) = app
        .json(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"username": "alice", "password": "hunter22"})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["mfaRequired"], true);
    assert!(response.headers().get(SET_COOKIE).is_none());
    let ticket = body["mfaTicket"].as_str().context("ticket")?.to_string();

    let now = u64::try_from(unix_now())?;
    let code = app.state.auth.totp().code_at(&enrollment.secret, now)?;
    let (status, body, response) = app
        .json(
            Method::POST,
            "/api/auth/login/mfa",
            None,
            Some(json!({"username": "alice", "ticket": ticket, "code": code})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["mfaEnabled"], true);
    session_cookie(&response)?;

    // Tickets are single use.
    let (status, _, _) = app
        .json(
            Method::POST,
            "/api/auth/login/mfa",
            None,
            Some(json!({"username": "alice", "ticket": ticket, "code": code})),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn clients_are_scoped_to_their_owner() -> Result<()> {
    let app = TestApp::new()?;
    let alice = app.register("alice").await?;
    let bob = app.register("bob").await?;

    let (status, created, _) = app
        .json(
            Method::POST,
            "/api/clients",
            Some(&alice),
            Some(client_body("https://idp.example.test/token")),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().context("id")?.to_string();

    let (status, listed, _) = app
        .json(Method::GET, "/api/clients", Some(&alice), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let uri = format!("/api/clients/{id}");
    let (status, _, _) = app.json(Method::GET, &uri, Some(&bob), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = app.json(Method::DELETE, &uri, Some(&bob), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut relative = client_body("/token");
    relative["name"] = json!("Broken");
    let (status, body, _) = app
        .json(Method::PUT, &uri, Some(&alice), Some(relative))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap_or_default().contains("tokenUrl"));

    let (status, _, _) = app.json(Method::DELETE, &uri, Some(&alice), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = app.json(Method::GET, "/api/clients", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn client_credentials_grant_returns_tagged_tokens() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded(
            "grant_type".into(),
            "client_credentials".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"abc","token_type":"Bearer","expires_in":3600}"#)
        .create_async()
        .await;

    let app = TestApp::new()?;
    let cookie = app.register("alice").await?;
    let (_, created, _) = app
        .json(
            Method::POST,
            "/api/clients",
            Some(&cookie),
            Some(client_body(&format!("{}/token", server.url()))),
        )
        .await?;
    let id = created["id"].as_str().context("id")?;

    let (status, body, _) = app
        .json(
            Method::POST,
            &format!("/api/clients/{id}/client-credentials"),
            Some(&cookie),
            None,
        )
        .await?;
    token.assert_async().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tokens"]["grant_type"], "client_credentials");
    assert_eq!(body["tokens"]["access_token"], "abc");
    assert_eq!(body["displayed"][0]["name"], "access_token");
    Ok(())
}

#[tokio::test]
async fn client_credentials_shows_quoted_expires_in() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _token = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"a","token_type":"Bearer","expires_in":"3600"}"#)
        .create_async()
        .await;

    let app = TestApp::new()?;
    let cookie = app.register("alice").await?;
    let (_, created, _) = app
        .json(
            Method::POST,
            "/api/clients",
            Some(&cookie),
            Some(client_body(&format!("{}/token", server.url()))),
        )
        .await?;
    let id = created["id"].as_str().context("id")?;

    let (status, body, _) = app
        .json(
            Method::POST,
            &format!("/api/clients/{id}/client-credentials"),
            Some(&cookie),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tokens"]["expires_in"], "3600");
    Ok(())
}

#[tokio::test]
async fn token_endpoint_errors_are_shown_verbatim() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _token = server
        .mock("POST", "/token")
        .with_status(401)
        .with_body(r#"{"error":"invalid_client"}"#)
        .create_async()
        .await;

    let app = TestApp::new()?;
    let cookie = app.register("alice").await?;
    let (_, created, _) = app
        .json(
            Method::POST,
            "/api/clients",
            Some(&cookie),
            Some(client_body(&format!("{}/token", server.url()))),
        )
        .await?;
    let id = created["id"].as_str().context("id")?;

    let (status, body, _) = app
        .json(
            Method::POST,
            &format!("/api/clients/{id}/client-credentials"),
            Some(&cookie),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        body["error"],
        r#"Client credentials flow failed: 401 Unauthorized - {"error":"invalid_client"}"#
    );
    Ok(())
}

#[tokio::test]
async fn authorization_code_round_trip() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _token = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            mockito::Matcher::UrlEncoded("code".into(), "the-code".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"at","refresh_token":"rt"}"#)
        .create_async()
        .await;

    let app = TestApp::new()?;
    let cookie = app.register("alice").await?;
    let (_, created, _) = app
        .json(
            Method::POST,
            "/api/clients",
            Some(&cookie),
            Some(client_body(&format!("{}/token", server.url()))),
        )
        .await?;
    let id = created["id"].as_str().context("id")?.to_string();

    let (status, body, _) = app
        .json(
            Method::POST,
            &format!("/api/clients/{id}/authorize"),
            Some(&cookie),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    let url = url::Url::parse(body["url"].as_str().context("url")?)?;
    let state = url
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .context("state")?;
    assert_ne!(state, id);

    // The provider callback carries no session cookie.
    let callback = format!("/api/oauth/callback?code=the-code&state={state}");
    let (status, _, response) = app.json(Method::GET, &callback, None, None).await?;
    assert_eq!(status, StatusCode::FOUND);
    let target = location(&response)?;
    assert!(target.starts_with(&format!("/client/{id}?success=true&tokens=")));
    assert!(target.contains("authorization_code"));

    // Replaying the state fails.
    let (status, _, response) = app.json(Method::GET, &callback, None, None).await?;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location(&response)?, "/?error=Invalid+or+expired+state");
    Ok(())
}

#[tokio::test]
async fn oauth_callback_without_code_redirects_with_error() -> Result<()> {
    let app = TestApp::new()?;
    let (status, _, response) = app
        .json(Method::GET, "/api/oauth/callback", None, None)
        .await?;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location(&response)?, "/?error=Missing+code+or+state");
    Ok(())
}

#[tokio::test]
async fn decode_rejects_non_jwts() -> Result<()> {
    let app = TestApp::new()?;
    let cookie = app.register("alice").await?;
    let (status, body, _) = app
        .json(
            Method::POST,
            "/api/tokens/decode",
            Some(&cookie),
            Some(json!({"token": "not.a.jwt"})),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid JWT format");

    let token = unsigned_token(&json!({"sub": "svc"}))?;
    let (status, body, _) = app
        .json(
            Method::POST,
            "/api/tokens/decode",
            Some(&cookie),
            Some(json!({ "token": token })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payload"]["sub"], "svc");
    Ok(())
}

#[tokio::test]
async fn endpoint_requires_a_bearer_token() -> Result<()> {
    let app = TestApp::new()?;
    let (status, body, _) = app.json(Method::GET, "/api/endpoint", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Missing or invalid Authorization header");

    let request = Request::builder()
        .uri("/api/endpoint")
        .header(AUTHORIZATION, "Bearer garbage")
        .body(Body::empty())?;
    let response = app.send(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body["error"], "Invalid JWT format");

    let expired = unsigned_token(&json!({"sub": "svc", "exp": 1}))?;
    let request = Request::builder()
        .uri("/api/endpoint")
        .header(AUTHORIZATION, format!("Bearer {expired}"))
        .body(Body::empty())?;
    let response = app.send(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body["error"], "Token expired");
    assert_eq!(body["tokenClaims"]["sub"], "svc");
    Ok(())
}

#[tokio::test]
async fn endpoint_echoes_request() -> Result<()> {
    let app = TestApp::new()?;
    let token = unsigned_token(&json!({"sub": "svc", "exp": unix_now() + 600}))?;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/endpoint")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .header(COOKIE, "oauthsim_session=secret")
        .header("x-demo", "1")
        .body(Body::from(r#"{"hello":"world"}"#))?;
    let response = app.send(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body["success"], true);
    assert_eq!(body["method"], "POST");
    assert_eq!(body["receivedPayload"], json!({"hello": "world"}));
    assert_eq!(
        body["signatureValidation"],
        json!({"validated": false, "message": "Signature validation skipped"})
    );
    assert_eq!(body["receivedHeaders"]["x-demo"], "1");
    assert!(body["receivedHeaders"].get("authorization").is_none());
    assert!(body["receivedHeaders"].get("cookie").is_none());

    let request = Request::builder()
        .uri("/api/endpoint?a=1&b=two")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?;
    let response = app.send(request).await?;
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body["queryParameters"], json!({"a": "1", "b": "two"}));
    assert!(body.get("receivedPayload").is_none());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/endpoint")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from("{not json"))?;
    let response = app.send(request).await?;
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(
        body["receivedPayload"],
        json!({"error": "Could not parse JSON body"})
    );
    Ok(())
}

#[tokio::test]
async fn admin_routes_hide_from_other_users() -> Result<()> {
    let app = TestApp::new()?;
    let alice = app.register("alice").await?;
    let (status, _, _) = app
        .json(Method::GET, "/api/admin/settings", Some(&alice), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = app.json(Method::GET, "/api/admin/users", None, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn admin_settings_never_return_the_secret() -> Result<()> {
    let app = TestApp::new()?;
    let admin = app.register("admin").await?;

    let (status, body, _) = app
        .json(
            Method::PUT,
            "/api/admin/settings",
            Some(&admin),
            Some(json!({
                "enableOidcLogin": true,
                "oidcIssuer": "https://idp.example.test",
                "oidcClientId": "oauthsim",
                "oidcClientSecret": "s3cret",
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["oidcClientSecretSet"], true);
    assert_eq!(
        body["oidcRedirectUri"],
        "http://localhost:3000/api/auth/oidc/callback"
    );

    let (_, body, _) = app
        .json(Method::GET, "/api/admin/settings", Some(&admin), None)
        .await?;
    assert!(body.get("oidcClientSecret").is_none());
    assert!(!body.to_string().contains("s3cret"));

    let (status, body, _) = app
        .json(
            Method::PUT,
            "/api/admin/settings",
            Some(&admin),
            Some(json!({"oidcIssuer": "not a url"})),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid issuer URL");
    Ok(())
}

#[tokio::test]
async fn admin_user_management() -> Result<()> {
    let app = TestApp::new()?;
    let admin = app.register("admin").await?;
    let alice = app.register("alice").await?;
    app.register("bob").await?;

    let users = app.store.list_users().await?;
    let id_of = |name: &str| {
        users
            .iter()
            .find(|user| user.username == name)
            .map(|user| user.id)
            .ok_or_else(|| anyhow!("missing {name}"))
    };
    let (admin_id, alice_id, bob_id) = (id_of("admin")?, id_of("alice")?, id_of("bob")?);

    let (status, _, _) = app
        .json(
            Method::POST,
            "/api/clients",
            Some(&alice),
            Some(client_body("https://idp.example.test/token")),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, _) = app
        .json(
            Method::POST,
            &format!("/api/admin/users/{alice_id}/disable"),
            Some(&admin),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = app
        .json(Method::GET, "/api/auth/session", Some(&alice), None)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = app
        .json(
            Method::POST,
            &format!("/api/admin/users/{admin_id}/disable"),
            Some(&admin),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body, _) = app
        .json(
            Method::POST,
            "/api/admin/users/merge",
            Some(&admin),
            Some(json!({"sourceUserId": bob_id, "targetUserId": bob_id})),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot merge a user into itself");

    let (status, body, _) = app
        .json(
            Method::POST,
            "/api/admin/users/merge",
            Some(&admin),
            Some(json!({"sourceUserId": alice_id, "targetUserId": bob_id})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["movedClients"], 1);
    assert!(app.store.get_user_by_id(alice_id).await?.is_none());
    assert_eq!(app.store.list_clients(bob_id).await?.len(), 1);

    let (status, _, _) = app
        .json(
            Method::DELETE,
            &format!("/api/admin/users/{bob_id}"),
            Some(&admin),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn oidc_login_disabled_redirects_to_login_page() -> Result<()> {
    let app = TestApp::new()?;
    let (status, _, response) = app
        .json(Method::GET, "/api/auth/oidc/login", None, None)
        .await?;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(
        location(&response)?,
        "/login?error=OIDC+login+is+disabled"
    );
    assert!(response.headers().get(SET_COOKIE).is_none());
    Ok(())
}

#[tokio::test]
async fn oidc_discovery_failure_hides_upstream_body() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _discovery = server
        .mock("GET", "/.well-known/openid-configuration")
        .with_status(500)
        .with_body("java.lang.NullPointerException at com.idp.Internal")
        .create_async()
        .await;

    let app = TestApp::new()?;
    let admin = app.register("admin").await?;
    let (status, _, _) = app
        .json(
            Method::PUT,
            "/api/admin/settings",
            Some(&admin),
            Some(json!({
                "enableOidcLogin": true,
                "oidcIssuer": server.url(),
                "oidcClientId": "oauthsim",
                "oidcClientSecret": "s3cret",
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _, response) = app
        .json(Method::GET, "/api/auth/oidc/login", None, None)
        .await?;
    assert_eq!(status, StatusCode::FOUND);
    let location = location(&response)?;
    assert!(location.starts_with("/login?error=Provider+discovery+failed"));
    assert!(!location.contains("NullPointer"));
    Ok(())
}

#[tokio::test]
async fn oidc_callback_clears_cookies_on_state_mismatch() -> Result<()> {
    let app = TestApp::new()?;
    let request = Request::builder()
        .uri("/api/auth/oidc/callback?code=c&state=evil")
        .header(COOKIE, "oidc_state=good; oidc_nonce=n")
        .body(Body::empty())?;
    let response = app.send(request).await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response)?.starts_with("/login?error="));
    let cleared: Vec<&str> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    assert!(cleared.iter().any(|c| c.starts_with("oidc_state=;")));
    assert!(cleared.iter().any(|c| c.starts_with("oidc_nonce=;")));
    assert!(!cleared.iter().any(|c| c.starts_with("oauthsim_session=")));
    Ok(())
}

#[tokio::test]
async fn passkey_enrollment_and_login() -> Result<()> {
    let app = TestApp::new()?;
    let cookie = app.register("alice").await?;
    let mut device = soft_passkey();

    let (status, options, _) = app
        .json(
            Method::POST,
            "/api/passkeys/register/options",
            Some(&cookie),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(options["publicKey"]["rp"]["id"], "localhost");
    let registration = device.register(serde_json::from_value(options)?)?;
    let (status, body, _) = app
        .json(
            Method::POST,
            "/api/passkeys/register/verify",
            Some(&cookie),
            Some(serde_json::to_value(&registration)?),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["credentialId"], registration.id.trim_end_matches('='));

    let (status, options, _) = app
        .json(
            Method::POST,
            "/api/passkeys/login/options",
            None,
            Some(json!({"username": "alice"})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    let assertion = device.authenticate(serde_json::from_value(options)?)?;
    let (status, body, response) = app
        .json(
            Method::POST,
            "/api/passkeys/login/verify",
            None,
            Some(json!({"username": "alice", "response": assertion})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "alice");
    session_cookie(&response)?;

    // Verifying again without a fresh challenge is refused.
    let (status, _, _) = app
        .json(
            Method::POST,
            "/api/passkeys/login/verify",
            None,
            Some(json!({"username": "alice", "response": assertion})),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn malformed_passkey_response_is_a_bad_request() -> Result<()> {
    let app = TestApp::new()?;
    let cookie = app.register("alice").await?;
    app.json(
        Method::POST,
        "/api/passkeys/register/options",
        Some(&cookie),
        None,
    )
    .await?;
    let (status, body, _) = app
        .json(
            Method::POST,
            "/api/passkeys/register/verify",
            Some(&cookie),
            Some(json!({"id": "x"})),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|error| error.starts_with("Invalid WebAuthn response"))
    );
    Ok(())
}
