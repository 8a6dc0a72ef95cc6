use crate::{
    api::{self, AppConfig, AppState},
    auth::password::hash_password,
    cli::telemetry,
    store::{CredentialStore, MemoryStore, PgStore, UserInsert},
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{fmt::Write as _, sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    /// `None` keeps every record in memory.
    pub dsn: Option<String>,
    pub admin_password: Option<SecretString>,
    pub config: AppConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the configuration is
/// invalid, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let store = open_store(args.dsn.as_deref()).await?;
    if let Some(password) = &args.admin_password {
        seed_admin(store.as_ref(), &args.config.admin_username, password).await?;
    }

    let state = Arc::new(AppState::new(args.config, store)?);
    let result = api::new(args.port, state).await;
    telemetry::shutdown_tracer();
    result
}

async fn open_store(dsn: Option<&str>) -> Result<Arc<dyn CredentialStore>> {
    let Some(dsn) = dsn else {
        warn!("No --dsn given: using the in-memory store, records are lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    let store = PgStore::new(pool);
    store.migrate().await.context("Failed to apply schema")?;
    Ok(Arc::new(store))
}

/// Create the admin account when it is missing. An existing account is left alone.
async fn seed_admin(
    store: &dyn CredentialStore,
    username: &str,
    password: &SecretString,
) -> Result<()> {
    if store.get_user_by_username(username).await?.is_some() {
        return Ok(());
    }
    let hash = hash_password(password.expose_secret())?;
    match store.create_user(username, &hash, None).await? {
        UserInsert::Created(user) => info!(user = %user.id, "admin account '{username}' created"),
        UserInsert::UsernameTaken => {}
    }
    Ok(())
}

fn log_startup_args(args: &Args) {
    let config = &args.config;
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "store",
            args.dsn
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_dsn),
        ),
        ("public_url", config.public_url.clone()),
        ("session_ttl_seconds", config.session_ttl_seconds.to_string()),
        (
            "mfa_ticket_ttl_seconds",
            config.mfa_ticket_ttl.as_secs().to_string(),
        ),
        ("totp_issuer", config.totp_issuer.clone()),
        (
            "rp_id",
            config
                .rp_id
                .clone()
                .unwrap_or_else(|| "from public_url".to_string()),
        ),
        (
            "discovery_ttl_seconds",
            config.discovery_ttl.as_secs().to_string(),
        ),
        ("jwks_ttl_seconds", config.jwks_ttl.as_secs().to_string()),
        (
            "http_timeout_seconds",
            config.http_timeout.as_secs().to_string(),
        ),
        ("admin_username", config.admin_username.clone()),
        (
            "admin_password_set",
            args.admin_password.is_some().to_string(),
        ),
    ];
    info!("{}", startup_message(&entries));
}

fn startup_message(entries: &[(&str, String)]) -> String {
    let width = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\nStartup configuration:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(width.saturating_sub(key.len()));
        let _ = write!(message, "\n  {key}:{padding} {value}");
    }
    message
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn banner() -> String {
    let hash = crate::GIT_COMMIT_HASH.trim();
    let short = hash.get(..7).unwrap_or(hash);
    BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {short}", env!("CARGO_PKG_VERSION")),
    )
}

const BANNER: &str = r"
    .-----.
   /  o o  \      O A U T H S I M {VERSION}
  |   ---   |
   \_______/   -> authorize -> callback -> token";
