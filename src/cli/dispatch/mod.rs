use crate::{
    api::AppConfig,
    cli::{
        actions::{Action, server::Args},
        commands::{ARG_DSN, ARG_PORT, ARG_PUBLIC_URL, auth, providers},
    },
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::time::Duration;

fn string(matches: &clap::ArgMatches, id: &str) -> Option<String> {
    matches
        .get_one::<String>(id)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn seconds(matches: &clap::ArgMatches, id: &str) -> Result<Duration> {
    matches
        .get_one::<u64>(id)
        .copied()
        .map(Duration::from_secs)
        .with_context(|| format!("missing argument: --{id}"))
}

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let session_secret = matches
        .get_one::<String>(auth::ARG_SESSION_SECRET)
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --session-secret")?;

    let config = AppConfig {
        public_url: string(matches, ARG_PUBLIC_URL)
            .context("missing required argument: --public-url")?,
        session_secret,
        session_ttl_seconds: matches
            .get_one::<i64>(auth::ARG_SESSION_TTL)
            .copied()
            .context("missing argument: --session-ttl-seconds")?,
        mfa_ticket_ttl: seconds(matches, auth::ARG_MFA_TICKET_TTL)?,
        totp_issuer: string(matches, auth::ARG_TOTP_ISSUER)
            .context("missing argument: --totp-issuer")?,
        rp_id: string(matches, auth::ARG_RP_ID),
        rp_name: string(matches, auth::ARG_RP_NAME),
        discovery_ttl: seconds(matches, providers::ARG_DISCOVERY_TTL)?,
        jwks_ttl: seconds(matches, providers::ARG_JWKS_TTL)?,
        http_timeout: seconds(matches, providers::ARG_HTTP_TIMEOUT)?,
        admin_username: string(matches, auth::ARG_ADMIN_USERNAME)
            .context("missing argument: --admin-username")?,
    };

    Ok(Action::Server(Args {
        port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(3000),
        dsn: string(matches, ARG_DSN),
        admin_password: matches
            .get_one::<String>(auth::ARG_ADMIN_PASSWORD)
            .filter(|value| !value.is_empty())
            .cloned()
            .map(SecretString::from),
        config,
    }))
}
