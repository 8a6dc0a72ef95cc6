use clap::{Arg, Command};

pub const ARG_SESSION_SECRET: &str = "session-secret";
pub const ARG_SESSION_TTL: &str = "session-ttl-seconds";
pub const ARG_MFA_TICKET_TTL: &str = "mfa-ticket-ttl-seconds";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";
pub const ARG_RP_ID: &str = "rp-id";
pub const ARG_RP_NAME: &str = "rp-name";
pub const ARG_ADMIN_USERNAME: &str = "admin-username";
pub const ARG_ADMIN_PASSWORD: &str = "admin-password";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    let command = with_second_factor_args(command);
    with_admin_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_SECRET)
                .long(ARG_SESSION_SECRET)
                .help("HMAC key for session tokens (at least 32 bytes)")
                .env("OAUTHSIM_SESSION_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Session lifetime in seconds, capped at 86400")
                .env("OAUTHSIM_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

fn with_second_factor_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MFA_TICKET_TTL)
                .long(ARG_MFA_TICKET_TTL)
                .help("Seconds a password-verified login waits for its TOTP code")
                .env("OAUTHSIM_MFA_TICKET_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer shown by authenticator apps")
                .env("OAUTHSIM_TOTP_ISSUER")
                .default_value("OAuth Simulator"),
        )
        .arg(
            Arg::new(ARG_RP_ID)
                .long(ARG_RP_ID)
                .help("WebAuthn relying party id (default: host of --public-url)")
                .env("OAUTHSIM_RP_ID"),
        )
        .arg(
            Arg::new(ARG_RP_NAME)
                .long(ARG_RP_NAME)
                .help("WebAuthn relying party display name")
                .env("OAUTHSIM_RP_NAME"),
        )
}

fn with_admin_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ADMIN_USERNAME)
                .long(ARG_ADMIN_USERNAME)
                .help("Username allowed to use the admin endpoints")
                .env("OAUTHSIM_ADMIN_USERNAME")
                .default_value("admin"),
        )
        .arg(
            Arg::new(ARG_ADMIN_PASSWORD)
                .long(ARG_ADMIN_PASSWORD)
                .help("Create the admin account with this password if it does not exist")
                .env("OAUTHSIM_ADMIN_PASSWORD")
                .hide_env_values(true),
        )
}
