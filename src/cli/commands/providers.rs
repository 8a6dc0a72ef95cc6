use clap::{Arg, Command};

pub const ARG_DISCOVERY_TTL: &str = "discovery-ttl-seconds";
pub const ARG_JWKS_TTL: &str = "jwks-ttl-seconds";
pub const ARG_HTTP_TIMEOUT: &str = "http-timeout-seconds";

/// Outbound calls to identity providers: discovery, JWKS and token endpoints.
#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DISCOVERY_TTL)
                .long(ARG_DISCOVERY_TTL)
                .help("Seconds a provider discovery document stays cached")
                .env("OAUTHSIM_DISCOVERY_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_JWKS_TTL)
                .long(ARG_JWKS_TTL)
                .help("Seconds a fetched JWKS stays cached")
                .env("OAUTHSIM_JWKS_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_HTTP_TIMEOUT)
                .long(ARG_HTTP_TIMEOUT)
                .help("Overall timeout for provider requests in seconds")
                .env("OAUTHSIM_HTTP_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
