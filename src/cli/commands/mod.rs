pub mod auth;
pub mod logging;
pub mod providers;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_PUBLIC_URL: &str = "public-url";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("oauthsim")
        .about("OAuth 2.0 and OpenID Connect client simulator")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("3000")
                .env("OAUTHSIM_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("PostgreSQL connection string")
                .long_help(
                    "PostgreSQL connection string. When omitted, records live in memory and are lost on restart.",
                )
                .env("OAUTHSIM_DSN"),
        )
        .arg(
            Arg::new(ARG_PUBLIC_URL)
                .long(ARG_PUBLIC_URL)
                .help("Externally visible base URL, used for redirects, CORS and WebAuthn")
                .env("OAUTHSIM_PUBLIC_URL")
                .default_value("http://localhost:3000"),
        );

    let command = auth::with_args(command);
    let command = providers::with_args(command);
    logging::with_args(command)
}
