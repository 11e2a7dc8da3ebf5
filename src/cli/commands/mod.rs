pub mod issuer;
pub mod nonce;

use clap::{
    Arg, ArgAction, ArgMatches, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::net::IpAddr;

pub const ARG_PORT: &str = "port";
pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_TRUSTED_PROXIES: &str = "trusted-proxies";

/// Reverse proxies allowed to report the client address.
#[must_use]
pub fn trusted_proxies(matches: &ArgMatches) -> Vec<IpAddr> {
    matches
        .get_many::<IpAddr>(ARG_TRUSTED_PROXIES)
        .into_iter()
        .flatten()
        .map(IpAddr::to_canonical)
        .collect()
}

/// Parse a log level given as a count (`0..=5`) or a level name.
///
/// # Errors
///
/// Returns an error for anything else.
pub fn parse_log_level(level: &str) -> Result<u8, String> {
    if let Ok(parsed) = level.parse::<u8>()
        && parsed <= 5
    {
        return Ok(parsed);
    }

    ["error", "warn", "info", "debug", "trace"]
        .iter()
        .position(|name| name.eq_ignore_ascii_case(level.trim()))
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| format!("invalid log level: {level}"))
}

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

    let command = Command::new("trustcore")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("TRUSTCORE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_TRUSTED_PROXIES)
                .long(ARG_TRUSTED_PROXIES)
                .help("Comma separated proxy addresses whose X-Forwarded-For is trusted")
                .long_help(
                    "Comma separated IP addresses of reverse proxies in front of this service.\n\nX-Forwarded-For and X-Real-IP are only read from these peers; every other request is keyed by its socket address.",
                )
                .env("TRUSTCORE_TRUSTED_PROXIES")
                .value_delimiter(',')
                .value_parser(clap::value_parser!(IpAddr)),
        )
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("TRUSTCORE_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(parse_log_level),
        );

    let command = issuer::with_args(command);
    nonce::with_args(command)
}
