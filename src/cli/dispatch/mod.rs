use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{self, issuer, nonce};
use anyhow::Result;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);

    Ok(Action::Server(Args {
        port,
        issuer: issuer::Options::parse(matches)?,
        nonce: nonce::config(matches),
        trusted_proxies: commands::trusted_proxies(matches),
    }))
}
