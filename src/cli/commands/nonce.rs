use crate::config::NonceConfig;
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_NONCE_TTL: &str = "nonce-ttl";
pub const ARG_NONCE_MAX_CONCURRENCY: &str = "nonce-max-concurrency";

#[must_use]
pub fn config(matches: &ArgMatches) -> NonceConfig {
    let defaults = NonceConfig::new();
    let ttl = matches
        .get_one::<u64>(ARG_NONCE_TTL)
        .map_or(defaults.ttl(), |ms| Duration::from_millis(*ms));
    let max_concurrency = matches
        .get_one::<usize>(ARG_NONCE_MAX_CONCURRENCY)
        .copied()
        .unwrap_or(defaults.max_concurrency());

    defaults.with_ttl(ttl).with_max_concurrency(max_concurrency)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_NONCE_TTL)
                .long(ARG_NONCE_TTL)
                .help("Nonce lifetime in milliseconds")
                .default_value("120000")
                .env("TRUSTCORE_NONCE_TTL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_NONCE_MAX_CONCURRENCY)
                .long(ARG_NONCE_MAX_CONCURRENCY)
                .help("Concurrent nonce requests tracked per client address")
                .long_help(
                    "Concurrent nonce requests tracked per client address. Requests beyond the limit still receive a nonce, but it is not tracked and will fail validation.",
                )
                .default_value("5")
                .env("TRUSTCORE_NONCE_MAX_CONCURRENCY")
                .value_parser(clap::value_parser!(usize)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library_defaults() {
        temp_env::with_vars_unset(
            ["TRUSTCORE_NONCE_TTL", "TRUSTCORE_NONCE_MAX_CONCURRENCY"],
            || {
                let matches = with_args(Command::new("trustcore")).get_matches_from(["trustcore"]);
                let config = config(&matches);
                assert_eq!(config.ttl(), NonceConfig::new().ttl());
                assert_eq!(config.max_concurrency(), 5);
            },
        );
    }

    #[test]
    fn reads_environment() {
        temp_env::with_vars(
            [
                ("TRUSTCORE_NONCE_TTL", Some("750")),
                ("TRUSTCORE_NONCE_MAX_CONCURRENCY", Some("2")),
            ],
            || {
                let matches = with_args(Command::new("trustcore")).get_matches_from(["trustcore"]);
                let config = config(&matches);
                assert_eq!(config.ttl(), Duration::from_millis(750));
                assert_eq!(config.max_concurrency(), 2);
            },
        );
    }
}
