use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_ISSUER: &str = "issuer";
pub const ARG_AUDIENCE: &str = "audience";
pub const ARG_SCOPES: &str = "scopes";
pub const ARG_SIGNING_KEY: &str = "signing-key";
pub const ARG_KEY_ID: &str = "key-id";

/// Local issuer settings.
#[derive(Debug, Clone)]
pub struct Options {
    pub issuer: String,
    pub audience: String,
    pub scopes: Vec<String>,
    /// Path to a PEM or DER RSA private key; an ephemeral Ed25519 key is used when absent.
    pub signing_key: Option<String>,
    pub key_id: String,
}

impl Options {
    /// Parse issuer arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let issuer =
            get_non_empty(ARG_ISSUER).context("missing required argument: --issuer")?;
        let audience =
            get_non_empty(ARG_AUDIENCE).context("missing required argument: --audience")?;
        let key_id = get_non_empty(ARG_KEY_ID).context("missing required argument: --key-id")?;

        let scopes: Vec<String> = matches
            .get_many::<String>(ARG_SCOPES)
            .into_iter()
            .flatten()
            .map(|scope| scope.trim().to_string())
            .filter(|scope| !scope.is_empty())
            .collect();

        Ok(Self {
            issuer,
            audience,
            scopes,
            signing_key: get_non_empty(ARG_SIGNING_KEY),
            key_id,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Issuer URI of this node (iss), also its verifier realm")
                .default_value("http://localhost:8080")
                .env("TRUSTCORE_ISSUER"),
        )
        .arg(
            Arg::new(ARG_AUDIENCE)
                .long(ARG_AUDIENCE)
                .help("Audience (aud) bearer tokens must be issued for")
                .default_value("trustcore")
                .env("TRUSTCORE_AUDIENCE"),
        )
        .arg(
            Arg::new(ARG_SCOPES)
                .long(ARG_SCOPES)
                .help("Comma separated scopes the issuer may grant")
                .default_value("openid")
                .env("TRUSTCORE_SCOPES")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_SIGNING_KEY)
                .long(ARG_SIGNING_KEY)
                .help("Path to the RSA private key (PEM or DER) used to sign tokens")
                .long_help(
                    "Path to the RSA private key (PKCS#8 or PKCS#1, PEM or DER) used to sign RS256 tokens.\n\nWhen omitted, an ephemeral Ed25519 key is generated at startup and tokens issued before a restart stop verifying.",
                )
                .env("TRUSTCORE_SIGNING_KEY"),
        )
        .arg(
            Arg::new(ARG_KEY_ID)
                .long(ARG_KEY_ID)
                .help("Key id (kid) stamped into issued tokens")
                .default_value("trustcore-1")
                .env("TRUSTCORE_KEY_ID"),
        )
}
