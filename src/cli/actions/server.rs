use crate::api::{self, TrustState};
use crate::cli::{commands::issuer, telemetry};
use crate::config::NonceConfig;
use crate::nonce::{NonceEngine, NoopBus};
use crate::registry::VerifierRegistryBuilder;
use crate::session::{IssuerRegistration, SessionEngineBuilder};
use crate::token::{SigningKey, StaticKeySource};
use anyhow::{Context, Result};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, ExposeSecretMut, SecretBox, SecretSlice};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub issuer: issuer::Options,
    pub nonce: NonceConfig,
    pub trusted_proxies: Vec<IpAddr>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the signing key cannot be loaded, the issuer is invalid, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let key = load_signing_key(args.issuer.signing_key.as_deref())?;
    let keys = StaticKeySource::new().with_key(args.issuer.key_id.clone(), key);

    let mut registry = VerifierRegistryBuilder::new();
    let mut sessions = SessionEngineBuilder::new();
    sessions
        .register_issuer(
            &mut registry,
            IssuerRegistration::local(
                args.issuer.issuer.clone(),
                args.issuer.scopes.clone(),
                Arc::new(keys),
            ),
        )
        .with_context(|| format!("Could not register issuer {}", args.issuer.issuer))?;
    let sessions = sessions.build(Arc::new(registry.seal()));

    let nonces = NonceEngine::start(args.nonce, Arc::new(NoopBus))?;

    let state = Arc::new(TrustState {
        nonces,
        sessions: Arc::new(sessions),
        issuer: args.issuer.issuer,
        audience: args.issuer.audience,
        trusted_proxies: args.trusted_proxies,
    });

    let result = api::serve(args.port, state).await;
    telemetry::shutdown_tracer();
    result
}

fn load_signing_key(path: Option<&str>) -> Result<SigningKey> {
    if let Some(path) = path {
        let pem_or_der = SecretSlice::from(
            std::fs::read(path).with_context(|| format!("Could not read signing key {path}"))?,
        );
        let key = SigningKey::rs256_from_pem_or_der(pem_or_der.expose_secret())
            .with_context(|| format!("Invalid RSA signing key {path}"))?;
        info!(path, "loaded RS256 signing key");
        return Ok(key);
    }

    let mut seed = SecretBox::new(Box::new([0u8; 32]));
    OsRng.fill_bytes(seed.expose_secret_mut());
    warn!("No signing key configured, using an ephemeral Ed25519 key");
    Ok(SigningKey::ed25519_from_seed(seed.expose_secret()))
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("issuer", args.issuer.issuer.clone()),
        ("audience", args.issuer.audience.clone()),
        ("scopes", args.issuer.scopes.join(",")),
        ("key_id", args.issuer.key_id.clone()),
        (
            "trusted_proxies",
            args.trusted_proxies
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        (
            "signing_key",
            args.issuer
                .signing_key
                .clone()
                .unwrap_or_else(|| "ephemeral".to_string()),
        ),
        ("nonce_ttl", format!("{:?}", args.nonce.ttl())),
        (
            "nonce_max_concurrency",
            args.nonce.max_concurrency().to_string(),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", trustcore_banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn trustcore_banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    TRUSTCORE_BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    hash.trim().chars().take(7).collect()
}

const TRUSTCORE_BANNER: &str = r"
    .-----.
   / .---. \
   | |   | |
  _|_|___|_|_
 |    (o)    |
 |     |     |   T R U S T C O R E {VERSION}
 |___________|";
