use super::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::{IpAddr, SocketAddr};
use subtle::ConstantTimeEq;

const MAX_USER_AGENT_LEN: usize = 1024;

static USER_AGENT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[\x20-\x7E]+$").ok());

/// Client binding: `sha256(canonical_address || user_agent)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbprint([u8; 32]);

impl Thumbprint {
    #[must_use]
    pub fn compute(address: &[u8; 16], user_agent: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(address);
        hasher.update(user_agent.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Constant-time comparison.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

/// A nonce bound to the client that requested it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub nonce: String,
    pub thumbprint: Thumbprint,
}

/// Parse a client address (`ip` or `ip:port`) into its 16-byte IPv6 form.
///
/// IPv4 addresses are mapped (`::ffff:a.b.c.d`) so both families share one key space.
///
/// # Errors
///
/// Returns [`Error::InvalidAddress`] if `remote_address` is not an IP address.
pub fn canonical_address(remote_address: &str) -> Result<[u8; 16], Error> {
    let trimmed = remote_address.trim();
    let ip = trimmed
        .parse::<IpAddr>()
        .or_else(|_| trimmed.parse::<SocketAddr>().map(|addr| addr.ip()))
        .map_err(|_| Error::InvalidAddress(remote_address.to_string()))?;

    Ok(match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    })
}

/// Check a user agent is non-empty printable ASCII of bounded length.
///
/// # Errors
///
/// Returns [`Error::InvalidUserAgent`] otherwise.
pub fn check_user_agent(user_agent: &str) -> Result<(), Error> {
    let valid = user_agent.len() <= MAX_USER_AGENT_LEN
        && USER_AGENT
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(user_agent));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidUserAgent)
    }
}

/// Canonical address and thumbprint for a request.
///
/// # Errors
///
/// Returns an error if the address or user agent is invalid.
pub fn binding(remote_address: &str, user_agent: &str) -> Result<([u8; 16], Thumbprint), Error> {
    check_user_agent(user_agent)?;
    let address = canonical_address(remote_address)?;
    Ok((address, Thumbprint::compute(&address, user_agent)))
}
