//! # Trustcore (Identity & Session Trust Core)
//!
//! `trustcore` decides who a caller is, hands out short-lived session credentials
//! bound to that identity, and defends interactive flows against replay.
//!
//! ## Verifier Registry
//!
//! Every authentication realm has exactly one verifier. The registry is assembled
//! once at startup through [`registry::VerifierRegistryBuilder`] and sealed into an
//! immutable [`registry::VerifierRegistry`]. Identity wrappers (impersonation,
//! delegation) are unwrapped before dispatch, with cycle detection.
//!
//! ## Nonce Engine
//!
//! [`nonce::NonceEngine`] issues single-use numbers bound to a client thumbprint
//! (`sha256(address || user-agent)`), limits concurrent issuance per address and
//! keeps peers in sync through a [`nonce::ChallengeBus`]. Issuance is fail-open:
//! bad input still yields a well-formed but untracked value.
//!
//! ## Session Token Engine
//!
//! [`session::SessionEngine`] signs access tokens (and optionally refresh tokens)
//! for a primary principal plus scope and attribute claims. Issuers are registered
//! as realms, so only an authoritative issuer may mint tokens.
//!
//! ## HTTP boundary
//!
//! The [`api`] module serves nonce issuance, bearer authorization and key-set
//! publication, translating authentication failures into `401` challenges.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod id;
pub mod nonce;
pub mod registry;
pub mod session;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
