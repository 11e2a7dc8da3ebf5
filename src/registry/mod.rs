//! Realm verifier registry.
//!
//! Flow Overview:
//! 1) At startup, each authentication module registers one verifier for its realm
//!    and any delegate unwrapping rules on a [`VerifierRegistryBuilder`].
//! 2) The builder is sealed into a [`VerifierRegistry`]; the trust table cannot
//!    change afterwards.
//! 3) `verify(identity, realm)` unwraps delegated identities until a non-delegate
//!    type is reached, checks it is the verifier's concrete type, and runs the
//!    verifier predicate.
//!
//! A `true` result is an authoritative confirmation; `false` means the realm
//! trusts the identity without owning it (delegated trust).

mod identity;

pub use identity::{Identity, PrincipalIdentity};

use crate::error::{AuthenticationError, ErrorKind};
use std::any::{TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Upper bound on delegate unwrapping, independent of cycle detection.
pub const MAX_DELEGATE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum Error {
    #[error("verifier already registered for realm {0}")]
    AlreadyRegistered(String),
    #[error("delegate already registered for {0}")]
    DelegateAlreadyRegistered(&'static str),
    #[error("no verifier registered for realm {0}")]
    MissingVerifier(String),
    #[error("delegate cycle detected at {0}")]
    DelegateCycle(&'static str),
    #[error("delegate chain exceeds {} levels", MAX_DELEGATE_DEPTH)]
    DelegateDepth,
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("authentication failed: {reason}")]
    Authentication {
        reason: String,
        challenge: AuthenticationError,
    },
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRegistered(_) | Self::DelegateAlreadyRegistered(_) => {
                ErrorKind::IllegalState
            }
            Self::MissingVerifier(_)
            | Self::DelegateCycle(_)
            | Self::DelegateDepth
            | Self::InvalidIdentity(_) => ErrorKind::Configuration,
            Self::Authentication { .. } => ErrorKind::Authentication,
        }
    }

    fn rejected(realm: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::Authentication {
            challenge: AuthenticationError::bearer(Some(realm))
                .with_error("invalid_token")
                .with_description(reason.clone()),
            reason,
        }
    }
}

type Predicate = Box<dyn Fn(&dyn Identity) -> Option<Result<(), String>> + Send + Sync>;
type Unwrap = Box<dyn Fn(&dyn Identity) -> Option<Arc<dyn Identity>> + Send + Sync>;

struct Verifier {
    identity_type: &'static str,
    authoritative: bool,
    predicate: Predicate,
}

struct Delegate {
    wrapper_type: &'static str,
    unwrap: Unwrap,
}

/// Mutable registration phase of the trust table.
#[derive(Default)]
pub struct VerifierRegistryBuilder {
    verifiers: HashMap<String, Verifier>,
    delegates: HashMap<TypeId, Delegate>,
}

impl VerifierRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the verifier for `realm`, accepting identities of type `T`.
    ///
    /// The predicate returns a rejection reason when the identity is not valid
    /// for the realm.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRegistered`] if `realm` already has a verifier.
    pub fn register_verifier<T, F>(
        &mut self,
        realm: impl Into<String>,
        authoritative: bool,
        predicate: F,
    ) -> Result<&mut Self, Error>
    where
        T: Identity,
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        let realm = realm.into();
        if self.verifiers.contains_key(&realm) {
            return Err(Error::AlreadyRegistered(realm));
        }

        let predicate: Predicate = Box::new(move |identity: &dyn Identity| {
            identity.as_any().downcast_ref::<T>().map(&predicate)
        });

        info!(
            realm = %realm,
            identity_type = type_name::<T>(),
            authoritative,
            "registered realm verifier"
        );
        self.verifiers.insert(
            realm,
            Verifier {
                identity_type: type_name::<T>(),
                authoritative,
                predicate,
            },
        );
        Ok(self)
    }

    /// Register how to recover the underlying identity from wrapper type `W`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DelegateAlreadyRegistered`] if `W` already has a rule.
    pub fn register_delegate<W, F>(&mut self, unwrap: F) -> Result<&mut Self, Error>
    where
        W: Identity,
        F: Fn(&W) -> Arc<dyn Identity> + Send + Sync + 'static,
    {
        let key = TypeId::of::<W>();
        if self.delegates.contains_key(&key) {
            return Err(Error::DelegateAlreadyRegistered(type_name::<W>()));
        }

        let unwrap: Unwrap = Box::new(move |identity: &dyn Identity| {
            identity.as_any().downcast_ref::<W>().map(&unwrap)
        });
        debug!(wrapper_type = type_name::<W>(), "registered identity delegate");
        self.delegates.insert(
            key,
            Delegate {
                wrapper_type: type_name::<W>(),
                unwrap,
            },
        );
        Ok(self)
    }

    /// Seal the trust table. No further registration is possible.
    #[must_use]
    pub fn seal(self) -> VerifierRegistry {
        info!(
            realms = self.verifiers.len(),
            delegates = self.delegates.len(),
            "verifier registry sealed"
        );
        VerifierRegistry {
            verifiers: self.verifiers,
            delegates: self.delegates,
        }
    }
}

/// Sealed, read-only trust table.
pub struct VerifierRegistry {
    verifiers: HashMap<String, Verifier>,
    delegates: HashMap<TypeId, Delegate>,
}

impl std::fmt::Debug for VerifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierRegistry")
            .field("realms", &self.verifiers.keys().collect::<Vec<_>>())
            .field("delegates", &self.delegates.len())
            .finish()
    }
}

impl VerifierRegistry {
    /// Whether `realm` has an authoritative verifier. Unknown realms are not.
    #[must_use]
    pub fn is_authoritative(&self, realm: &str) -> bool {
        self.verifiers
            .get(realm)
            .is_some_and(|verifier| verifier.authoritative)
    }

    #[must_use]
    pub fn contains_realm(&self, realm: &str) -> bool {
        self.verifiers.contains_key(realm)
    }

    /// Verify `identity` for `realm`.
    ///
    /// Returns the realm's authoritative flag on success.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingVerifier`] if `realm` has no verifier.
    /// - [`Error::DelegateCycle`] / [`Error::DelegateDepth`] for a broken delegate chain.
    /// - [`Error::Authentication`] if the resolved identity is of the wrong type or
    ///   the verifier rejects it.
    #[instrument(skip(self, identity), fields(identity = identity.name()))]
    pub fn verify(&self, identity: &dyn Identity, realm: &str) -> Result<bool, Error> {
        let verifier = self
            .verifiers
            .get(realm)
            .ok_or_else(|| Error::MissingVerifier(realm.to_string()))?;

        let mut visited = HashSet::new();
        let mut owned: Option<Arc<dyn Identity>> = None;
        loop {
            let current: &dyn Identity = match owned.as_deref() {
                Some(inner) => inner,
                None => identity,
            };
            let type_id = current.as_any().type_id();
            let Some(delegate) = self.delegates.get(&type_id) else {
                return Self::run(verifier, current, realm);
            };

            if !visited.insert(type_id) {
                return Err(Error::DelegateCycle(delegate.wrapper_type));
            }
            if visited.len() > MAX_DELEGATE_DEPTH {
                return Err(Error::DelegateDepth);
            }

            let next = (delegate.unwrap)(current)
                .ok_or(Error::DelegateCycle(delegate.wrapper_type))?;
            debug!(
                wrapper = delegate.wrapper_type,
                resolved = next.name(),
                "unwrapped delegated identity"
            );
            owned = Some(next);
        }
    }

    fn run(verifier: &Verifier, identity: &dyn Identity, realm: &str) -> Result<bool, Error> {
        match (verifier.predicate)(identity) {
            Some(Ok(())) => {
                debug!(realm, authoritative = verifier.authoritative, "identity verified");
                Ok(verifier.authoritative)
            }
            Some(Err(reason)) => {
                info!(realm, reason = %reason, "identity rejected by realm verifier");
                Err(Error::rejected(realm, reason))
            }
            None => {
                info!(
                    realm,
                    expected = verifier.identity_type,
                    "identity type not accepted by realm verifier"
                );
                Err(Error::rejected(
                    realm,
                    format!("identity is not a {}", verifier.identity_type),
                ))
            }
        }
    }
}
