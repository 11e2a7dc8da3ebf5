//! Session token engine.
//!
//! Flow Overview:
//! 1) Issuers are registered on a [`SessionEngineBuilder`]. Each registration also
//!    installs a realm verifier for the issuer in the [`VerifierRegistryBuilder`]:
//!    authoritative for locally hosted issuers (which hold signing keys), not
//!    authoritative for remote issuers known only by their published keys.
//! 2) `create` assembles claims from a [`SessionHeader`] and signs an access token
//!    (`typ = at+jwt`), plus a refresh token (`typ = refresh+jwt`) when requested.
//! 3) `refresh` exchanges a refresh token for a new access token, provided the
//!    caller presents the same authorized principals the session was created with.
//! 4) `authorize` verifies an access token and rebuilds its subject.
//!
//! Instants have second resolution and expiry is exclusive: a token is valid
//! strictly before its `exp`.

mod attributes;
mod header;
mod token;

pub use attributes::{SessionDetail, SessionDetails};
pub use header::{Principal, Scope, SessionAttribute, SessionHeader, SessionPrincipal};
pub use token::{SessionToken, TokenResponse};

use crate::error::{AuthenticationError, ErrorKind};
use crate::id;
use crate::registry::{self, VerifierRegistry, VerifierRegistryBuilder};
use crate::token::{self as jws, Algorithm, Jwks, JwksKeySource, KeySource, TokenHeader};
use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use url::Url;
use uuid::Uuid;

pub const ACCESS_TOKEN_TYPE: &str = "at+jwt";
pub const REFRESH_TOKEN_TYPE: &str = "refresh+jwt";

/// Claim names reserved by the token format; attributes may not use them, and
/// they are never read back as attributes.
pub const STANDARD_CLAIMS: &[&str] = &[
    "kid",
    "alg",
    "typ",
    "jti",
    "iss",
    "aud",
    "iat",
    "exp",
    "nbf",
    "sub",
    "realm",
    "principal",
    "scope",
    "nonce",
    "sha",
    "ttl",
    "azp",
    "acr",
    "amr",
    "auth_time",
    "client_id",
    "sid",
    "cnf",
    "act",
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required session field: {0}")]
    MissingField(&'static str),
    #[error("invalid issuer registration: {0}")]
    InvalidRegistration(String),
    #[error("issuer already registered: {0}")]
    IssuerAlreadyRegistered(String),
    #[error("issuer not registered: {0}")]
    IssuerNotRegistered(String),
    #[error("not authoritative for issuer {0}")]
    NotAuthoritative(String),
    #[error("invalid scope for issuer: {0}")]
    InvalidScope(String),
    #[error("invalid principal for session token: {0}")]
    InvalidPrincipal(String),
    #[error("duplicate or invalid session attribute claim: {0}")]
    DuplicateAttribute(String),
    #[error("must provide at least one scope")]
    MissingScope,
    #[error("token TTL must be at least one second")]
    InvalidTtl,
    #[error("no {alg} key {kid} for issuer {issuer}")]
    KeyResolution {
        issuer: String,
        kid: String,
        alg: Algorithm,
    },
    #[error("unknown token issuer: {0}")]
    UnknownIssuer(String),
    #[error("invalid token type: {0}")]
    InvalidTokenType(String),
    #[error("invalid audience")]
    InvalidAudience,
    #[error("token expired")]
    Expired,
    #[error("authorized principals do not match the session")]
    PrincipalMismatch,
    #[error("refresh token of issuer {0} cannot be renewed here")]
    NotRefreshable(String),
    #[error("token response requested after expiry")]
    ResponseExpired,
    #[error(transparent)]
    Token(#[from] jws::Error),
    #[error(transparent)]
    Registry(#[from] registry::Error),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingField(_)
            | Self::InvalidRegistration(_)
            | Self::IssuerNotRegistered(_)
            | Self::NotAuthoritative(_)
            | Self::InvalidScope(_)
            | Self::InvalidPrincipal(_)
            | Self::DuplicateAttribute(_)
            | Self::MissingScope
            | Self::InvalidTtl
            | Self::KeyResolution { .. } => ErrorKind::Configuration,
            Self::IssuerAlreadyRegistered(_) | Self::ResponseExpired => ErrorKind::IllegalState,
            Self::UnknownIssuer(_)
            | Self::InvalidTokenType(_)
            | Self::InvalidAudience
            | Self::Expired
            | Self::PrincipalMismatch
            | Self::NotRefreshable(_)
            | Self::Token(_) => ErrorKind::Authentication,
            Self::Registry(err) => err.kind(),
        }
    }

    /// Challenge to present when a token is rejected.
    #[must_use]
    pub fn challenge(&self, realm: Option<&str>) -> AuthenticationError {
        if let Self::Registry(registry::Error::Authentication { challenge, .. }) = self {
            return challenge.clone();
        }
        AuthenticationError::bearer(realm)
            .with_error("invalid_token")
            .with_description(self.to_string())
    }
}

/// An issuer to register with the engine.
#[derive(Debug, Clone)]
pub struct IssuerRegistration {
    issuer: String,
    scopes: Vec<String>,
    keys: Arc<dyn KeySource>,
    local: bool,
}

impl IssuerRegistration {
    /// Issuer hosted here: tokens are signed with `keys`.
    #[must_use]
    pub fn local(
        issuer: impl Into<String>,
        scopes: impl IntoIterator<Item = impl Into<String>>,
        keys: Arc<dyn KeySource>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
            keys,
            local: true,
        }
    }

    /// Issuer hosted elsewhere, known by its published keys. Verification only.
    #[must_use]
    pub fn remote(
        issuer: impl Into<String>,
        scopes: impl IntoIterator<Item = impl Into<String>>,
        jwks: Jwks,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
            keys: Arc::new(JwksKeySource::new(jwks)),
            local: false,
        }
    }
}

#[derive(Debug)]
struct Issuer {
    scopes: BTreeSet<String>,
    keys: Arc<dyn KeySource>,
    local: bool,
}

#[derive(Debug, Default)]
pub struct SessionEngineBuilder {
    issuers: HashMap<String, Issuer>,
}

impl SessionEngineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an issuer and its realm verifier. Returns the issuer's public keys.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRegistration`] if the issuer is not an absolute URI, or no
    ///   scope or key is given.
    /// - [`Error::IssuerAlreadyRegistered`] if the issuer is already registered.
    /// - [`Error::Registry`] if its realm already has a verifier.
    pub fn register_issuer(
        &mut self,
        registry: &mut VerifierRegistryBuilder,
        registration: IssuerRegistration,
    ) -> Result<Jwks, Error> {
        let IssuerRegistration {
            issuer,
            scopes,
            keys,
            local,
        } = registration;

        Url::parse(&issuer)
            .map_err(|err| Error::InvalidRegistration(format!("issuer {issuer}: {err}")))?;
        if self.issuers.contains_key(&issuer) {
            return Err(Error::IssuerAlreadyRegistered(issuer));
        }
        if scopes.iter().all(String::is_empty) {
            return Err(Error::InvalidRegistration(format!(
                "issuer {issuer} requires at least one scope"
            )));
        }
        let jwks = keys.jwks();
        if jwks.keys.is_empty() {
            return Err(Error::InvalidRegistration(format!(
                "issuer {issuer} requires at least one key"
            )));
        }

        let realm = issuer.clone();
        registry.register_verifier::<SessionPrincipal, _>(
            issuer.clone(),
            local,
            move |principal| {
                if principal.issuer == realm && principal.realm == realm {
                    Ok(())
                } else {
                    Err(format!("{} was not issued by {realm}", principal.name))
                }
            },
        )?;

        info!(
            issuer = %issuer,
            local,
            scopes = scopes.len(),
            keys = jwks.keys.len(),
            "registered session issuer"
        );
        self.issuers.insert(
            issuer,
            Issuer {
                scopes: scopes.into_iter().filter(|scope| !scope.is_empty()).collect(),
                keys,
                local,
            },
        );
        Ok(jwks)
    }

    #[must_use]
    pub fn build(self, registry: Arc<VerifierRegistry>) -> SessionEngine {
        SessionEngine {
            registry,
            issuers: self.issuers,
        }
    }
}

/// `aud` as a single value or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, audience: &str) -> bool {
        match self {
            Self::One(value) => value == audience,
            Self::Many(values) => values.iter().any(|value| value == audience),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    jti: String,
    iss: String,
    aud: Audience,
    iat: i64,
    exp: i64,
    sub: String,
    realm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    scope: String,
    #[serde(flatten)]
    attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RefreshClaims {
    jti: String,
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
    sub: String,
    principal: String,
    scope: String,
    sha: String,
    ttl: u64,
}

/// Principals of a session after validation against the issuer.
struct Assembled {
    name: String,
    scopes: Vec<String>,
    attributes: BTreeMap<String, String>,
}

impl Assembled {
    fn digest(&self, issuer: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(issuer.as_bytes());
        hasher.update([0]);
        hasher.update(self.name.as_bytes());
        for (name, value) in &self.attributes {
            hasher.update([0]);
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
        let mut scopes: Vec<&String> = self.scopes.iter().collect();
        scopes.sort();
        for scope in scopes {
            hasher.update([0]);
            hasher.update(scope.as_bytes());
        }
        Base64UrlUnpadded::encode_string(&hasher.finalize())
    }
}

pub struct SessionEngine {
    registry: Arc<VerifierRegistry>,
    issuers: HashMap<String, Issuer>,
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("issuers", &self.issuers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn now_seconds() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn instant(unix_seconds: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(unix_seconds).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Whole seconds, rounded up.
fn ceil_seconds(ttl: Duration) -> u64 {
    ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
}

fn offset(now: i64, seconds: u64) -> i64 {
    now.saturating_add(i64::try_from(seconds).unwrap_or(i64::MAX))
}

impl SessionEngine {
    #[must_use]
    pub fn registry(&self) -> &Arc<VerifierRegistry> {
        &self.registry
    }

    /// Published keys of `issuer`.
    #[must_use]
    pub fn jwks(&self, issuer: &str) -> Option<Jwks> {
        self.issuers.get(issuer).map(|issuer| issuer.keys.jwks())
    }

    /// Issue a session token.
    ///
    /// # Errors
    ///
    /// Configuration errors for an incomplete header, an unknown or non-authoritative
    /// issuer, invalid principals, or a missing signing key. All checks run before
    /// anything is signed.
    #[instrument(skip_all, fields(issuer = %header.issuer, audience = %header.audience))]
    pub fn create(&self, header: &SessionHeader) -> Result<SessionToken, Error> {
        if header.issuer.is_empty() {
            return Err(Error::MissingField("issuer"));
        }
        if header.audience.is_empty() {
            return Err(Error::MissingField("audience"));
        }
        if header.key_id.is_empty() {
            return Err(Error::MissingField("key_id"));
        }
        if header.principals.is_empty() {
            return Err(Error::MissingField("principals"));
        }
        let token_ttl = ceil_seconds(header.token_ttl);
        if token_ttl == 0 {
            return Err(Error::InvalidTtl);
        }

        let issuer = self.authoritative_issuer(&header.issuer)?;
        let assembled = assemble(&header.issuer, issuer, &header.principals)?;
        let key = issuer
            .keys
            .signing_key(&header.key_id, header.algorithm)
            .ok_or_else(|| Error::KeyResolution {
                issuer: header.issuer.clone(),
                kid: header.key_id.clone(),
                alg: header.algorithm,
            })?;

        let iat = now_seconds();
        let exp = offset(iat, token_ttl);
        let access = AccessClaims {
            jti: Uuid::now_v7().to_string(),
            iss: header.issuer.clone(),
            aud: Audience::One(header.audience.clone()),
            iat,
            exp,
            sub: assembled.name.clone(),
            realm: header.issuer.clone(),
            nonce: Some(header.nonce.clone().unwrap_or_else(id::generate)),
            scope: assembled.scopes.join(" "),
            attributes: assembled
                .attributes
                .iter()
                .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                .collect(),
        };
        let access_token = jws::sign(key, &header.key_id, ACCESS_TOKEN_TYPE, &access)?;

        let (refresh_token, session_expires) = if header.refresh {
            let session_exp = offset(iat, ceil_seconds(header.session_ttl));
            let refresh = RefreshClaims {
                jti: Uuid::now_v7().to_string(),
                iss: header.issuer.clone(),
                aud: header.issuer.clone(),
                iat,
                exp: session_exp,
                sub: header.audience.clone(),
                principal: assembled.name.clone(),
                scope: access.scope.clone(),
                sha: assembled.digest(&header.issuer),
                ttl: token_ttl,
            };
            let token = jws::sign(key, &header.key_id, REFRESH_TOKEN_TYPE, &refresh)?;
            (Some(token), Some(instant(session_exp)))
        } else {
            (None, None)
        };

        info!(
            jti = %access.jti,
            sub = %access.sub,
            scope = %access.scope,
            exp,
            refresh = refresh_token.is_some(),
            "session token issued"
        );

        Ok(SessionToken::new(
            header.principals.clone(),
            access_token,
            refresh_token,
            instant(exp),
            session_expires,
        ))
    }

    /// Exchange `refresh_token` for a new access token.
    ///
    /// `principals` must be the same authorized principals the session was created
    /// with. A new refresh token is issued only while the session outlives the new
    /// access token.
    ///
    /// # Errors
    ///
    /// Authentication errors for an invalid, expired or mismatched refresh token;
    /// configuration errors when the issuer cannot sign.
    #[instrument(skip_all)]
    pub fn refresh(
        &self,
        principals: &[Principal],
        refresh_token: &str,
    ) -> Result<SessionToken, Error> {
        let now = now_seconds();
        let (header, claims): (TokenHeader, RefreshClaims) =
            self.verify_token(refresh_token, REFRESH_TOKEN_TYPE)?;
        if claims.aud != claims.iss {
            return Err(Error::InvalidAudience);
        }
        if now >= claims.exp {
            return Err(Error::Expired);
        }

        let issuer = self.authoritative_issuer(&claims.iss).map_err(|err| match err {
            Error::NotAuthoritative(iss) => Error::NotRefreshable(iss),
            other => other,
        })?;
        let assembled = assemble(&claims.iss, issuer, principals)?;
        let digest = assembled.digest(&claims.iss);
        if !bool::from(digest.as_bytes().ct_eq(claims.sha.as_bytes())) {
            info!(iss = %claims.iss, "refresh rejected: principal set changed");
            return Err(Error::PrincipalMismatch);
        }

        let key = issuer
            .keys
            .signing_key(&header.kid, header.alg)
            .ok_or_else(|| Error::KeyResolution {
                issuer: claims.iss.clone(),
                kid: header.kid.clone(),
                alg: header.alg,
            })?;

        let exp = offset(now, claims.ttl);
        let access = AccessClaims {
            jti: Uuid::now_v7().to_string(),
            iss: claims.iss.clone(),
            aud: Audience::One(claims.sub.clone()),
            iat: now,
            exp,
            sub: assembled.name.clone(),
            realm: claims.iss.clone(),
            nonce: Some(id::generate()),
            scope: assembled.scopes.join(" "),
            attributes: assembled
                .attributes
                .iter()
                .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                .collect(),
        };
        let access_token = jws::sign(key, &header.kid, ACCESS_TOKEN_TYPE, &access)?;

        let session_exp = claims.exp;
        let refresh_token = if session_exp >= exp {
            let renewed = RefreshClaims {
                jti: Uuid::now_v7().to_string(),
                iat: now,
                ..claims
            };
            Some(jws::sign(key, &header.kid, REFRESH_TOKEN_TYPE, &renewed)?)
        } else {
            debug!("session ends before the new access token; no refresh token issued");
            None
        };

        info!(jti = %access.jti, sub = %access.sub, "session token refreshed");
        let session_expires = refresh_token.as_ref().map(|_| instant(session_exp));
        Ok(SessionToken::new(
            principals.to_vec(),
            access_token,
            refresh_token,
            instant(exp),
            session_expires,
        ))
    }

    /// Verify an access token and rebuild its subject.
    ///
    /// # Errors
    ///
    /// Authentication errors when the token is not a valid, unexpired access token
    /// of a registered issuer.
    pub fn authorize(&self, access_token: &str) -> Result<SessionToken, Error> {
        self.authorize_checked(None, access_token)
    }

    /// Same as [`SessionEngine::authorize`], also requiring `aud == audience`.
    ///
    /// # Errors
    ///
    /// See [`SessionEngine::authorize`]; [`Error::InvalidAudience`] on mismatch.
    pub fn authorize_for(&self, audience: &str, access_token: &str) -> Result<SessionToken, Error> {
        self.authorize_checked(Some(audience), access_token)
    }

    #[instrument(skip(self, access_token))]
    fn authorize_checked(
        &self,
        audience: Option<&str>,
        access_token: &str,
    ) -> Result<SessionToken, Error> {
        let (_, claims): (TokenHeader, AccessClaims) =
            self.verify_token(access_token, ACCESS_TOKEN_TYPE)?;
        if audience.is_some_and(|audience| !claims.aud.contains(audience)) {
            return Err(Error::InvalidAudience);
        }
        if now_seconds() >= claims.exp {
            return Err(Error::Expired);
        }

        let principal = SessionPrincipal {
            realm: claims.realm.clone(),
            issuer: claims.iss.clone(),
            name: claims.sub.clone(),
        };
        let authoritative = self.registry.verify(&principal, &claims.iss)?;

        let granted = self
            .issuers
            .get(&claims.iss)
            .map(|issuer| &issuer.scopes)
            .ok_or_else(|| Error::UnknownIssuer(claims.iss.clone()))?;

        let mut subject = vec![Principal::identity(principal)];
        subject.extend(
            claims
                .scope
                .split_whitespace()
                .filter(|scope| granted.contains(*scope))
                .map(|scope| Principal::scope(scope, claims.iss.clone())),
        );
        subject.extend(
            claims
                .attributes
                .iter()
                .filter(|(name, _)| !STANDARD_CLAIMS.contains(&name.as_str()))
                .map(|(name, value)| {
                    let value = match value {
                        Value::String(value) => value.clone(),
                        other => other.to_string(),
                    };
                    Principal::attribute(claims.sub.clone(), name.clone(), value)
                }),
        );

        debug!(sub = %claims.sub, iss = %claims.iss, authoritative, "access token authorized");
        Ok(SessionToken::new(
            subject,
            access_token.to_string(),
            None,
            instant(claims.exp),
            None,
        ))
    }

    fn authoritative_issuer(&self, issuer: &str) -> Result<&Issuer, Error> {
        let registered = self
            .issuers
            .get(issuer)
            .ok_or_else(|| Error::IssuerNotRegistered(issuer.to_string()))?;
        if !registered.local || !self.registry.is_authoritative(issuer) {
            return Err(Error::NotAuthoritative(issuer.to_string()));
        }
        Ok(registered)
    }

    /// Check signature and `typ`; claim checks are left to the caller.
    fn verify_token<C>(&self, token: &str, typ: &str) -> Result<(TokenHeader, C), Error>
    where
        C: for<'de> Deserialize<'de>,
    {
        #[derive(Deserialize)]
        struct Issued {
            iss: String,
        }

        let header = jws::peek_header(token)?;
        if header.typ != typ {
            return Err(Error::InvalidTokenType(header.typ));
        }
        let Issued { iss } = jws::decode_unverified(token)?;
        let issuer = self
            .issuers
            .get(&iss)
            .ok_or(Error::UnknownIssuer(iss))?;
        let key = issuer.keys.verifying_key(&header.kid, header.alg)?;
        Ok(jws::verify(token, &key)?)
    }
}

/// Validate `principals` against `issuer`: the first must be an identity, the rest
/// scopes of the issuer realm or attributes of that identity.
fn assemble(
    realm: &str,
    issuer: &Issuer,
    principals: &[Principal],
) -> Result<Assembled, Error> {
    let mut principals = principals.iter();
    let name = match principals.next() {
        Some(Principal::Identity(identity)) if !identity.name().is_empty() => {
            identity.name().to_string()
        }
        Some(other) => {
            return Err(Error::InvalidPrincipal(format!(
                "primary principal {} is not an identity",
                other.name()
            )));
        }
        None => return Err(Error::MissingField("principals")),
    };

    let mut scopes: Vec<String> = Vec::new();
    let mut attributes = BTreeMap::new();
    for principal in principals {
        match principal {
            Principal::Scope(scope) => {
                if scope.realm != realm || !issuer.scopes.contains(&scope.name) {
                    return Err(Error::InvalidScope(scope.name.clone()));
                }
                if !scopes.contains(&scope.name) {
                    scopes.push(scope.name.clone());
                }
            }
            Principal::Attribute(attribute) if attribute.principal == name => {
                if attribute.name.is_empty()
                    || STANDARD_CLAIMS.contains(&attribute.name.as_str())
                    || attributes.contains_key(&attribute.name)
                {
                    return Err(Error::DuplicateAttribute(attribute.name.clone()));
                }
                attributes.insert(attribute.name.clone(), attribute.value.clone());
            }
            other => return Err(Error::InvalidPrincipal(other.name().to_string())),
        }
    }

    if scopes.is_empty() {
        return Err(Error::MissingScope);
    }

    Ok(Assembled {
        name,
        scopes,
        attributes,
    })
}

#[cfg(test)]
mod tests;
