use crate::config::SessionDefaults;
use crate::registry::Identity;
use crate::token::Algorithm;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// A scope granted by an issuer realm.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Scope {
    pub name: String,
    pub realm: String,
}

impl Scope {
    #[must_use]
    pub fn new(name: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            realm: realm.into(),
        }
    }
}

/// A named value bound to the primary principal of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionAttribute {
    /// Name of the principal the attribute belongs to.
    pub principal: String,
    pub name: String,
    pub value: String,
}

impl SessionAttribute {
    #[must_use]
    pub fn new(
        principal: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            principal: principal.into(),
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Authorized principal carried by a session.
#[derive(Clone, Debug)]
pub enum Principal {
    Identity(Arc<dyn Identity>),
    Scope(Scope),
    Attribute(SessionAttribute),
}

impl Principal {
    #[must_use]
    pub fn identity(identity: impl Identity) -> Self {
        Self::Identity(Arc::new(identity))
    }

    #[must_use]
    pub fn scope(name: impl Into<String>, realm: impl Into<String>) -> Self {
        Self::Scope(Scope::new(name, realm))
    }

    #[must_use]
    pub fn attribute(
        principal: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Attribute(SessionAttribute::new(principal, name, value))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Identity(identity) => identity.name(),
            Self::Scope(scope) => &scope.name,
            Self::Attribute(attribute) => &attribute.name,
        }
    }
}

/// Principal reconstituted from a verified session token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionPrincipal {
    pub realm: String,
    pub issuer: String,
    pub name: String,
}

impl Identity for SessionPrincipal {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Everything needed to mint a session token.
///
/// The first principal is the primary identity; the rest are scopes and
/// attributes of that identity.
#[derive(Clone, Debug)]
pub struct SessionHeader {
    pub issuer: String,
    pub audience: String,
    pub key_id: String,
    pub algorithm: Algorithm,
    pub principals: Vec<Principal>,
    pub refresh: bool,
    pub token_ttl: Duration,
    pub session_ttl: Duration,
    /// Nonce claim; a fresh one is generated when absent.
    pub nonce: Option<String>,
}

impl SessionHeader {
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        key_id: impl Into<String>,
        algorithm: Algorithm,
    ) -> Self {
        Self::with_defaults(issuer, audience, key_id, algorithm, &SessionDefaults::default())
    }

    #[must_use]
    pub fn with_defaults(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        key_id: impl Into<String>,
        algorithm: Algorithm,
        defaults: &SessionDefaults,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            key_id: key_id.into(),
            algorithm,
            principals: Vec::new(),
            refresh: defaults.refresh(),
            token_ttl: defaults.token_ttl(),
            session_ttl: defaults.session_ttl(),
            nonce: None,
        }
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principals.push(principal);
        self
    }

    #[must_use]
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }
}
