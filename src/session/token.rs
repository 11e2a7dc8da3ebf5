use super::{Error, Principal, SessionAttribute};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Issued (or authorized) session credentials. Immutable.
#[derive(Clone, Debug)]
pub struct SessionToken {
    subject: Arc<[Principal]>,
    access_token: String,
    refresh_token: Option<String>,
    token_expires: OffsetDateTime,
    session_expires: Option<OffsetDateTime>,
}

/// OAuth 2.0 token response (RFC 6749 section 5.1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token_type: String,
    pub access_token: String,
    pub expires_in: i64,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl SessionToken {
    pub(super) fn new(
        subject: Vec<Principal>,
        access_token: String,
        refresh_token: Option<String>,
        token_expires: OffsetDateTime,
        session_expires: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            subject: subject.into(),
            access_token,
            refresh_token,
            token_expires,
            session_expires,
        }
    }

    /// Authorized principals: primary identity first, then scopes and attributes.
    #[must_use]
    pub fn subject(&self) -> &[Principal] {
        &self.subject
    }

    /// Name of the primary identity.
    #[must_use]
    pub fn principal_name(&self) -> Option<&str> {
        self.subject.iter().find_map(|principal| match principal {
            Principal::Identity(identity) => Some(identity.name()),
            _ => None,
        })
    }

    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.subject
            .iter()
            .filter_map(|principal| match principal {
                Principal::Scope(scope) => Some(scope.name.as_str()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn attributes(&self) -> Vec<&SessionAttribute> {
        self.subject
            .iter()
            .filter_map(|principal| match principal {
                Principal::Attribute(attribute) => Some(attribute),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    #[must_use]
    pub fn token_expires(&self) -> OffsetDateTime {
        self.token_expires
    }

    #[must_use]
    pub fn session_expires(&self) -> Option<OffsetDateTime> {
        self.session_expires
    }

    /// Render the OAuth token response as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResponseExpired`] if less than one second of validity remains.
    pub fn as_token_response(&self, now: OffsetDateTime) -> Result<TokenResponse, Error> {
        let expires_in = (self.token_expires - now).whole_seconds();
        if expires_in < 1 {
            return Err(Error::ResponseExpired);
        }

        Ok(TokenResponse {
            token_type: "Bearer".to_string(),
            access_token: self.access_token.clone(),
            expires_in,
            scope: self.scopes().join(" "),
            refresh_token: self.refresh_token.clone(),
        })
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let expires = self
            .token_expires
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.token_expires.unix_timestamp().to_string());
        write!(
            f,
            "SessionToken [{}; scope={}; expires={expires}; refresh={}]",
            self.principal_name().unwrap_or("-"),
            self.scopes().join(" "),
            self.refresh_token.is_some()
        )
    }
}
