//! Shared error classification.
//!
//! Every module keeps its own `thiserror` enum; this module provides the common
//! classification used at the HTTP boundary and the `WWW-Authenticate` challenge
//! carried by authentication failures.

use std::fmt;

/// Broad class of a failure, used to pick the boundary response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misconfiguration or invalid input to a setup call. Not retryable.
    Configuration,
    /// The caller could not be authenticated. Maps to `401`.
    Authentication,
    /// The component is not in a state that allows the call.
    IllegalState,
}

/// Authentication failure details rendered into a `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationError {
    scheme: String,
    realm: Option<String>,
    error: Option<String>,
    description: Option<String>,
    location: Option<String>,
}

impl AuthenticationError {
    #[must_use]
    pub fn bearer(realm: Option<&str>) -> Self {
        Self {
            scheme: "Bearer".to_string(),
            realm: realm.map(str::to_string),
            error: None,
            description: None,
            location: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Redirect target for interactive flows; the boundary answers `302` instead of `401`.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Render the `WWW-Authenticate` header value.
    #[must_use]
    pub fn challenge(&self) -> String {
        let mut params = Vec::new();
        if let Some(realm) = &self.realm {
            params.push(format!("realm=\"{}\"", quote(realm)));
        }
        if let Some(error) = &self.error {
            params.push(format!("error=\"{}\"", quote(error)));
        }
        if let Some(description) = &self.description {
            params.push(format!("error_description=\"{}\"", quote(description)));
        }

        if params.is_empty() {
            self.scheme.clone()
        } else {
            format!("{} {}", self.scheme, params.join(", "))
        }
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.challenge())
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
