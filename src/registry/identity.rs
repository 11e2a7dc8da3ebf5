use std::any::Any;
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

use super::Error;

/// Anything that can be presented to a realm verifier.
///
/// Verifiers dispatch on the concrete type, so implementors hand out a
/// type-erased view of themselves through [`Identity::as_any`].
pub trait Identity: Any + Send + Sync + fmt::Debug {
    /// Name of the principal, unique within its realm.
    fn name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// An authenticated entity with its authentication window.
#[derive(Clone, Debug)]
pub struct PrincipalIdentity {
    name: String,
    issued_at: OffsetDateTime,
    auth_time: OffsetDateTime,
    expires: OffsetDateTime,
    subject: Vec<Arc<dyn Identity>>,
}

impl PrincipalIdentity {
    /// Build an identity authenticated at `auth_time` and valid until `expires`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] if the name is empty or `expires` is not
    /// after `auth_time`.
    pub fn new(
        name: impl Into<String>,
        auth_time: OffsetDateTime,
        expires: OffsetDateTime,
    ) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidIdentity("name is required".to_string()));
        }
        if expires <= auth_time {
            return Err(Error::InvalidIdentity(format!(
                "{name} expires before it was authenticated"
            )));
        }

        Ok(Self {
            name,
            issued_at: auth_time,
            auth_time,
            expires,
            subject: Vec::new(),
        })
    }

    /// Issue time, when later than the authentication time (refreshed credentials).
    #[must_use]
    pub fn with_issued_at(mut self, issued_at: OffsetDateTime) -> Self {
        self.issued_at = issued_at;
        self
    }

    #[must_use]
    pub fn with_subject(mut self, principal: Arc<dyn Identity>) -> Self {
        self.subject.push(principal);
        self
    }

    #[must_use]
    pub fn issued_at(&self) -> OffsetDateTime {
        self.issued_at
    }

    #[must_use]
    pub fn auth_time(&self) -> OffsetDateTime {
        self.auth_time
    }

    #[must_use]
    pub fn expires(&self) -> OffsetDateTime {
        self.expires
    }

    #[must_use]
    pub fn subject(&self) -> &[Arc<dyn Identity>] {
        &self.subject
    }

    /// Check the authentication window against `now`.
    ///
    /// # Errors
    ///
    /// Returns a rejection reason when `now` is outside `[auth_time, expires)`.
    pub fn check_window(&self, now: OffsetDateTime) -> Result<(), String> {
        if now < self.auth_time {
            return Err(format!("{} is not yet valid", self.name));
        }
        if now >= self.expires {
            return Err(format!("{} has expired", self.name));
        }
        Ok(())
    }
}

impl Identity for PrincipalIdentity {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
