//! Engine configuration.

use std::time::Duration;

const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(2 * 60);
const DEFAULT_MAX_CONCURRENCY: usize = 5;
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(2 * 60);
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Clone, Debug)]
pub struct NonceConfig {
    ttl: Duration,
    max_concurrency: usize,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_NONCE_TTL,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl NonceConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Concurrent `create` calls allowed per client address before issuance
    /// stops being tracked.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}

/// Defaults applied to session headers built by the service wiring.
#[derive(Clone, Debug)]
pub struct SessionDefaults {
    token_ttl: Duration,
    session_ttl: Duration,
    refresh: bool,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            token_ttl: DEFAULT_TOKEN_TTL,
            session_ttl: DEFAULT_SESSION_TTL,
            refresh: false,
        }
    }
}

impl SessionDefaults {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
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
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn refresh(&self) -> bool {
        self.refresh
    }
}
