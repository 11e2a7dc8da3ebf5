//! One-time number (nonce) engine.
//!
//! Flow Overview:
//! 1) `create` binds a fresh nonce to the requesting client's thumbprint, after
//!    pruning older nonces from the same client, and announces it on the bus.
//! 2) `validate` consumes the nonce: it must be unexpired, present, and bound to
//!    the same client. A nonce validates at most once.
//! 3) A background sweep drops expired nonces every 500 ms.
//!
//! Issuance is fail-open: invalid input, an engine that is closed, or a client
//! over its concurrency limit still receives a well-formed nonce, but one that
//! is not tracked and will therefore never validate.
//!
//! `create` may block for 25 ms per recent nonce from the same client; async
//! callers should run it on a blocking thread.

mod bus;
mod challenge;

pub use bus::{ChallengeBus, ChallengeEvent, ChallengeMessage, LocalBus, MessageHandler, NoopBus};
pub use challenge::{Challenge, Thumbprint, binding, canonical_address, check_user_agent};

use crate::config::NonceConfig;
use crate::error::{AuthenticationError, ErrorKind};
use crate::id::{self, IdError};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const SWEEP_INTERVAL: Duration = Duration::from_millis(500);
const PRUNE_YOUNG: Duration = Duration::from_millis(250);
const PRUNE_DELAY: Duration = Duration::from_millis(25);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("nonce expired")]
    Expired,
    #[error("nonce not found")]
    NotFound,
    #[error("nonce does not match client")]
    Mismatch,
    #[error("malformed nonce: {0}")]
    Malformed(IdError),
    #[error("nonce engine is closed")]
    Closed,
    #[error("nonce engine requires a tokio runtime")]
    Runtime,
    #[error("invalid remote address: {0}")]
    InvalidAddress(String),
    #[error("invalid user agent")]
    InvalidUserAgent,
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Expired | Self::NotFound | Self::Mismatch | Self::Malformed(_) => {
                ErrorKind::Authentication
            }
            Self::Closed | Self::Runtime => ErrorKind::IllegalState,
            Self::InvalidAddress(_) | Self::InvalidUserAgent => ErrorKind::Configuration,
        }
    }

    /// Challenge to present when validation fails.
    #[must_use]
    pub fn challenge(&self) -> AuthenticationError {
        AuthenticationError::bearer(None)
            .with_error("invalid_request")
            .with_description(self.to_string())
    }
}

/// Tracks in-flight `create` calls per client address.
#[derive(Default)]
struct ActiveCounts {
    counts: Mutex<HashMap<[u8; 16], usize>>,
}

impl ActiveCounts {
    fn enter(&self, address: [u8; 16]) -> ActiveGuard<'_> {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(address).or_insert(0);
        *count += 1;
        ActiveGuard {
            owner: self,
            address,
            count: *count,
        }
    }

    fn leave(&self, address: &[u8; 16]) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = counts.get_mut(address) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(address);
            }
        }
    }

    fn len(&self) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

struct ActiveGuard<'a> {
    owner: &'a ActiveCounts,
    address: [u8; 16],
    count: usize,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.owner.leave(&self.address);
    }
}

pub struct NonceEngine {
    config: NonceConfig,
    node: Uuid,
    challenges: DashMap<String, Thumbprint>,
    active: ActiveCounts,
    bus: Arc<dyn ChallengeBus>,
    closed: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for NonceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceEngine")
            .field("node", &self.node)
            .field("config", &self.config)
            .field("tracked", &self.challenges.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl NonceEngine {
    /// Start an engine on the current Tokio runtime and subscribe it to `bus`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] when called outside a Tokio runtime.
    pub fn start(config: NonceConfig, bus: Arc<dyn ChallengeBus>) -> Result<Arc<Self>, Error> {
        let runtime = Handle::try_current().map_err(|_| Error::Runtime)?;

        let engine = Arc::new(Self {
            config,
            node: Uuid::new_v4(),
            challenges: DashMap::new(),
            active: ActiveCounts::default(),
            bus: bus.clone(),
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        });

        let subscriber = Arc::downgrade(&engine);
        bus.subscribe(Arc::new(move |message| {
            if let Some(engine) = subscriber.upgrade() {
                engine.receive(message);
            }
        }));

        let handle = runtime.spawn(sweep_loop(Arc::downgrade(&engine)));
        *engine
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(
            node = %engine.node,
            ttl = ?engine.config.ttl(),
            max_concurrency = engine.config.max_concurrency(),
            "nonce engine started"
        );
        Ok(engine)
    }

    /// Identifier of this node on the bus.
    #[must_use]
    pub fn node(&self) -> Uuid {
        self.node
    }

    #[must_use]
    pub fn config(&self) -> &NonceConfig {
        &self.config
    }

    /// Issue a nonce bound to `remote_address` and `user_agent`.
    ///
    /// Never fails; see the module docs for when the returned nonce is untracked.
    #[instrument(skip(self, user_agent))]
    pub fn create(&self, remote_address: &str, user_agent: &str) -> String {
        let nonce = id::generate();
        if self.is_closed() {
            debug!("nonce engine closed, issuing untracked nonce");
            return nonce;
        }

        let (address, thumbprint) = match binding(remote_address, user_agent) {
            Ok(binding) => binding,
            Err(err) => {
                info!(error = %err, "Discarding nonce");
                return nonce;
            }
        };

        let guard = self.active.enter(address);
        if guard.count > self.config.max_concurrency() {
            info!(
                active = guard.count,
                max_concurrency = self.config.max_concurrency(),
                "Blocking excessive nonce generation"
            );
            return nonce;
        }

        self.prune(&thumbprint);
        if !self.track(&nonce, thumbprint) {
            debug!("nonce engine closed while issuing, nonce untracked");
            return nonce;
        }
        self.bus.publish(ChallengeMessage {
            origin: self.node,
            event: ChallengeEvent::Issued(Challenge {
                nonce: nonce.clone(),
                thumbprint,
            }),
        });
        drop(guard);

        nonce
    }

    /// Consume `nonce` for the client identified by `remote_address` and `user_agent`.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] after [`NonceEngine::close`].
    /// - [`Error::Expired`] / [`Error::Malformed`] when the nonce is too old or not a nonce.
    /// - [`Error::NotFound`] when the nonce is unknown or already used.
    /// - [`Error::Mismatch`] when the nonce was issued to a different client.
    #[instrument(skip(self, user_agent, nonce))]
    pub fn validate(&self, remote_address: &str, user_agent: &str, nonce: &str) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        id::verify(nonce, self.config.ttl()).map_err(|err| match err {
            IdError::Expired => Error::Expired,
            other => Error::Malformed(other),
        })?;

        self.bus.publish(ChallengeMessage {
            origin: self.node,
            event: ChallengeEvent::Used {
                nonce: nonce.to_string(),
            },
        });

        let (_, stored) = self.challenges.remove(nonce).ok_or(Error::NotFound)?;

        let (_, presented) = binding(remote_address, user_agent).map_err(|err| {
            debug!(error = %err, "invalid client binding on validate");
            Error::Mismatch
        })?;
        if !stored.matches(&presented) {
            return Err(Error::Mismatch);
        }

        debug!("nonce validated");
        Ok(())
    }

    /// Apply a message received from a peer.
    pub fn receive(&self, message: ChallengeMessage) {
        if message.origin == self.node {
            return;
        }
        if self.is_closed() {
            warn!(origin = %message.origin, error = %Error::Closed, "dropping challenge message");
            return;
        }

        match message.event {
            ChallengeEvent::Issued(challenge) => {
                if let Err(err) = id::verify(&challenge.nonce, self.config.ttl()) {
                    debug!(origin = %message.origin, error = %err, "ignoring stale challenge");
                    return;
                }
                self.prune(&challenge.thumbprint);
                self.track(&challenge.nonce, challenge.thumbprint);
            }
            ChallengeEvent::Used { nonce } => {
                self.challenges.remove(&nonce);
            }
        }
    }

    /// Insert a challenge unless the engine closed meanwhile.
    ///
    /// `close` sets the flag before clearing, so an insert that still sees the
    /// engine open is either cleared by `close` or undone here.
    fn track(&self, nonce: &str, thumbprint: Thumbprint) -> bool {
        self.challenges.insert(nonce.to_string(), thumbprint);
        if self.is_closed() {
            self.challenges.remove(nonce);
            return false;
        }
        true
    }

    /// Drop stale nonces for `thumbprint`, throttling when recent ones exist.
    fn prune(&self, thumbprint: &Thumbprint) {
        let siblings: Vec<String> = self
            .challenges
            .iter()
            .filter(|entry| entry.value() == thumbprint)
            .map(|entry| entry.key().clone())
            .collect();

        for nonce in siblings {
            if id::verify(&nonce, PRUNE_YOUNG).is_ok() {
                thread::sleep(PRUNE_DELAY);
            } else {
                self.challenges.remove(&nonce);
            }
        }
    }

    /// Remove expired nonces.
    pub fn sweep(&self) {
        let ttl = self.config.ttl();
        let before = self.challenges.len();
        self.challenges
            .retain(|nonce, _| id::verify(nonce, ttl).is_ok());
        let removed = before.saturating_sub(self.challenges.len());
        if removed > 0 {
            debug!(removed, "swept expired nonces");
        }
    }

    /// Stop the sweep, forget every nonce, and reject further validation.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.challenges.clear();
        info!(node = %self.node, "nonce engine closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of tracked nonces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }

    #[must_use]
    pub fn contains(&self, nonce: &str) -> bool {
        self.challenges.contains_key(nonce)
    }

    /// Client addresses with a `create` call in flight.
    #[must_use]
    pub fn active_clients(&self) -> usize {
        self.active.len()
    }
}

impl Drop for NonceEngine {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

async fn sweep_loop(engine: Weak<NonceEngine>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(engine) = engine.upgrade() else {
            break;
        };
        if engine.is_closed() {
            break;
        }
        engine.sweep();
    }
}
