//! Cross-node challenge synchronization.
//!
//! Delivery is best-effort: messages may be lost or delivered twice, and the
//! engine tolerates both.

use super::Challenge;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChallengeEvent {
    /// A nonce was issued on the origin node.
    Issued(Challenge),
    /// A nonce was consumed on the origin node.
    Used { nonce: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeMessage {
    /// Node that published the message.
    pub origin: Uuid,
    pub event: ChallengeEvent,
}

pub type MessageHandler = Arc<dyn Fn(ChallengeMessage) + Send + Sync>;

/// Publish/subscribe transport between nonce engines.
pub trait ChallengeBus: Send + Sync {
    fn publish(&self, message: ChallengeMessage);

    fn subscribe(&self, handler: MessageHandler);
}

/// Single-node deployment: nothing to synchronize.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBus;

impl ChallengeBus for NoopBus {
    fn publish(&self, _message: ChallengeMessage) {}

    fn subscribe(&self, _handler: MessageHandler) {}
}

/// In-process fan-out to every subscriber, including the publisher.
#[derive(Default)]
pub struct LocalBus {
    subscribers: RwLock<Vec<MessageHandler>>,
}

impl LocalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChallengeBus for LocalBus {
    fn publish(&self, message: ChallengeMessage) {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in subscribers {
            handler(message.clone());
        }
    }

    fn subscribe(&self, handler: MessageHandler) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }
}
