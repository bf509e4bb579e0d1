//! Subscriber channel contract and the in-process hub.

use super::message::{BroadcastMessage, BroadcastScope};
use crate::errors::MeError;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Default per-subscriber buffer.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Transport that delivers broadcast messages to subscribers of a scope.
#[async_trait]
pub trait SubscriberChannel: Send + Sync {
    /// Deliver `message` to every subscriber of `scope`.
    ///
    /// Returns the number of subscribers that received it. A failure for
    /// one subscriber must not prevent delivery to the others.
    async fn deliver(
        &self,
        scope: &BroadcastScope,
        message: &BroadcastMessage,
    ) -> Result<usize, MeError>;
}

/// Receiving end of a hub subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub scope: BroadcastScope,
    pub receiver: mpsc::Receiver<BroadcastMessage>,
}

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<BroadcastMessage>,
}

/// In-process [`SubscriberChannel`] with a bounded queue per subscriber.
///
/// A full queue drops the message for that subscriber only; a subscriber
/// whose receiver was dropped is pruned on the next delivery.
pub struct LocalSubscriberHub {
    subscribers: RwLock<HashMap<BroadcastScope, Vec<Subscriber>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for LocalSubscriberHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl LocalSubscriberHub {
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Subscribe to `scope`.
    pub async fn subscribe(&self, scope: BroadcastScope) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .await
            .entry(scope.clone())
            .or_default()
            .push(Subscriber { id, sender });

        debug!(target: "me.broadcast", scope = %scope, subscriber_id = id, "Subscriber added");
        Subscription {
            id,
            scope,
            receiver,
        }
    }

    /// Number of live subscribers for `scope`.
    pub async fn subscriber_count(&self, scope: &BroadcastScope) -> usize {
        self.subscribers
            .read()
            .await
            .get(scope)
            .map_or(0, |subs| subs.iter().filter(|s| !s.sender.is_closed()).count())
    }
}

#[async_trait]
impl SubscriberChannel for LocalSubscriberHub {
    async fn deliver(
        &self,
        scope: &BroadcastScope,
        message: &BroadcastMessage,
    ) -> Result<usize, MeError> {
        let mut delivered = 0usize;
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            let Some(subs) = subscribers.get(scope) else {
                return Ok(0);
            };

            for sub in subs {
                match sub.sender.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            target: "me.broadcast",
                            scope = %scope,
                            subscriber_id = sub.id,
                            event_id = %message.event_id,
                            "Subscriber queue full, message dropped"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(sub.id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            if let Some(subs) = subscribers.get_mut(scope) {
                subs.retain(|s| !closed.contains(&s.id));
                if subs.is_empty() {
                    subscribers.remove(scope);
                }
            }
            debug!(
                target: "me.broadcast",
                scope = %scope,
                pruned = closed.len(),
                "Pruned closed subscribers"
            );
        }

        Ok(delivered)
    }
}
