//! Broadcast Dispatcher.
//!
//! Best-effort fan-out of applied internal events. Delivery errors are
//! logged and counted, never returned to the pipeline.

use super::channel::SubscriberChannel;
use super::message::{BroadcastMessage, BroadcastScope};
use crate::events::InternalEvent;
use crate::observability::metrics;
use crate::state::TransitionContext;

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fans internal events out through a [`SubscriberChannel`].
#[derive(Clone)]
pub struct BroadcastDispatcher {
    channel: Arc<dyn SubscriberChannel>,
}

impl BroadcastDispatcher {
    #[must_use]
    pub fn new(channel: Arc<dyn SubscriberChannel>) -> Self {
        Self { channel }
    }

    /// Deliver `event` to `scope`. Returns the delivered count (0 on error).
    pub async fn broadcast(
        &self,
        context: &TransitionContext,
        event: &InternalEvent,
        scope: &BroadcastScope,
    ) -> usize {
        let message = BroadcastMessage::new(context, event, scope, Utc::now());

        match self.channel.deliver(scope, &message).await {
            Ok(delivered) => {
                metrics::record_broadcast(delivered, 0);
                debug!(
                    target: "me.broadcast",
                    event_id = %context.event_id,
                    scope = %scope,
                    delivered = delivered,
                    "Broadcast delivered"
                );
                delivered
            }
            Err(e) => {
                metrics::record_broadcast(0, 1);
                metrics::record_error("broadcast", e.error_type_label());
                warn!(
                    target: "me.broadcast",
                    event_id = %context.event_id,
                    scope = %scope,
                    error = %e,
                    "Broadcast failed"
                );
                0
            }
        }
    }

    /// Deliver an applied event to its meeting scope and, when known, its
    /// account scope. Returns the total delivered count.
    pub async fn broadcast_applied(
        &self,
        context: &TransitionContext,
        event: &InternalEvent,
    ) -> usize {
        let mut delivered = self
            .broadcast(context, event, &BroadcastScope::meeting(&context.meeting_id))
            .await;

        if !context.account_id.is_empty() {
            delivered += self
                .broadcast(context, event, &BroadcastScope::account(&context.account_id))
                .await;
        }
        delivered
    }
}
