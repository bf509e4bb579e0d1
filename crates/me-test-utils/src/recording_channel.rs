//! Subscriber channel that records every delivery.
//!
//! Each `deliver` call counts as one subscriber reached, unless the scope
//! has been marked as failing.

use async_trait::async_trait;
use me_service::broadcast::{BroadcastMessage, BroadcastScope, SubscriberChannel};
use me_service::errors::MeError;
use std::collections::HashSet;
use std::sync::Mutex;

/// Recording [`SubscriberChannel`] for assertions on broadcasts.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    delivered: Mutex<Vec<(String, BroadcastMessage)>>,
    failing_scopes: Mutex<HashSet<String>>,
}

impl RecordingChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to `scope` (e.g. `meeting:m-1`) fail.
    pub fn fail_scope(&self, scope: &str) {
        self.failing_scopes
            .lock()
            .unwrap()
            .insert(scope.to_string());
    }

    /// Every recorded message, in delivery order.
    pub fn messages(&self) -> Vec<BroadcastMessage> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Messages delivered to `scope`, in delivery order.
    pub fn messages_for(&self, scope: &str) -> Vec<BroadcastMessage> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == scope)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Internal event types delivered to `scope`, in delivery order.
    pub fn event_types_for(&self, scope: &str) -> Vec<String> {
        self.messages_for(scope)
            .into_iter()
            .map(|m| m.event_type)
            .collect()
    }
}

#[async_trait]
impl SubscriberChannel for RecordingChannel {
    async fn deliver(
        &self,
        scope: &BroadcastScope,
        message: &BroadcastMessage,
    ) -> Result<usize, MeError> {
        let scope = scope.to_string();
        if self.failing_scopes.lock().unwrap().contains(&scope) {
            return Err(MeError::Broadcast(format!("injected failure: {scope}")));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((scope, message.clone()));
        Ok(1)
    }
}
