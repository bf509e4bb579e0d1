//! Sliding-window registry of recently seen event ids.
//!
//! Not durable: a restart forgets the window. The gateway owns the only
//! instance behind its mutex, so no internal locking here.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// `event_id → first_seen` within the dedup window.
#[derive(Debug)]
pub struct DedupRegistry {
    window: chrono::Duration,
    seen: HashMap<String, DateTime<Utc>>,
    last_sweep: Option<DateTime<Utc>>,
}

impl DedupRegistry {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            seen: HashMap::new(),
            last_sweep: None,
        }
    }

    /// True when `event_id` was recorded less than one window before `now`.
    ///
    /// An entry that has outlived the window but not yet been swept is not
    /// a duplicate.
    #[must_use]
    pub fn is_duplicate(&self, event_id: &str, now: DateTime<Utc>) -> bool {
        self.seen
            .get(event_id)
            .is_some_and(|first_seen| now.signed_duration_since(*first_seen) < self.window)
    }

    /// Record `event_id` as first seen at `seen_at`.
    pub fn record(&mut self, event_id: impl Into<String>, seen_at: DateTime<Utc>) {
        self.seen.insert(event_id.into(), seen_at);
    }

    /// Drop entries older than the window. Returns how many were removed.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        let window = self.window;
        self.seen
            .retain(|_, first_seen| now.signed_duration_since(*first_seen) < window);
        self.last_sweep = Some(now);
        before - self.seen.len()
    }

    /// Sweep if no sweep ran within the last window.
    ///
    /// Called on the ingestion path so the map stays bounded even when the
    /// retention cleaner runs far less often than the window.
    pub fn maybe_evict(&mut self, now: DateTime<Utc>) -> usize {
        let due = self
            .last_sweep
            .map_or(true, |last| now.signed_duration_since(last) >= self.window);
        if due {
            self.evict_expired(now)
        } else {
            0
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    #[must_use]
    pub fn contains(&self, event_id: &str) -> bool {
        self.seen.contains_key(event_id)
    }
}
