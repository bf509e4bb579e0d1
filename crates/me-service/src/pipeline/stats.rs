//! Rolling processing statistics and the operational statistics view.

use crate::ingest::{IngestSnapshot, QueueSnapshot};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sentinel for "no event processed yet".
const NO_EVENT: i64 = i64::MIN;

/// Lock-free counters written by the pipeline, read by statistics and the
/// analytics collector.
#[derive(Debug)]
pub struct ProcessingStats {
    processed: AtomicU64,
    failed: AtomicU64,
    unmapped: AtomicU64,
    /// Sum of per-event processing time over processed + failed events.
    total_processing_micros: AtomicU64,
    last_event_millis: AtomicI64,
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self {
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            unmapped: AtomicU64::new(0),
            total_processing_micros: AtomicU64::new(0),
            last_event_millis: AtomicI64::new(NO_EVENT),
        }
    }
}

impl ProcessingStats {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record_timing(&self, elapsed: Duration, at: DateTime<Utc>) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_processing_micros
            .fetch_add(micros, Ordering::Relaxed);
        self.last_event_millis
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    /// Event handled successfully (including unmapped drops).
    pub fn record_processed(&self, elapsed: Duration, at: DateTime<Utc>) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.record_timing(elapsed, at);
    }

    pub fn record_unmapped(&self) {
        self.unmapped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, elapsed: Duration, at: DateTime<Utc>) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.record_timing(elapsed, at);
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn unmapped(&self) -> u64 {
        self.unmapped.load(Ordering::Relaxed)
    }

    /// Mean processing time in milliseconds, 0 when nothing was processed.
    #[must_use]
    pub fn average_processing_ms(&self) -> f64 {
        let count = self.processed() + self.failed();
        if count == 0 {
            return 0.0;
        }
        // Realistic totals stay far below 2^53
        #[allow(clippy::cast_precision_loss)]
        let avg_micros = self.total_processing_micros.load(Ordering::Relaxed) as f64 / count as f64;
        avg_micros / 1000.0
    }

    #[must_use]
    pub fn last_event_time(&self) -> Option<DateTime<Utc>> {
        match self.last_event_millis.load(Ordering::Relaxed) {
            NO_EVENT => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        }
    }
}

/// Operational statistics returned by `get_statistics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatistics {
    pub events_processed: u64,
    pub events_failed: u64,
    pub events_unmapped: u64,
    pub meetings_tracked: u64,
    pub meetings_active: u64,
    pub participants_tracked: u64,
    /// Milliseconds.
    pub average_processing_time: f64,
    pub last_event_time: Option<DateTime<Utc>>,
    pub queue: QueueSnapshot,
    pub ingest: IngestSnapshot,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats() {
        let stats = ProcessingStats::new();
        assert_eq!(stats.processed(), 0);
        assert_eq!(stats.average_processing_ms(), 0.0);
        assert!(stats.last_event_time().is_none());
    }

    #[test]
    fn test_average_covers_processed_and_failed() {
        let stats = ProcessingStats::new();
        let now = Utc::now();

        stats.record_processed(Duration::from_millis(2), now);
        stats.record_failed(Duration::from_millis(4), now);
        stats.record_unmapped();

        assert_eq!(stats.processed(), 1);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.unmapped(), 1);
        assert!((stats.average_processing_ms() - 3.0).abs() < 1e-9);
        assert_eq!(
            stats.last_event_time().map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
    }
}
