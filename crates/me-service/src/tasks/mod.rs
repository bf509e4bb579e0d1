//! Background tasks.
//!
//! Each task has a `start_*` loop driven by an interval and a cancellation
//! token, and a `run_*` function performing a single iteration.

pub mod analytics;
pub mod retention;
pub mod synchronizer;

pub use analytics::{start_analytics_collector, AnalyticsCollector, AnalyticsConfig};
pub use retention::{run_retention, start_retention_cleaner, RetentionConfig, RetentionReport};
pub use synchronizer::{run_state_sync, start_state_sync, StateSyncConfig, SyncReport};

use chrono::{DateTime, Utc};
use std::time::Duration;

/// `now - age`, saturating at the earliest representable time.
pub(crate) fn cutoff_before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
