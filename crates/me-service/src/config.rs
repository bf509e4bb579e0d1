//! Meeting Events configuration.
//!
//! Configuration is loaded from environment variables. The Redis URL may
//! carry credentials and is redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address (ingestion, operational queries, health, metrics).
pub const DEFAULT_HTTP_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default ingestion queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5000;

/// Default dequeue wait before the consumer loop re-checks for shutdown.
pub const DEFAULT_DEQUEUE_TIMEOUT_MS: u64 = 1000;

/// Default deduplication window in seconds.
pub const DEFAULT_DEDUP_WINDOW_SECONDS: u64 = 300;

/// Default grace period before a departed participant leaves the live map.
pub const DEFAULT_PARTICIPANT_GRACE_SECONDS: u64 = 300;

/// Default state synchronizer interval in seconds.
pub const DEFAULT_SYNC_INTERVAL_SECONDS: u64 = 30;

/// Default analytics collector interval in seconds.
pub const DEFAULT_ANALYTICS_INTERVAL_SECONDS: u64 = 60;

/// Default retention cleaner interval in seconds (1 hour).
pub const DEFAULT_RETENTION_INTERVAL_SECONDS: u64 = 3600;

/// Default raw event retention in hours.
pub const DEFAULT_EVENT_RETENTION_HOURS: u64 = 24;

/// Default analytics retention in days.
pub const DEFAULT_ANALYTICS_RETENTION_DAYS: u64 = 7;

/// Default time an ended meeting stays in memory after its last update.
pub const DEFAULT_ENDED_MEETING_TTL_SECONDS: u64 = 3600;

/// Default bounded drain at shutdown.
pub const DEFAULT_SHUTDOWN_DRAIN_SECONDS: u64 = 10;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "me";

/// Meeting Events configuration.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL for the durable store. `None` selects the
    /// in-memory store.
    pub redis_url: Option<SecretString>,

    /// HTTP server bind address (default: "0.0.0.0:8090").
    pub http_bind_address: String,

    /// Unique identifier for this instance (log correlation only).
    pub instance_id: String,

    /// Bounded ingestion queue capacity.
    pub queue_capacity: usize,

    /// Consumer dequeue wait.
    pub dequeue_timeout: Duration,

    /// Window in which a repeated event_id is a duplicate.
    pub dedup_window: Duration,

    /// Grace period before an away participant is dropped from live state.
    pub participant_grace_period: Duration,

    /// Background synchronizer interval.
    pub sync_interval: Duration,

    /// Analytics collector interval.
    pub analytics_interval: Duration,

    /// Retention cleaner interval.
    pub retention_interval: Duration,

    /// Raw event retention.
    pub event_retention: Duration,

    /// Analytics sample retention.
    pub analytics_retention: Duration,

    /// Ended meetings older than this are evicted from memory.
    pub ended_meeting_ttl: Duration,

    /// Maximum time spent draining the queue at shutdown.
    pub shutdown_drain: Duration,

    /// Emit JSON-formatted logs.
    pub log_json: bool,
}

/// Custom Debug implementation that redacts the Redis URL.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("http_bind_address", &self.http_bind_address)
            .field("instance_id", &self.instance_id)
            .field("queue_capacity", &self.queue_capacity)
            .field("dequeue_timeout", &self.dequeue_timeout)
            .field("dedup_window", &self.dedup_window)
            .field("participant_grace_period", &self.participant_grace_period)
            .field("sync_interval", &self.sync_interval)
            .field("analytics_interval", &self.analytics_interval)
            .field("retention_interval", &self.retention_interval)
            .field("event_retention", &self.event_retention)
            .field("analytics_retention", &self.analytics_retention)
            .field("ended_meeting_ttl", &self.ended_meeting_ttl)
            .field("shutdown_drain", &self.shutdown_drain)
            .field("log_json", &self.log_json)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: None,
            http_bind_address: DEFAULT_HTTP_BIND_ADDRESS.to_string(),
            instance_id: format!("{DEFAULT_INSTANCE_ID_PREFIX}-local"),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            dequeue_timeout: Duration::from_millis(DEFAULT_DEQUEUE_TIMEOUT_MS),
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECONDS),
            participant_grace_period: Duration::from_secs(DEFAULT_PARTICIPANT_GRACE_SECONDS),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECONDS),
            analytics_interval: Duration::from_secs(DEFAULT_ANALYTICS_INTERVAL_SECONDS),
            retention_interval: Duration::from_secs(DEFAULT_RETENTION_INTERVAL_SECONDS),
            event_retention: Duration::from_secs(DEFAULT_EVENT_RETENTION_HOURS * 3600),
            analytics_retention: Duration::from_secs(DEFAULT_ANALYTICS_RETENTION_DAYS * 86_400),
            ended_meeting_ttl: Duration::from_secs(DEFAULT_ENDED_MEETING_TTL_SECONDS),
            shutdown_drain: Duration::from_secs(DEFAULT_SHUTDOWN_DRAIN_SECONDS),
            log_json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse a numeric variable, falling back to `default` when unset.
///
/// A present but unparseable value is an error rather than a silent default.
fn parse_u64(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key} must be an integer"))),
        None => Ok(default),
    }
}

/// Like [`parse_u64`] but rejects zero.
fn parse_nonzero(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = parse_u64(vars, key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!("{key} must be > 0")));
    }
    Ok(value)
}

/// Like [`parse_nonzero`], scaled to seconds by `unit_secs`.
fn parse_nonzero_scaled(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
    unit_secs: u64,
) -> Result<Duration, ConfigError> {
    parse_nonzero(vars, key, default)?
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue(format!("{key} is too large")))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = vars
            .get("REDIS_URL")
            .filter(|s| !s.trim().is_empty())
            .map(|s| SecretString::from(s.clone()));

        let http_bind_address = vars
            .get("ME_HTTP_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HTTP_BIND_ADDRESS.to_string());

        let queue_capacity = parse_nonzero(vars, "ME_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY as u64)?;
        let queue_capacity = usize::try_from(queue_capacity)
            .map_err(|_| ConfigError::InvalidValue("ME_QUEUE_CAPACITY too large".to_string()))?;

        let dequeue_timeout_ms =
            parse_nonzero(vars, "ME_DEQUEUE_TIMEOUT_MS", DEFAULT_DEQUEUE_TIMEOUT_MS)?;
        let dedup_window = parse_nonzero(vars, "ME_DEDUP_WINDOW_SECONDS", DEFAULT_DEDUP_WINDOW_SECONDS)?;
        let grace = parse_u64(
            vars,
            "ME_PARTICIPANT_GRACE_SECONDS",
            DEFAULT_PARTICIPANT_GRACE_SECONDS,
        )?;
        let sync_interval =
            parse_nonzero(vars, "ME_SYNC_INTERVAL_SECONDS", DEFAULT_SYNC_INTERVAL_SECONDS)?;
        let analytics_interval = parse_nonzero(
            vars,
            "ME_ANALYTICS_INTERVAL_SECONDS",
            DEFAULT_ANALYTICS_INTERVAL_SECONDS,
        )?;
        let retention_interval = parse_nonzero(
            vars,
            "ME_RETENTION_INTERVAL_SECONDS",
            DEFAULT_RETENTION_INTERVAL_SECONDS,
        )?;
        let event_retention = parse_nonzero_scaled(
            vars,
            "ME_EVENT_RETENTION_HOURS",
            DEFAULT_EVENT_RETENTION_HOURS,
            3600,
        )?;
        let analytics_retention = parse_nonzero_scaled(
            vars,
            "ME_ANALYTICS_RETENTION_DAYS",
            DEFAULT_ANALYTICS_RETENTION_DAYS,
            86_400,
        )?;
        let ended_meeting_ttl = parse_u64(
            vars,
            "ME_ENDED_MEETING_TTL_SECONDS",
            DEFAULT_ENDED_MEETING_TTL_SECONDS,
        )?;
        let shutdown_drain =
            parse_u64(vars, "ME_SHUTDOWN_DRAIN_SECONDS", DEFAULT_SHUTDOWN_DRAIN_SECONDS)?;

        let log_json = vars
            .get("ME_LOG_JSON")
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        // Generate instance ID
        let instance_id = vars.get("ME_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            http_bind_address,
            instance_id,
            queue_capacity,
            dequeue_timeout: Duration::from_millis(dequeue_timeout_ms),
            dedup_window: Duration::from_secs(dedup_window),
            participant_grace_period: Duration::from_secs(grace),
            sync_interval: Duration::from_secs(sync_interval),
            analytics_interval: Duration::from_secs(analytics_interval),
            retention_interval: Duration::from_secs(retention_interval),
            event_retention,
            analytics_retention,
            ended_meeting_ttl: Duration::from_secs(ended_meeting_ttl),
            shutdown_drain: Duration::from_secs(shutdown_drain),
            log_json,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = HashMap::new();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert!(config.redis_url.is_none());
        assert_eq!(config.http_bind_address, DEFAULT_HTTP_BIND_ADDRESS);
        assert_eq!(config.queue_capacity, 5000);
        assert_eq!(config.dequeue_timeout, Duration::from_millis(1000));
        assert_eq!(config.dedup_window, Duration::from_secs(300));
        assert_eq!(config.participant_grace_period, Duration::from_secs(300));
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert_eq!(config.analytics_interval, Duration::from_secs(60));
        assert_eq!(config.retention_interval, Duration::from_secs(3600));
        assert_eq!(config.event_retention, Duration::from_secs(24 * 3600));
        assert_eq!(config.analytics_retention, Duration::from_secs(7 * 86_400));
        assert!(!config.log_json);
        // Instance ID should be auto-generated
        assert!(config.instance_id.starts_with("me-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            ("REDIS_URL".to_string(), "redis://localhost:6379".to_string()),
            ("ME_HTTP_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string()),
            ("ME_INSTANCE_ID".to_string(), "me-custom-001".to_string()),
            ("ME_QUEUE_CAPACITY".to_string(), "64".to_string()),
            ("ME_DEDUP_WINDOW_SECONDS".to_string(), "60".to_string()),
            ("ME_PARTICIPANT_GRACE_SECONDS".to_string(), "0".to_string()),
            ("ME_SYNC_INTERVAL_SECONDS".to_string(), "5".to_string()),
            ("ME_EVENT_RETENTION_HOURS".to_string(), "48".to_string()),
            ("ME_LOG_JSON".to_string(), "true".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(
            config.redis_url.as_ref().map(|s| s.expose_secret().to_string()),
            Some("redis://localhost:6379".to_string())
        );
        assert_eq!(config.http_bind_address, "127.0.0.1:9000");
        assert_eq!(config.instance_id, "me-custom-001");
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.dedup_window, Duration::from_secs(60));
        assert_eq!(config.participant_grace_period, Duration::ZERO);
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert_eq!(config.event_retention, Duration::from_secs(48 * 3600));
        assert!(config.log_json);
    }

    #[test]
    fn test_from_vars_rejects_zero_capacity() {
        let vars = HashMap::from([("ME_QUEUE_CAPACITY".to_string(), "0".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_from_vars_rejects_garbage_number() {
        let vars = HashMap::from([("ME_SYNC_INTERVAL_SECONDS".to_string(), "soon".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(v)) if v.contains("ME_SYNC_INTERVAL_SECONDS")));
    }

    #[test]
    fn test_from_vars_rejects_overflowing_retention() {
        for key in ["ME_EVENT_RETENTION_HOURS", "ME_ANALYTICS_RETENTION_DAYS"] {
            let vars = HashMap::from([(key.to_string(), u64::MAX.to_string())]);

            let result = Config::from_vars(&vars);
            assert!(
                matches!(&result, Err(ConfigError::InvalidValue(v)) if v.contains(key)),
                "{key} should be rejected, got {result:?}"
            );
        }
    }

    #[test]
    fn test_empty_redis_url_selects_memory_store() {
        let vars = HashMap::from([("REDIS_URL".to_string(), "  ".to_string())]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let vars = HashMap::from([(
            "REDIS_URL".to_string(),
            "redis://:hunter2@cache:6379".to_string(),
        )]);
        let config = Config::from_vars(&vars).expect("Config should load successfully");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("hunter2"));
    }
}
