//! Redis-backed [`DurableStore`].
//!
//! # Key Patterns
//!
//! - `me:event:{id}` - Canonical event (JSON, insert-only)
//! - `me:events:by_receipt` - Event ids scored by receipt millis (ZSET)
//! - `me:outcome:{id}` - Processing outcome (HASH)
//! - `me:meeting:{id}` - Meeting state without participants (JSON)
//! - `me:meetings` - Known meeting ids (SET)
//! - `me:participants:{meeting_id}` - participant_id → snapshot JSON (HASH)
//! - `me:analytics` - Analytics samples scored by sample millis (ZSET)
//!
//! # Connection Pattern
//!
//! `MultiplexedConnection` is cheap to clone and safe to use concurrently;
//! every operation clones it instead of locking.

use super::lua_scripts;
use super::{without_participants, AnalyticsSample, DurableStore, ProcessingOutcome};
use crate::errors::MeError;
use crate::events::CanonicalEvent;
use crate::observability::metrics;
use crate::state::{MeetingState, ParticipantSnapshot};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{error, instrument, warn};

/// Namespace for every key this store writes.
const KEY_PREFIX: &str = "me:";

const EVENTS_BY_RECEIPT_KEY: &str = "me:events:by_receipt";
const MEETINGS_KEY: &str = "me:meetings";
const ANALYTICS_KEY: &str = "me:analytics";

fn event_key(event_id: &str) -> String {
    format!("{KEY_PREFIX}event:{event_id}")
}

fn outcome_key(event_id: &str) -> String {
    format!("{KEY_PREFIX}outcome:{event_id}")
}

fn meeting_key(meeting_id: &str) -> String {
    format!("{KEY_PREFIX}meeting:{meeting_id}")
}

fn participants_key(meeting_id: &str) -> String {
    format!("{KEY_PREFIX}participants:{meeting_id}")
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Map a Redis failure to `MeError::Store`, logging the operation.
fn store_error(operation: &'static str, e: &redis::RedisError) -> MeError {
    warn!(
        target: "me.store.redis",
        error = %e,
        operation = operation,
        "Redis operation failed"
    );
    MeError::Store(format!("{operation} failed: {e}"))
}

/// Redis-backed store. Cheaply cloneable.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    upsert_event_script: Script,
    record_outcome_script: Script,
    purge_events_script: Script,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `MeError::Store` if the URL is invalid or the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, MeError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do not log redis_url: it may contain credentials
            error!(
                target: "me.store.redis",
                error = %e,
                "Failed to open Redis client"
            );
            MeError::Store(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    target: "me.store.redis",
                    error = %e,
                    "Failed to connect to Redis"
                );
                MeError::Store(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            upsert_event_script: Script::new(lua_scripts::UPSERT_EVENT),
            record_outcome_script: Script::new(lua_scripts::RECORD_OUTCOME),
            purge_events_script: Script::new(lua_scripts::PURGE_EVENTS_BEFORE),
        })
    }
}

#[async_trait]
impl DurableStore for RedisStore {
    #[instrument(skip_all, fields(event_id = %event.event_id))]
    async fn upsert_event(&self, event: &CanonicalEvent) -> Result<bool, MeError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(event)?;

        let inserted: i64 = self
            .upsert_event_script
            .key(event_key(&event.event_id))
            .key(EVENTS_BY_RECEIPT_KEY)
            .arg(json)
            .arg(event.receipt_timestamp.timestamp_millis())
            .arg(&event.event_id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("upsert_event", &e))?;

        metrics::record_store_latency("upsert_event", start.elapsed());
        Ok(inserted == 1)
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<CanonicalEvent>, MeError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn
            .get(event_key(event_id))
            .await
            .map_err(|e| store_error("get_event", &e))?;

        metrics::record_store_latency("get_event", start.elapsed());
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(MeError::from)
    }

    async fn count_events(&self) -> Result<u64, MeError> {
        let mut conn = self.connection.clone();
        conn.zcard(EVENTS_BY_RECEIPT_KEY)
            .await
            .map_err(|e| store_error("count_events", &e))
    }

    #[instrument(skip_all, fields(event_id = %event_id, processed = processed))]
    async fn record_outcome(
        &self,
        event_id: &str,
        processed: bool,
        at: DateTime<Utc>,
    ) -> Result<ProcessingOutcome, MeError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();

        let retry_count: i64 = self
            .record_outcome_script
            .key(outcome_key(event_id))
            .arg(if processed { "1" } else { "0" })
            .arg(at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("record_outcome", &e))?;

        metrics::record_store_latency("record_outcome", start.elapsed());
        Ok(ProcessingOutcome {
            event_id: event_id.to_string(),
            processed,
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            processed_at: at,
        })
    }

    async fn get_outcome(&self, event_id: &str) -> Result<Option<ProcessingOutcome>, MeError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(outcome_key(event_id))
            .await
            .map_err(|e| store_error("get_outcome", &e))?;

        if fields.is_empty() {
            return Ok(None);
        }

        let field = |name: &str| -> Result<&str, MeError> {
            fields
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| MeError::Store(format!("outcome {event_id} missing {name}")))
        };
        let parse_err = |name: &str| MeError::Store(format!("outcome {event_id} has invalid {name}"));

        Ok(Some(ProcessingOutcome {
            event_id: event_id.to_string(),
            processed: field("processed")? == "1",
            retry_count: field("retry_count")?
                .parse()
                .map_err(|_| parse_err("retry_count"))?,
            processed_at: millis_to_utc(
                field("processed_at")?
                    .parse()
                    .map_err(|_| parse_err("processed_at"))?,
            ),
        }))
    }

    #[instrument(skip_all, fields(meeting_id = %meeting.meeting_id))]
    async fn upsert_meeting_state(&self, meeting: &MeetingState) -> Result<(), MeError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(&without_participants(meeting))?;

        redis::pipe()
            .atomic()
            .set(meeting_key(&meeting.meeting_id), json)
            .ignore()
            .sadd(MEETINGS_KEY, &meeting.meeting_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| store_error("upsert_meeting_state", &e))?;

        metrics::record_store_latency("upsert_meeting_state", start.elapsed());
        Ok(())
    }

    async fn upsert_participant_snapshot(
        &self,
        meeting_id: &str,
        snapshot: &ParticipantSnapshot,
    ) -> Result<(), MeError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(snapshot)?;

        conn.hset::<_, _, _, ()>(participants_key(meeting_id), &snapshot.participant_id, json)
            .await
            .map_err(|e| store_error("upsert_participant_snapshot", &e))?;

        metrics::record_store_latency("upsert_participant_snapshot", start.elapsed());
        Ok(())
    }

    async fn get_meeting_state(&self, meeting_id: &str) -> Result<Option<MeetingState>, MeError> {
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn
            .get(meeting_key(meeting_id))
            .await
            .map_err(|e| store_error("get_meeting_state", &e))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let mut meeting: MeetingState = serde_json::from_str(&raw)?;

        let participants: HashMap<String, String> = conn
            .hgetall(participants_key(meeting_id))
            .await
            .map_err(|e| store_error("get_participants", &e))?;
        for (participant_id, json) in participants {
            meeting
                .participants
                .insert(participant_id, serde_json::from_str(&json)?);
        }

        Ok(Some(meeting))
    }

    async fn append_analytics(&self, sample: &AnalyticsSample) -> Result<(), MeError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(sample)?;

        conn.zadd::<_, _, _, ()>(ANALYTICS_KEY, json, sample.timestamp.timestamp_millis())
            .await
            .map_err(|e| store_error("append_analytics", &e))?;

        metrics::record_store_latency("append_analytics", start.elapsed());
        Ok(())
    }

    async fn list_analytics(&self, since: DateTime<Utc>) -> Result<Vec<AnalyticsSample>, MeError> {
        let mut conn = self.connection.clone();
        let raw: Vec<String> = conn
            .zrangebyscore(ANALYTICS_KEY, since.timestamp_millis(), "+inf")
            .await
            .map_err(|e| store_error("list_analytics", &e))?;

        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(MeError::from))
            .collect()
    }

    #[instrument(skip_all)]
    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MeError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();

        let deleted: i64 = self
            .purge_events_script
            .key(EVENTS_BY_RECEIPT_KEY)
            .arg(cutoff.timestamp_millis())
            .arg(KEY_PREFIX)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("delete_events_before", &e))?;

        metrics::record_store_latency("delete_events_before", start.elapsed());
        Ok(u64::try_from(deleted).unwrap_or(0))
    }

    async fn delete_analytics_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MeError> {
        let mut conn = self.connection.clone();
        let exclusive = format!("({}", cutoff.timestamp_millis());
        conn.zrembyscore(ANALYTICS_KEY, "-inf", exclusive)
            .await
            .map_err(|e| store_error("delete_analytics_before", &e))
    }
}
