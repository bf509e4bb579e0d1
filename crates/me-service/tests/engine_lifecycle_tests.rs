//! End-to-end lifecycle tests for the event engine.
//!
//! Drives provider envelopes through ingestion, processing, reconciliation
//! and broadcast, asserting on live state, durable state and statistics.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use me_service::engine::EventEngine;
use me_service::ingest::{IngestOutcome, IngestionGateway, RejectReason};
use me_service::state::{ConnectionStatus, MeetingStatus};
use me_service::store::{DurableStore, InMemoryStore};
use me_test_utils::*;
use serde_json::json;

fn start_engine() -> (Arc<InMemoryStore>, Arc<RecordingChannel>, EventEngine) {
    let store = Arc::new(InMemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let engine = EventEngine::start(&test_config(), store.clone(), channel.clone());
    (store, channel, engine)
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_meeting_lifecycle_end_to_end() {
    let (store, channel, engine) = start_engine();
    let alice = TestParticipant::new("Alice").with_ids("p-1", "u-1").host();

    assert!(engine.accept(meeting_started("m-1", "Standup").id("E1").build()).await);
    assert!(
        engine
            .accept(participant_joined("m-1", &alice).id("E2").at_offset(10).build())
            .await
    );
    assert!(
        engine
            .accept(participant_left("m-1", &alice).id("E3").at_offset(70).build())
            .await
    );
    assert!(engine.accept(meeting_ended("m-1").id("E4").at_offset(120).build()).await);

    wait_until_handled(&engine, 4).await;

    let stats = engine.get_statistics();
    assert_eq!(stats.events_processed, 4);
    assert_eq!(stats.events_failed, 0);
    assert_eq!(stats.meetings_tracked, 1);
    assert_eq!(stats.meetings_active, 0);
    assert!(stats.last_event_time.is_some());

    let meeting = engine.get_meeting_state("m-1").await.unwrap().unwrap();
    assert_eq!(meeting.status, MeetingStatus::Ended);
    assert_eq!(meeting.topic.as_deref(), Some("Standup"));
    assert_eq!(meeting.start_time, Some(base_time()));
    assert_eq!(meeting.end_time, Some(at_offset(120)));

    let snapshot = engine
        .get_participant_state("m-1", "p-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.connection_status, ConnectionStatus::Away);
    assert_eq!(snapshot.duration_seconds, Some(60));
    assert!(snapshot.is_host);

    for id in ["E1", "E2", "E3", "E4"] {
        assert!(store.get_event(id).await.unwrap().is_some(), "{id} stored");
        assert!(store.get_outcome(id).await.unwrap().unwrap().processed);
    }

    assert_eq!(
        channel.event_types_for("meeting:m-1"),
        vec![
            "MEETING_STARTED",
            "PARTICIPANT_JOINED",
            "PARTICIPANT_LEFT",
            "MEETING_ENDED"
        ]
    );
    assert_eq!(channel.messages_for(&format!("account:{TEST_ACCOUNT_ID}")).len(), 4);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_final_sync_persists_live_state() {
    let (store, _channel, engine) = start_engine();
    let bob = TestParticipant::new("Bob").with_ids("p-2", "u-2");

    engine.accept(meeting_started("m-2", "Review").id("E1").build()).await;
    engine.accept(participant_joined("m-2", &bob).id("E2").at_offset(5).build()).await;
    wait_until_handled(&engine, 2).await;

    let report = engine.shutdown().await.unwrap();
    let sync = report.final_sync.unwrap();
    assert_eq!(sync.meetings_synced, 1);
    assert_eq!(sync.meetings_failed, 0);

    let stored = store.get_meeting_state("m-2").await.unwrap().unwrap();
    assert_eq!(stored.status, MeetingStatus::Started);
    assert!(stored.participants.contains_key("p-2"));
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_duplicate_delivery_is_processed_once() {
    let (store, channel, engine) = start_engine();

    let first = engine
        .submit(meeting_started("m-1", "Standup").id("E1").build())
        .await;
    let second = engine
        .submit(meeting_started("m-1", "Standup").id("E1").build())
        .await;

    assert!(matches!(first, IngestOutcome::Accepted { .. }));
    assert!(matches!(second, IngestOutcome::Duplicate { .. }));
    assert!(second.is_accepted());

    wait_until_handled(&engine, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = engine.get_statistics();
    assert_eq!(stats.events_processed, 1);
    assert_eq!(stats.ingest.duplicates, 1);
    assert_eq!(store.count_events().await.unwrap(), 1);
    assert_eq!(channel.messages_for("meeting:m-1").len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_join_stores_one_event_and_tracks_one_participant() {
    let (store, channel, engine) = start_engine();
    let bob = TestParticipant::new("Bob").with_ids("p-2", "u-2");

    let first = engine
        .submit(participant_joined("m-2", &bob).id("E1").build())
        .await;
    let second = engine
        .submit(participant_joined("m-2", &bob).id("E1").build())
        .await;
    assert!(matches!(first, IngestOutcome::Accepted { .. }));
    assert!(matches!(second, IngestOutcome::Duplicate { .. }));

    wait_until_handled(&engine, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = engine.get_statistics();
    assert_eq!(store.count_events().await.unwrap(), 1);
    assert_eq!(stats.participants_tracked, 1);
    assert_eq!(stats.ingest.duplicates, 1);
    assert_eq!(stats.events_processed, 1);
    assert_eq!(channel.messages_for("meeting:m-2").len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_envelopes_without_id_dedup_on_content() {
    let (_store, _channel, engine) = start_engine();

    let first = engine.submit(meeting_started("m-1", "Standup").build()).await;
    let second = engine.submit(meeting_started("m-1", "Standup").build()).await;

    assert!(matches!(first, IngestOutcome::Accepted { .. }));
    assert!(matches!(second, IngestOutcome::Duplicate { .. }));
    assert_eq!(first.event_id(), second.event_id());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_redelivered_start_after_window_is_ignored() {
    let (_store, channel, engine) = start_engine();

    engine.accept(meeting_started("m-1", "Standup").id("E1").build()).await;
    // Same transition under a new provider id: passes dedup, ignored by state.
    engine
        .accept(meeting_started("m-1", "Standup").id("E1-retry").build())
        .await;
    wait_until_handled(&engine, 2).await;

    let stats = engine.get_statistics();
    assert_eq!(stats.events_processed, 2);
    assert_eq!(stats.meetings_tracked, 1);
    assert_eq!(channel.messages_for("meeting:m-1").len(), 1);

    engine.shutdown().await;
}

// ============================================================================
// Monotonic lifecycle
// ============================================================================

#[tokio::test]
async fn test_ended_meeting_never_restarts() {
    let (_store, _channel, engine) = start_engine();
    let late = TestParticipant::new("Late").with_ids("p-9", "u-9");

    engine.accept(meeting_started("m-1", "Standup").id("E1").build()).await;
    engine.accept(meeting_ended("m-1").id("E2").at_offset(60).build()).await;
    engine.accept(meeting_started("m-1", "Again").id("E3").at_offset(90).build()).await;
    engine
        .accept(participant_joined("m-1", &late).id("E4").at_offset(95).build())
        .await;
    wait_until_handled(&engine, 4).await;

    let meeting = engine.get_meeting_state("m-1").await.unwrap().unwrap();
    assert_eq!(meeting.status, MeetingStatus::Ended);
    assert_eq!(meeting.topic.as_deref(), Some("Standup"));
    assert!(meeting.participants.is_empty());
    assert_eq!(engine.get_statistics().events_failed, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_end_before_start_is_ignored() {
    let (_store, channel, engine) = start_engine();

    engine.accept(meeting_ended("m-3").id("E1").build()).await;
    wait_until_handled(&engine, 1).await;

    assert!(engine.get_meeting_state("m-3").await.unwrap().is_none());
    assert!(channel.messages().is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_meeting_end_departs_remaining_participants() {
    let (_store, _channel, engine) = start_engine();
    let alice = TestParticipant::new("Alice").with_ids("p-1", "u-1");

    engine.accept(meeting_started("m-1", "Standup").id("E1").build()).await;
    engine
        .accept(participant_joined("m-1", &alice).id("E2").at_offset(30).build())
        .await;
    engine.accept(meeting_ended("m-1").id("E3").at_offset(330).build()).await;
    wait_until_handled(&engine, 3).await;

    let snapshot = engine
        .get_participant_state("m-1", "p-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.connection_status, ConnectionStatus::Away);
    assert_eq!(snapshot.left_at, Some(at_offset(330)));
    assert_eq!(snapshot.duration_seconds, Some(300));

    engine.shutdown().await;
}

// ============================================================================
// Participant status
// ============================================================================

#[tokio::test]
async fn test_status_events_merge_reported_flags_only() {
    let (_store, channel, engine) = start_engine();
    let alice = TestParticipant::new("Alice").with_ids("p-1", "u-1");

    engine.accept(meeting_started("m-1", "Standup").id("E1").build()).await;
    engine
        .accept(participant_joined("m-1", &alice).id("E2").at_offset(1).build())
        .await;
    engine
        .accept(
            participant_status("meeting.participant_video_on", "m-1", &alice)
                .id("E3")
                .at_offset(2)
                .build(),
        )
        .await;
    engine
        .accept(
            participant_status("meeting.participant_audio_muted", "m-1", &alice)
                .id("E4")
                .at_offset(3)
                .build(),
        )
        .await;
    wait_until_handled(&engine, 4).await;

    let snapshot = engine
        .get_participant_state("m-1", "p-1")
        .await
        .unwrap()
        .unwrap();
    assert!(snapshot.video_on);
    assert!(snapshot.audio_muted);
    assert!(!snapshot.screen_share_on);

    let statuses = channel
        .event_types_for("meeting:m-1")
        .into_iter()
        .filter(|t| t == "PARTICIPANT_STATUS_CHANGED")
        .count();
    assert_eq!(statuses, 2);

    engine.shutdown().await;
}

// ============================================================================
// Unknown event types
// ============================================================================

#[tokio::test]
async fn test_unknown_event_type_is_stored_but_not_applied() {
    let (store, channel, engine) = start_engine();

    engine
        .accept(
            TestEnvelope::new("meeting.chat_message_sent", "m-1")
                .id("E1")
                .payload("text", json!("hello"))
                .build(),
        )
        .await;
    wait_until_handled(&engine, 1).await;

    let stats = engine.get_statistics();
    assert_eq!(stats.events_processed, 1);
    assert_eq!(stats.events_unmapped, 1);
    assert_eq!(stats.events_failed, 0);
    assert_eq!(stats.meetings_tracked, 0);

    assert!(store.get_event("E1").await.unwrap().is_some());
    assert!(store.get_outcome("E1").await.unwrap().unwrap().processed);
    assert!(channel.messages().is_empty());

    engine.shutdown().await;
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test]
async fn test_full_queue_rejects_without_remembering_id() {
    let (gateway, mut receiver) = IngestionGateway::new(Duration::from_secs(300), 1);

    let first = gateway
        .submit(meeting_started("m-1", "Standup").id("E1").build())
        .await;
    assert!(matches!(first, IngestOutcome::Accepted { .. }));

    let rejected = gateway.submit(meeting_ended("m-1").id("E2").build()).await;
    assert!(matches!(
        rejected,
        IngestOutcome::Rejected {
            reason: RejectReason::QueueFull,
            ..
        }
    ));
    assert!(!rejected.is_accepted());

    // Free the slot; the redelivery must be accepted, not reported duplicate.
    assert!(receiver.try_recv().is_some());
    let retried = gateway.submit(meeting_ended("m-1").id("E2").build()).await;
    assert!(matches!(retried, IngestOutcome::Accepted { .. }));

    let counters = gateway.counters();
    assert_eq!(counters.received, 3);
    assert_eq!(counters.accepted, 2);
    assert_eq!(counters.rejected, 1);
    assert_eq!(counters.duplicates, 0);
}

// ============================================================================
// Departure grace period
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_departed_participant_removed_after_grace_period() {
    let store = Arc::new(InMemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let config = me_service::config::Config {
        participant_grace_period: Duration::from_secs(60),
        ..test_config()
    };
    let engine = EventEngine::start(&config, store, channel);
    let alice = TestParticipant::new("Alice").with_ids("p-1", "u-1");

    engine.accept(meeting_started("m-1", "Standup").id("E1").build()).await;
    engine
        .accept(participant_joined("m-1", &alice).id("E2").at_offset(1).build())
        .await;
    engine
        .accept(participant_left("m-1", &alice).id("E3").at_offset(2).build())
        .await;
    wait_until_handled(&engine, 3).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(
        engine
            .get_participant_state("m-1", "p-1")
            .await
            .unwrap()
            .is_some(),
        "Away participant kept during the grace period"
    );

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(
        engine
            .get_participant_state("m-1", "p-1")
            .await
            .unwrap()
            .is_none(),
        "Away participant removed once the grace period elapsed"
    );
    assert_eq!(engine.get_statistics().participants_tracked, 0);

    engine.shutdown().await;
}
