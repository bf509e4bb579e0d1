//! `StateReconciler` - actor owning all live meeting state.
//!
//! Every mutation of the meeting map happens inside this actor's task; other
//! components hold a cloneable [`ReconcilerHandle`] and talk to it over a
//! bounded mailbox.
//!
//! # Participant departure
//!
//! When a participant leaves:
//! 1. Snapshot marked `away` with `left_at` and `duration_seconds` set
//! 2. Grace period (default 5 minutes) during which a rejoin restores it
//! 3. If not rejoined: snapshot removed from the live map and the
//!    tracked-participants counter decremented
//!
//! Ignored transitions are logged as state conflicts and never mutate state.

use super::messages::{IgnoreReason, ReconcilerMessage, TransitionContext, TransitionOutcome};
use super::model::{MeetingState, MeetingStatus, ParticipantSnapshot, RecordingStatus};
use crate::errors::MeError;
use crate::events::{InternalEvent, ParticipantDetails, StatusChange};
use crate::observability::metrics;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox size for the reconciler.
const RECONCILER_CHANNEL_BUFFER: usize = 1000;

/// How often departed participants are checked against the grace period.
const DEPARTURE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Counters shared between the reconciler (writer) and statistics readers.
#[derive(Debug, Default)]
pub struct TrackedCounts {
    meetings_tracked: AtomicU64,
    meetings_active: AtomicU64,
    participants_tracked: AtomicU64,
}

/// Point-in-time view of [`TrackedCounts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackedCountsSnapshot {
    pub meetings_tracked: u64,
    pub meetings_active: u64,
    pub participants_tracked: u64,
}

impl TrackedCounts {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn meetings_tracked(&self) -> u64 {
        self.meetings_tracked.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn meetings_active(&self) -> u64 {
        self.meetings_active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn participants_tracked(&self) -> u64 {
        self.participants_tracked.load(Ordering::SeqCst)
    }

    fn increment_participants(&self) {
        self.participants_tracked.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_participants(&self, by: u64) {
        self.participants_tracked.fetch_sub(by, Ordering::SeqCst);
    }

    fn set_meetings(&self, tracked: u64, active: u64) {
        self.meetings_tracked.store(tracked, Ordering::SeqCst);
        self.meetings_active.store(active, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> TrackedCountsSnapshot {
        TrackedCountsSnapshot {
            meetings_tracked: self.meetings_tracked(),
            meetings_active: self.meetings_active(),
            participants_tracked: self.participants_tracked(),
        }
    }
}

/// Handle to the `StateReconciler`.
#[derive(Clone)]
pub struct ReconcilerHandle {
    sender: mpsc::Sender<ReconcilerMessage>,
    cancel_token: CancellationToken,
}

impl ReconcilerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ReconcilerMessage,
    ) -> Result<T, MeError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| MeError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MeError::Internal(format!("response receive failed: {e}")))
    }

    /// Apply one internal event.
    pub async fn apply(
        &self,
        context: TransitionContext,
        event: InternalEvent,
    ) -> Result<TransitionOutcome, MeError> {
        self.request(|respond_to| ReconcilerMessage::Apply {
            context,
            event,
            respond_to,
        })
        .await
    }

    pub async fn get_meeting(&self, meeting_id: &str) -> Result<Option<MeetingState>, MeError> {
        let meeting_id = meeting_id.to_string();
        self.request(|respond_to| ReconcilerMessage::GetMeeting {
            meeting_id,
            respond_to,
        })
        .await
    }

    pub async fn get_participant(
        &self,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<Option<ParticipantSnapshot>, MeError> {
        let meeting_id = meeting_id.to_string();
        let participant_id = participant_id.to_string();
        self.request(|respond_to| ReconcilerMessage::GetParticipant {
            meeting_id,
            participant_id,
            respond_to,
        })
        .await
    }

    /// Clone of every meeting currently held in memory.
    pub async fn snapshot_all(&self) -> Result<Vec<MeetingState>, MeError> {
        self.request(|respond_to| ReconcilerMessage::SnapshotAll { respond_to })
            .await
    }

    /// Drop ended meetings last updated before `older_than`.
    pub async fn evict_ended(&self, older_than: DateTime<Utc>) -> Result<usize, MeError> {
        self.request(|respond_to| ReconcilerMessage::EvictEnded {
            older_than,
            respond_to,
        })
        .await
    }

    /// Forget evicted meetings that ended before `older_than`. Until then a
    /// redelivered start or join for them is ignored.
    pub async fn purge_tombstones(&self, older_than: DateTime<Utc>) -> Result<usize, MeError> {
        self.request(|respond_to| ReconcilerMessage::PurgeTombstones {
            older_than,
            respond_to,
        })
        .await
    }

    /// Stop the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The reconciler actor.
pub struct StateReconciler {
    receiver: mpsc::Receiver<ReconcilerMessage>,
    cancel_token: CancellationToken,
    meetings: HashMap<String, MeetingState>,
    /// `(meeting_id, participant_id)` → when the participant went away.
    departures: HashMap<(String, String), Instant>,
    /// Evicted meeting → when it ended. Keeps `ended` terminal after the
    /// live state is gone.
    tombstones: HashMap<String, DateTime<Utc>>,
    grace_period: Duration,
    counts: Arc<TrackedCounts>,
    messages_processed: u64,
}

impl StateReconciler {
    /// Spawn the reconciler.
    ///
    /// # Arguments
    ///
    /// * `grace_period` - How long an away participant stays in the live map
    /// * `counts` - Shared counters for statistics
    /// * `cancel_token` - Stops the actor
    pub fn spawn(
        grace_period: Duration,
        counts: Arc<TrackedCounts>,
        cancel_token: CancellationToken,
    ) -> (ReconcilerHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(RECONCILER_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            meetings: HashMap::new(),
            departures: HashMap::new(),
            tombstones: HashMap::new(),
            grace_period,
            counts,
            messages_processed: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        (
            ReconcilerHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(skip_all, name = "me.state.reconciler")]
    async fn run(mut self) {
        info!(
            target: "me.state",
            grace_period_secs = self.grace_period.as_secs(),
            "StateReconciler started"
        );

        let mut departure_check = tokio::time::interval(DEPARTURE_CHECK_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "me.state", "StateReconciler received cancellation signal");
                    break;
                }

                _ = departure_check.tick() => {
                    self.expire_departures(Instant::now());
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            // Reads must never observe a participant whose
                            // grace period has already run out.
                            self.expire_departures(Instant::now());
                            self.handle_message(message);
                            self.messages_processed += 1;
                        }
                        None => {
                            info!(target: "me.state", "StateReconciler channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "me.state",
            meetings = self.meetings.len(),
            messages_processed = self.messages_processed,
            "StateReconciler stopped"
        );
    }

    fn handle_message(&mut self, message: ReconcilerMessage) {
        match message {
            ReconcilerMessage::Apply {
                context,
                event,
                respond_to,
            } => {
                let outcome = self.apply(&context, event);
                if let TransitionOutcome::Ignored { reason } = outcome {
                    debug!(
                        target: "me.state",
                        event_id = %context.event_id,
                        meeting_id = %context.meeting_id,
                        reason = reason.as_str(),
                        "State conflict, transition ignored"
                    );
                }
                self.publish_counts();
                let _ = respond_to.send(outcome);
            }
            ReconcilerMessage::GetMeeting {
                meeting_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.meetings.get(&meeting_id).cloned());
            }
            ReconcilerMessage::GetParticipant {
                meeting_id,
                participant_id,
                respond_to,
            } => {
                let snapshot = self
                    .meetings
                    .get(&meeting_id)
                    .and_then(|m| m.participants.get(&participant_id))
                    .cloned();
                let _ = respond_to.send(snapshot);
            }
            ReconcilerMessage::SnapshotAll { respond_to } => {
                let _ = respond_to.send(self.meetings.values().cloned().collect());
            }
            ReconcilerMessage::EvictEnded {
                older_than,
                respond_to,
            } => {
                let evicted = self.evict_ended(older_than);
                self.publish_counts();
                let _ = respond_to.send(evicted);
            }
            ReconcilerMessage::PurgeTombstones {
                older_than,
                respond_to,
            } => {
                let _ = respond_to.send(self.purge_tombstones(older_than));
            }
        }
    }

    fn apply(&mut self, ctx: &TransitionContext, event: InternalEvent) -> TransitionOutcome {
        match event {
            InternalEvent::MeetingStarted {
                topic,
                host_id,
                settings,
            } => self.meeting_started(ctx, topic, host_id, settings),
            InternalEvent::MeetingEnded => self.meeting_ended(ctx),
            InternalEvent::ParticipantJoined { participant } => {
                self.participant_joined(ctx, &participant)
            }
            InternalEvent::ParticipantLeft { participant_id } => {
                self.participant_left(ctx, &participant_id)
            }
            InternalEvent::ParticipantStatusChanged {
                participant_id,
                change,
            } => self.participant_status_changed(ctx, &participant_id, &change),
            InternalEvent::RecordingStarted => self.recording(ctx, RecordingStatus::Active),
            InternalEvent::RecordingStopped => self.recording(ctx, RecordingStatus::Stopped),
        }
    }

    fn meeting_started(
        &mut self,
        ctx: &TransitionContext,
        topic: Option<String>,
        host_id: Option<String>,
        settings: Map<String, Value>,
    ) -> TransitionOutcome {
        if self.tombstones.contains_key(&ctx.meeting_id) {
            return ignored(IgnoreReason::MeetingEnded);
        }
        let now = Utc::now();
        let meeting = self
            .meetings
            .entry(ctx.meeting_id.clone())
            .or_insert_with(|| {
                MeetingState::new(&ctx.meeting_id, &ctx.account_id, MeetingStatus::Unstarted, now)
            });

        match meeting.status {
            MeetingStatus::Started => ignored(IgnoreReason::AlreadyStarted),
            MeetingStatus::Ended => ignored(IgnoreReason::MeetingEnded),
            MeetingStatus::Unstarted => {
                meeting.status = MeetingStatus::Started;
                meeting.start_time = Some(ctx.event_timestamp);
                if topic.is_some() {
                    meeting.topic = topic;
                }
                if host_id.is_some() {
                    meeting.host_id = host_id;
                }
                meeting.settings.extend(settings);
                if meeting.account_id.is_empty() {
                    meeting.account_id.clone_from(&ctx.account_id);
                }
                meeting.touch(now);

                info!(
                    target: "me.state",
                    meeting_id = %ctx.meeting_id,
                    "Meeting started"
                );
                TransitionOutcome::Applied
            }
        }
    }

    fn meeting_ended(&mut self, ctx: &TransitionContext) -> TransitionOutcome {
        let Some(meeting) = self.meetings.get_mut(&ctx.meeting_id) else {
            return ignored(IgnoreReason::MeetingNotFound);
        };

        match meeting.status {
            MeetingStatus::Unstarted => ignored(IgnoreReason::MeetingNotStarted),
            MeetingStatus::Ended => ignored(IgnoreReason::MeetingEnded),
            MeetingStatus::Started => {
                meeting.status = MeetingStatus::Ended;
                meeting.end_time = Some(ctx.event_timestamp);

                let departed_at = Instant::now();
                let mut departed = 0usize;
                for participant in meeting.participants.values_mut() {
                    if participant.is_in_meeting() {
                        participant.depart(ctx.event_timestamp);
                        self.departures.insert(
                            (ctx.meeting_id.clone(), participant.participant_id.clone()),
                            departed_at,
                        );
                        departed += 1;
                    }
                }
                meeting.touch(Utc::now());

                info!(
                    target: "me.state",
                    meeting_id = %ctx.meeting_id,
                    participants_departed = departed,
                    "Meeting ended"
                );
                TransitionOutcome::Applied
            }
        }
    }

    fn participant_joined(
        &mut self,
        ctx: &TransitionContext,
        details: &ParticipantDetails,
    ) -> TransitionOutcome {
        if self.tombstones.contains_key(&ctx.meeting_id) {
            return ignored(IgnoreReason::MeetingEnded);
        }
        let now = Utc::now();
        let meeting = self
            .meetings
            .entry(ctx.meeting_id.clone())
            .or_insert_with(|| {
                MeetingState::new(&ctx.meeting_id, &ctx.account_id, MeetingStatus::Unstarted, now)
            });

        if meeting.status == MeetingStatus::Ended {
            return ignored(IgnoreReason::MeetingEnded);
        }

        let key = (ctx.meeting_id.clone(), details.id.clone());
        match meeting.participants.get_mut(&details.id) {
            Some(existing) => {
                if existing
                    .left_at
                    .is_some_and(|left_at| ctx.event_timestamp < left_at)
                {
                    return ignored(IgnoreReason::StaleEvent);
                }
                existing.rejoin(details, ctx.event_timestamp);
                self.departures.remove(&key);
            }
            None => {
                meeting.participants.insert(
                    details.id.clone(),
                    ParticipantSnapshot::joined(details, &ctx.account_id, ctx.event_timestamp),
                );
                self.counts.increment_participants();
            }
        }
        meeting.touch(now);

        debug!(
            target: "me.state",
            meeting_id = %ctx.meeting_id,
            participant_id = %details.id,
            "Participant joined"
        );
        TransitionOutcome::Applied
    }

    fn participant_left(&mut self, ctx: &TransitionContext, participant_id: &str) -> TransitionOutcome {
        let Some(meeting) = self.meetings.get_mut(&ctx.meeting_id) else {
            return ignored(IgnoreReason::MeetingNotFound);
        };
        let Some(participant) = meeting.participants.get_mut(participant_id) else {
            return ignored(IgnoreReason::ParticipantNotFound);
        };
        if !participant.is_in_meeting() {
            return ignored(IgnoreReason::AlreadyAway);
        }
        if ctx.event_timestamp < participant.joined_at {
            return ignored(IgnoreReason::StaleEvent);
        }

        participant.depart(ctx.event_timestamp);
        let duration = participant.duration_seconds;
        meeting.touch(Utc::now());
        self.departures.insert(
            (ctx.meeting_id.clone(), participant_id.to_string()),
            Instant::now(),
        );

        debug!(
            target: "me.state",
            meeting_id = %ctx.meeting_id,
            participant_id = %participant_id,
            duration_seconds = ?duration,
            "Participant left"
        );
        TransitionOutcome::Applied
    }

    fn participant_status_changed(
        &mut self,
        ctx: &TransitionContext,
        participant_id: &str,
        change: &StatusChange,
    ) -> TransitionOutcome {
        if change.is_empty() {
            return ignored(IgnoreReason::NoChange);
        }
        let Some(meeting) = self.meetings.get_mut(&ctx.meeting_id) else {
            return ignored(IgnoreReason::MeetingNotFound);
        };
        if meeting.status == MeetingStatus::Ended {
            return ignored(IgnoreReason::MeetingEnded);
        }
        let Some(participant) = meeting.participants.get_mut(participant_id) else {
            return ignored(IgnoreReason::ParticipantNotFound);
        };

        if participant.apply_status(change) {
            meeting.touch(Utc::now());
            TransitionOutcome::Applied
        } else {
            ignored(IgnoreReason::NoChange)
        }
    }

    fn recording(&mut self, ctx: &TransitionContext, status: RecordingStatus) -> TransitionOutcome {
        let Some(meeting) = self.meetings.get_mut(&ctx.meeting_id) else {
            return ignored(IgnoreReason::MeetingNotFound);
        };
        if meeting.status == MeetingStatus::Ended {
            return ignored(IgnoreReason::MeetingEnded);
        }
        if meeting.recording_status == status {
            return ignored(IgnoreReason::NoChange);
        }
        meeting.recording_status = status;
        meeting.touch(Utc::now());
        TransitionOutcome::Applied
    }

    /// Remove away participants whose grace period has elapsed.
    fn expire_departures(&mut self, now: Instant) {
        let grace_period = self.grace_period;
        let expired: Vec<(String, String)> = self
            .departures
            .iter()
            .filter(|(_, departed_at)| now.duration_since(**departed_at) >= grace_period)
            .map(|(key, _)| key.clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        for key in expired {
            self.departures.remove(&key);
            let (meeting_id, participant_id) = key;
            let removed = self
                .meetings
                .get_mut(&meeting_id)
                .and_then(|m| m.participants.remove(&participant_id));
            if removed.is_some() {
                self.counts.decrement_participants(1);
                info!(
                    target: "me.state",
                    meeting_id = %meeting_id,
                    participant_id = %participant_id,
                    "Departure grace period expired, removing participant"
                );
            }
        }
        self.publish_counts();
    }

    fn evict_ended(&mut self, older_than: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .meetings
            .values()
            .filter(|m| m.status == MeetingStatus::Ended && m.last_updated < older_than)
            .map(|m| m.meeting_id.clone())
            .collect();

        for meeting_id in &expired {
            if let Some(meeting) = self.meetings.remove(meeting_id) {
                self.counts
                    .decrement_participants(meeting.participants.len() as u64);
                self.departures.retain(|(m, _), _| m != meeting_id);
                self.tombstones.insert(
                    meeting.meeting_id,
                    meeting.end_time.unwrap_or(meeting.last_updated),
                );
            }
        }

        if !expired.is_empty() {
            info!(
                target: "me.state",
                evicted = expired.len(),
                "Evicted ended meetings from memory"
            );
        }
        expired.len()
    }

    fn purge_tombstones(&mut self, older_than: DateTime<Utc>) -> usize {
        let before = self.tombstones.len();
        self.tombstones.retain(|_, ended_at| *ended_at >= older_than);
        before - self.tombstones.len()
    }

    fn publish_counts(&self) {
        let tracked = self.meetings.len() as u64;
        let active = self
            .meetings
            .values()
            .filter(|m| m.status == MeetingStatus::Started)
            .count() as u64;
        self.counts.set_meetings(tracked, active);
        metrics::set_meetings_active(active);
        metrics::set_participants_tracked(self.counts.participants_tracked());
    }
}

fn ignored(reason: IgnoreReason) -> TransitionOutcome {
    if matches!(reason, IgnoreReason::StaleEvent) {
        warn!(target: "me.state", reason = reason.as_str(), "Out-of-order event ignored");
    }
    TransitionOutcome::Ignored { reason }
}
